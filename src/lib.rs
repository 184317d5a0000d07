#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod image_client;
pub mod json_repair;
pub mod logging;
pub mod narration;
pub mod render;
pub mod story;
pub mod story_client;
