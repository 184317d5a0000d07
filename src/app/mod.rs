pub mod auth;
pub mod book_store;
pub mod generator;
pub mod http;
pub mod library_store;
pub mod model;
pub mod queue;
pub mod samples;
