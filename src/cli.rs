use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a storybook and wait for it to finish.
    Generate(GenerateArgs),
    /// Print the generation status of a stored book.
    Status(StatusArgs),
    /// Write a completed book as printable HTML.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// What the story is about.
    #[arg(long)]
    pub idea: String,

    /// Reader age band, e.g. "toddler", "K", "2nd".
    #[arg(long)]
    pub age: String,

    /// Illustration style, e.g. "watercolor".
    #[arg(long)]
    pub style: String,

    /// Requested page count (clamped to 5..=12).
    #[arg(long)]
    pub pages: Option<i64>,

    /// Main character name.
    #[arg(long)]
    pub character: Option<String>,

    /// Main character kind (animal, person, ...).
    #[arg(long, default_value = "animal")]
    pub character_kind: String,

    /// Narrator voice stored on the book.
    #[arg(long)]
    pub voice: Option<String>,

    /// Directory holding the book store.
    #[arg(long, default_value = "storybook-data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub book_id: String,

    #[arg(long, default_value = "storybook-data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    #[arg(long)]
    pub book_id: String,

    #[arg(long, default_value = "storybook-data")]
    pub data_dir: PathBuf,

    /// Output HTML path.
    #[arg(long)]
    pub out: PathBuf,

    /// Overwrite an existing output file.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}
