use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use storybook::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storybook::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Generate(args) => storybook::commands::generate(args)
            .await
            .context("generate")?,
        Command::Status(args) => storybook::commands::status(args).await.context("status")?,
        Command::Render(args) => storybook::commands::render(args).await.context("render")?,
    }

    Ok(())
}
