use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bookbrief::logging::init().context("init logging")?;

    let cli = bookbrief::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookbrief::cli::Command::Serve(args) => {
            bookbrief::server::run(args).await.context("serve")?;
        }
        bookbrief::cli::Command::Search(args) => {
            bookbrief::search::run(args).await.context("search")?;
        }
        bookbrief::cli::Command::Summarize(args) => {
            bookbrief::summarize::run(args).await.context("summarize")?;
        }
        bookbrief::cli::Command::Models => {
            bookbrief::gemini::run_models().await.context("models")?;
        }
        bookbrief::cli::Command::Narrate(args) => {
            bookbrief::playback::run(args).await.context("narrate")?;
        }
    }

    Ok(())
}
