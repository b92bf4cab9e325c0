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
    let cli = ebookforge::cli::Cli::parse();
    ebookforge::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        ebookforge::cli::Command::Build(args) => {
            ebookforge::build::run(args).await.context("build")?;
        }
        ebookforge::cli::Command::Compile(args) => {
            ebookforge::build::recompile(args).await.context("compile")?;
        }
        ebookforge::cli::Command::Render(args) => {
            ebookforge::build::render(args).await.context("render")?;
        }
    }

    Ok(())
}
