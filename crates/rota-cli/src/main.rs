mod cli_args;
mod cli_types;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::Cli;

fn init_tracing(log_level: Option<&str>) -> Result<()> {
    let env_filter = match log_level.map(str::trim).filter(|level| !level.is_empty()) {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid --log-level directive '{level}'"))?,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;
    let report = commands::execute(cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
