//! styleguide CLI: compliance-reviewed product copy style guides.
//!
//! Resolves stored baseline and legal guidance, runs the stage pipeline
//! against OpenRouter and publishes one guide per field.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
