use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use tracing_error::ErrorLayer;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::{cli::Cli, config::AppConfig};

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde;

pub mod batch;
pub mod cli;
pub mod config;
pub mod event;
pub mod gamdl;
pub mod nonewrap;
pub mod progress;
pub mod render;
pub mod retry;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("amdl=info")),
        )
        .with(ErrorLayer::default())
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();

    trace!("initialized, loading config");

    let config = AppConfig::get().wrap_err("failed to load AppConfig")?;

    cli.execute(&config).await
}
