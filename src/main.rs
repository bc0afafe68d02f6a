mod cli;

use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = setup_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: {:#}", err);
        return ExitCode::FAILURE;
    }

    match cli::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: u8, log_file: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("conveyor=info,warn"),
        1 => EnvFilter::new("conveyor=debug,warn"),
        _ => EnvFilter::new("conveyor=trace,info"),
    });

    let file_layer = match log_file {
        Some(path) => {
            let path = if path == "auto" {
                format!("upload_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"))
            } else {
                path.to_string()
            };
            let file = File::create(&path).with_context(|| format!("cannot create log file {}", path))?;

            Some(fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}
