//! mediamgr CLI Binary
//!
//! Operator interface for accounts, credits, generation and the post queue.

use anyhow::Context;
use clap::Parser;
use mediamgr::cli::{command_name, Cli, RunContext};
use mediamgr::config::{AppConfig, ConfigLoader};
use mediamgr::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info, info_span, Instrument};

fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", mediamgr::cli::map_error(&anyhow::Error::new(e)));
            process::exit(2);
        }
    };

    let logging_config = build_logging_config(&cli, &config);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(cli, config) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{}", mediamgr::cli::map_error(&e));
            process::exit(1);
        }
    }
}

fn run(cli: Cli, config: AppConfig) -> anyhow::Result<String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let context = RunContext::new(config, cli.format)?;
    let name = command_name(&cli.command);
    info!(command = %name, "mediamgr starting");

    runtime.block_on(
        async {
            let output = context.execute(&cli.command).await?;
            info!("Command completed successfully");
            Ok(output)
        }
        .instrument(info_span!("command", name = %name)),
    )
}

/// Build logging configuration from CLI args and the loaded config.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli, config: &AppConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = cli.log_format.as_deref().and_then(|f| f.parse().ok()) {
        logging.format = format;
    }
    logging
}
