//! Knapsack import CLI - Main entry point

use clap::Parser;
use knapsack_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use knapsack_import::cli::{execute, Cli};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("knapsack-import")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
