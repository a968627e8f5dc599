//! buildsrv - on-demand custom build server
//!
//! CLI entry point that dispatches to subcommands.

use buildsrv::cli::{Cli, Commands};
use buildsrv::config::ConfigManager;
use buildsrv::error::BuildsrvResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BuildsrvResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Config is needed before logging is set up (log format); load errors
    // surface through the normal error path
    let config = config_manager.load().await;
    let json_logs = matches!(&config, Ok(c) if c.general.log_format == "json");
    init_logging(cli.verbose, json_logs);
    let config = config?;

    match cli.command {
        Commands::Serve(args) => buildsrv::cli::commands::serve(args, &config).await,
        Commands::Features(args) => buildsrv::cli::commands::features(args, &config).await,
        Commands::Config(args) => {
            buildsrv::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; RUST_LOG takes precedence
fn init_logging(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "buildsrv=warn",
        1 => "buildsrv=info",
        _ => "buildsrv=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
