//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// buildsrv - on-demand custom build server
///
/// Builds a binary for a requested platform and feature set, packages it,
/// and serves it to every client asking for the same combination.
#[derive(Parser, Debug)]
#[command(name = "buildsrv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUILDSRV_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the build server
    Serve(ServeArgs),

    /// List features available for builds
    Features(FeaturesArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides server.listen)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Directory for build jobs (overrides builds.root)
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Seconds a finished build is kept, 0 to keep forever (overrides builds.ttl_secs)
    #[arg(long)]
    pub ttl: Option<u64>,
}

/// Arguments for the features command
#[derive(Parser, Debug)]
pub struct FeaturesArgs {
    /// Include built-in features, not only add-ons
    #[arg(short, long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
