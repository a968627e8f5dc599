//! Serve command - run the build server

use crate::builder::CommandBuilder;
use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::server::{self, AppState};
use crate::service::BuildService;
use console::style;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::debug;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> BuildsrvResult<()> {
    let config = apply_overrides(args, config);
    debug!(
        "Builds in {} (ttl {}s) using {}",
        config.builds.root.display(),
        config.builds.ttl_secs,
        config.builder.program
    );

    let builder = Arc::new(CommandBuilder::new(&config.builder));
    let service = Arc::new(BuildService::from_config(&config, builder)?);
    let state = AppState::new(service, &config.server)?;

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .map_err(|e| BuildsrvError::io(format!("binding {}", config.server.listen), e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| BuildsrvError::io("reading listener address", e))?;

    eprintln!(
        "{} Serving builds on http://{}",
        style("●").green(),
        style(addr).bold()
    );

    server::serve(listener, state, server::shutdown_signal()).await
}

fn apply_overrides(args: ServeArgs, config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(root) = args.build_dir {
        config.builds.root = root;
    }
    if let Some(ttl) = args.ttl {
        config.builds.ttl_secs = ttl;
    }
    config
}
