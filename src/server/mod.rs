//! HTTP surface
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET/HEAD /download/build` | Request a build (`os`, `arch`, `arm`, `features`) |
//! | `GET/HEAD <download_prefix>/{path}` | Fetch a finished artifact |
//! | `GET /online` | Liveness check |
//! | `GET /features.json` | Add-on features available for builds |

mod handlers;

use crate::config::schema::ServerConfig;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::service::BuildService;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Path of the build endpoint
pub const BUILD_ROUTE: &str = "/download/build";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    service: Arc<BuildService>,
    download_prefix: String,
    cors_origin: HeaderValue,
}

impl AppState {
    pub fn new(service: Arc<BuildService>, config: &ServerConfig) -> BuildsrvResult<Self> {
        let prefix = config.download_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(BuildsrvError::InvalidSetting {
                key: "server.download_prefix",
                reason: format!("'{}' must be an absolute, non-root path", config.download_prefix),
            });
        }

        let cors_origin = HeaderValue::from_str(&config.cors_origin).map_err(|e| {
            BuildsrvError::InvalidSetting {
                key: "server.cors_origin",
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            service,
            download_prefix: prefix.to_string(),
            cors_origin,
        })
    }

    pub fn service(&self) -> &Arc<BuildService> {
        &self.service
    }

    /// Public URL path of a file under the build root
    fn location(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(self.service.build_root())
            .unwrap_or(path);
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        format!("{}/{}", self.download_prefix, segments.join("/"))
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let download_route = format!("{}/{{*path}}", state.download_prefix);

    Router::new()
        .route(BUILD_ROUTE, get(handlers::build))
        .route(&download_route, get(handlers::download))
        .route("/online", get(handlers::online))
        .route("/features.json", get(handlers::features))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drop every job and remove the
/// build root.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> BuildsrvResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let addr = listener
        .local_addr()
        .map_err(|e| BuildsrvError::io("reading listener address", e))?;
    info!(addr = %addr, "Build server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BuildsrvError::io("serving HTTP", e))?;

    info!("Server stopped, removing builds");
    service.shutdown().await
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
