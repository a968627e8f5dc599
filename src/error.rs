//! Error types for buildsrv
//!
//! All modules use `BuildsrvResult<T>` as their return type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for buildsrv operations
pub type BuildsrvResult<T> = Result<T, BuildsrvError>;

/// All errors that can occur in buildsrv
#[derive(Error, Debug)]
pub enum BuildsrvError {
    // Input validation errors
    #[error("missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("{os}/{arch} not supported")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("arm version not supported: {0}")]
    UnsupportedArm(String),

    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    // Registry errors
    #[error("Invalid feature registry: {0}")]
    InvalidRegistry(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Build errors
    #[error("Failed to prepare build: {0}")]
    PrepareFailed(String),

    #[error("Build failed for {target}: {output}")]
    BuildFailed { target: String, output: String },

    #[error("Build job {0} failed")]
    JobFailed(String),

    // Archive errors
    #[error("Failed to create archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    // Coordination errors
    #[error("Build job {0} no longer exists")]
    JobVanished(String),

    #[error("Timed out waiting for build job {0}")]
    WaitTimeout(String),

    #[error("Server is shutting down")]
    ShuttingDown,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BuildsrvError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an archive error
    pub fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the client caused this error.
    ///
    /// Client errors are safe to echo back verbatim.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter(_)
                | Self::UnsupportedPlatform { .. }
                | Self::UnsupportedArm(_)
                | Self::UnknownFeature(_)
        )
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            return StatusCode::BAD_REQUEST;
        }
        match self {
            Self::WaitTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: buildsrv config show"),
            Self::InvalidRegistry(_) => Some("Check the [[features]] entries in your config"),
            Self::InvalidSetting { .. } => Some("Run: buildsrv config show"),
            Self::CommandFailed { .. } => Some("Check builder.program in your config"),
            _ => None,
        }
    }
}

impl IntoResponse for BuildsrvError {
    fn into_response(self) -> Response {
        // Only validation messages reach the client; everything else may
        // carry paths or build output
        let status = self.status_code();
        let body = if self.is_client_error() {
            self.to_string()
        } else {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        };

        (status, body).into_response()
    }
}
