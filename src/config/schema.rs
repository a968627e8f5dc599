//! Configuration schema for buildsrv
//!
//! Configuration is stored at `~/.config/buildsrv/config.toml`

use crate::features::Feature;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Build job settings
    pub builds: BuildsConfig,

    /// Allowed target platforms
    pub platforms: PlatformsConfig,

    /// External builder settings
    pub builder: BuilderConfig,

    /// Feature registry (empty = built-in registry)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging of job lifecycle events
    pub audit_log: bool,

    /// Audit log location (defaults to the state directory)
    pub audit_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
            audit_path: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub listen: String,

    /// URL prefix under which finished artifacts are served
    pub download_prefix: String,

    /// Value for Access-Control-Allow-Origin
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5050".to_string(),
            download_prefix: "/download/builds".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

/// Build job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildsConfig {
    /// Directory holding one subdirectory per job. Fully managed; it is
    /// removed on shutdown.
    pub root: PathBuf,

    /// Lifetime of a finished build in seconds (0 = never expire)
    pub ttl_secs: u64,

    /// How long a request waits on someone else's build (0 = no limit)
    pub wait_timeout_secs: u64,

    /// Base name of the produced binary
    pub binary_name: String,

    /// Files bundled next to the binary, relative to `builder.source_dir`
    pub aux_files: Vec<PathBuf>,

    /// Target OSes that get a zip archive instead of tar.gz
    pub zip_os: Vec<String>,
}

impl BuildsConfig {
    /// Build lifetime as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Wait bound for joined builds, if any
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }
}

impl Default for BuildsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("builds"),
            ttl_secs: 24 * 60 * 60,
            wait_timeout_secs: 0,
            binary_name: "caddy".to_string(),
            aux_files: vec![
                PathBuf::from("dist/README.txt"),
                PathBuf::from("dist/LICENSES.txt"),
                PathBuf::from("dist/CHANGES.txt"),
            ],
            zip_os: vec!["windows".to_string(), "darwin".to_string()],
        }
    }
}

/// Platform allow-lists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    /// Supported operating systems
    pub os: Vec<String>,

    /// Supported CPU architectures
    pub arch: Vec<String>,

    /// Supported ARM revisions
    pub arm: Vec<String>,

    /// Unsupported combinations as "os/arch"
    pub exclude: Vec<String>,

    /// ARM revision used when `arch=arm` comes without one
    pub default_arm: String,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            os: ["linux", "darwin", "windows", "freebsd", "openbsd"]
                .map(String::from)
                .to_vec(),
            arch: ["386", "amd64", "arm"].map(String::from).to_vec(),
            arm: ["5", "6", "7"].map(String::from).to_vec(),
            exclude: vec![],
            default_arm: "7".to_string(),
        }
    }
}

/// External builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Program invoked once per build
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Source tree the builder runs in
    pub source_dir: PathBuf,

    /// Where per-build working directories are created
    pub work_root: Option<PathBuf>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            program: "./build.sh".to_string(),
            args: vec![],
            source_dir: PathBuf::from("."),
            work_root: None,
        }
    }
}
