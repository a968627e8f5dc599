//! Command-driven builder
//!
//! Runs a configured program (typically a build script wrapping the
//! toolchain) once per build. Everything the program needs is passed
//! through the environment:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `BUILDSRV_OS` / `BUILDSRV_ARCH` | target platform |
//! | `BUILDSRV_ARM` | ARM revision, empty for other architectures |
//! | `BUILDSRV_OUTPUT` | where to write the binary |
//! | `BUILDSRV_FEATURES` | comma-separated feature names, registry order |
//! | `BUILDSRV_PACKAGES` | comma-separated plugin packages to inject |
//! | `BUILDSRV_WORKDIR` | scratch directory owned by this build |

use crate::builder::{build_error_output, Builder, PreparedBuild};
use crate::build::workspace::remove_dir;
use crate::config::schema::BuilderConfig;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::features::FeatureSet;
use crate::platform::Platform;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builder that shells out to an external program
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    args: Vec<String>,
    source_dir: PathBuf,
    work_root: PathBuf,
}

impl CommandBuilder {
    /// Create a builder from config; work directories default to the
    /// system temp dir
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            source_dir: config.source_dir.clone(),
            work_root: config
                .work_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn prepare(&self, features: &FeatureSet) -> BuildsrvResult<Box<dyn PreparedBuild>> {
        let work_dir = self.work_root.join(format!("buildsrv-{}", Uuid::new_v4()));
        fs::create_dir_all(&work_dir).await.map_err(|e| {
            BuildsrvError::PrepareFailed(format!(
                "creating work directory {}: {}",
                work_dir.display(),
                e
            ))
        })?;

        let packages = features.packages();

        // One plugin package per line, for builders that generate imports
        let plugins_file = work_dir.join("plugins.txt");
        let mut listing = packages.join("\n");
        listing.push('\n');
        if let Err(e) = fs::write(&plugins_file, listing).await {
            let _ = remove_dir(&work_dir).await;
            return Err(BuildsrvError::PrepareFailed(format!(
                "writing {}: {}",
                plugins_file.display(),
                e
            )));
        }

        debug!(
            "Prepared work directory {} for features [{}]",
            work_dir.display(),
            features
        );

        Ok(Box::new(CommandBuild {
            program: self.program.clone(),
            args: self.args.clone(),
            source_dir: self.source_dir.clone(),
            work_dir,
            features: features.to_string(),
            packages: packages.join(","),
        }))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

struct CommandBuild {
    program: String,
    args: Vec<String>,
    source_dir: PathBuf,
    work_dir: PathBuf,
    features: String,
    packages: String,
}

#[async_trait]
impl PreparedBuild for CommandBuild {
    async fn build_for(&self, platform: &Platform, output: &Path) -> BuildsrvResult<()> {
        info!("Building {} with [{}]", platform, self.features);
        debug!("Executing: {} {:?}", self.program, self.args);

        let result = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.source_dir)
            .env("BUILDSRV_OS", platform.os())
            .env("BUILDSRV_ARCH", platform.arch())
            .env("BUILDSRV_ARM", platform.arm().unwrap_or(""))
            .env("BUILDSRV_OUTPUT", output)
            .env("BUILDSRV_FEATURES", &self.features)
            .env("BUILDSRV_PACKAGES", &self.packages)
            .env("BUILDSRV_WORKDIR", &self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildsrvError::command_failed(&self.program, e))?;

        if !result.status.success() {
            let stdout = String::from_utf8_lossy(&result.stdout);
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BuildsrvError::BuildFailed {
                target: platform.to_string(),
                output: build_error_output(&stdout, &stderr),
            });
        }

        if !output.is_file() {
            return Err(BuildsrvError::BuildFailed {
                target: platform.to_string(),
                output: format!("builder exited cleanly but wrote no {}", output.display()),
            });
        }

        Ok(())
    }

    async fn teardown(&self) {
        if let Err(e) = remove_dir(&self.work_dir).await {
            warn!("Build teardown: {}", e);
        }
    }
}
