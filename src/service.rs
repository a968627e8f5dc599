//! Build request pipeline
//!
//! request → validate platform → resolve features → job key →
//! coordinator → (build + archive | wait) → finished artifact.

use crate::archive::{archive, ArchiveFormat};
use crate::audit::AuditLog;
use crate::build::workspace::remove_dir;
use crate::build::{Artifact, BuildJob, BuildTarget, JobCoordinator, JobWorkspace};
use crate::builder::{build_binary, panic_message, Builder};
use crate::config::schema::PlatformsConfig;
use crate::config::Config;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::features::{resolve_features, FeatureRegistry};
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tracing::{debug, error, info, warn};

/// Raw build parameters as received from a client
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub arm: Option<String>,
    pub features: Vec<String>,
}

impl BuildRequest {
    /// Split a comma-separated feature list, ignoring empty entries
    pub fn parse_features(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A finished build handed back to a requester
#[derive(Debug)]
pub struct BuildResponse {
    pub job: Arc<BuildJob>,
    pub artifact: Arc<Artifact>,
    /// The archive, opened before the job was confirmed live; readable
    /// even if the job expires afterwards
    pub file: File,
    /// True if this request ran the build, false if it reused or joined one
    pub created: bool,
}

impl BuildResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.job.expires_at()
    }
}

/// Settings the pipeline needs, extracted from `Config`
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub build_root: PathBuf,
    pub binary_name: String,
    /// Auxiliary files bundled with every build, in archive order
    pub aux_files: Vec<PathBuf>,
    pub zip_os: Vec<String>,
    pub platforms: PlatformsConfig,
    pub ttl: Duration,
    pub wait_timeout: Option<Duration>,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        let source_dir = &config.builder.source_dir;
        Self {
            build_root: config.builds.root.clone(),
            binary_name: config.builds.binary_name.clone(),
            aux_files: config
                .builds
                .aux_files
                .iter()
                .map(|f| source_dir.join(f))
                .collect(),
            zip_os: config.builds.zip_os.clone(),
            platforms: config.platforms.clone(),
            ttl: config.builds.ttl(),
            wait_timeout: config.builds.wait_timeout(),
        }
    }
}

/// Serves build requests, running each distinct build at most once
pub struct BuildService {
    registry: FeatureRegistry,
    coordinator: JobCoordinator,
    builder: Arc<dyn Builder>,
    settings: ServiceSettings,
    audit: Arc<AuditLog>,
}

impl BuildService {
    /// Create the service. Must be called inside a Tokio runtime when
    /// builds expire.
    pub fn new(
        settings: ServiceSettings,
        registry: FeatureRegistry,
        builder: Arc<dyn Builder>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let coordinator = JobCoordinator::with_audit(settings.ttl, Arc::clone(&audit));
        Self {
            registry,
            coordinator,
            builder,
            settings,
            audit,
        }
    }

    /// Create the service from config with the given builder
    pub fn from_config(config: &Config, builder: Arc<dyn Builder>) -> BuildsrvResult<Self> {
        let registry = FeatureRegistry::from_entries(&config.features)?;
        Ok(Self::new(
            ServiceSettings::from_config(config),
            registry,
            builder,
            Arc::new(AuditLog::new(config)),
        ))
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    pub fn build_root(&self) -> &Path {
        &self.settings.build_root
    }

    /// Validate and canonicalize a request. Touches no shared state.
    pub fn resolve(&self, request: &BuildRequest) -> BuildsrvResult<BuildTarget> {
        let platform = Platform::parse(
            request.os.as_deref(),
            request.arch.as_deref(),
            request.arm.as_deref(),
            &self.settings.platforms,
        )?;
        let features = resolve_features(&self.registry, request.features.as_slice())?;
        Ok(BuildTarget::new(platform, features))
    }

    /// Get a finished build for `request`, building it if nobody else has.
    ///
    /// If the job disappears underneath us (evicted between being found
    /// and being read) the whole flow runs once more.
    pub async fn request(self: &Arc<Self>, request: &BuildRequest) -> BuildsrvResult<BuildResponse> {
        let target = self.resolve(request)?;

        match self.obtain(&target).await {
            Err(BuildsrvError::JobVanished(key)) => {
                warn!(%key, "Build vanished while serving request, retrying");
                self.obtain(&target).await
            }
            other => other,
        }
    }

    async fn obtain(self: &Arc<Self>, target: &BuildTarget) -> BuildsrvResult<BuildResponse> {
        let (job, created) = self.coordinator.get_or_start(target)?;

        let artifact = if created {
            self.spawn_build(Arc::clone(&job)).await?
        } else {
            self.wait(&job).await?
        };

        let vanished = || BuildsrvError::JobVanished(target.key.to_string());
        let file = File::open(&artifact.path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => vanished(),
            _ => BuildsrvError::io(format!("opening {}", artifact.path.display()), e),
        })?;
        match self.coordinator.get(&target.key) {
            Some(current) if current.id() == job.id() => {}
            _ => return Err(vanished()),
        }

        Ok(BuildResponse {
            job,
            artifact,
            file,
            created,
        })
    }

    /// Run the build on its own task so a requester going away does not
    /// abandon a job others may be waiting on.
    async fn spawn_build(self: &Arc<Self>, job: Arc<BuildJob>) -> BuildsrvResult<Arc<Artifact>> {
        let service = Arc::clone(self);
        let task_job = Arc::clone(&job);
        let handle = tokio::spawn(async move { service.run_job(&task_job).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let err = BuildsrvError::Internal(format!("build task aborted: {}", e));
                Err(self.abandon(&job, None, err).await)
            }
        }
    }

    async fn run_job(&self, job: &Arc<BuildJob>) -> BuildsrvResult<Arc<Artifact>> {
        let started = Instant::now();
        let platform = job.platform();
        self.audit
            .log(
                "job.created",
                &serde_json::json!({
                    "key": job.key().as_str(),
                    "job": job.id(),
                    "os": platform.os(),
                    "arch": platform.arch(),
                    "arm": platform.arm(),
                    "features": job.features().to_string(),
                }),
            )
            .await;

        let format = ArchiveFormat::for_os(platform.os(), &self.settings.zip_os);
        let workspace = match JobWorkspace::create(
            &self.settings.build_root,
            platform,
            &self.settings.binary_name,
            format,
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => return Err(self.abandon(job, None, e).await),
        };

        let produced = AssertUnwindSafe(self.produce(job, &workspace))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(BuildsrvError::Internal(format!(
                    "packaging panicked: {}",
                    panic_message(&*payload)
                )))
            });
        if let Err(e) = produced {
            return Err(self.abandon(job, Some(&workspace), e).await);
        }

        self.coordinator.mark_ready(job, workspace.into_artifact());
        let artifact = job
            .artifact()
            .ok_or_else(|| BuildsrvError::Internal(format!("job {} not ready after build", job.id())))?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(key = %job.key(), elapsed_ms, "Build finished: {}", artifact.path.display());
        self.audit
            .log(
                "job.ready",
                &serde_json::json!({
                    "key": job.key().as_str(),
                    "job": job.id(),
                    "artifact": artifact.path,
                    "expires_at": job.expires_at().map(|t| t.to_rfc3339()),
                    "elapsed_ms": elapsed_ms,
                }),
            )
            .await;

        Ok(artifact)
    }

    /// Build, package, then drop the raw binary
    async fn produce(&self, job: &BuildJob, workspace: &JobWorkspace) -> BuildsrvResult<()> {
        build_binary(
            self.builder.as_ref(),
            job.features(),
            job.platform(),
            workspace.binary_path(),
        )
        .await?;

        let mut files = self.settings.aux_files.clone();
        files.push(workspace.binary_path().to_path_buf());
        archive(
            workspace.format(),
            workspace.archive_path().to_path_buf(),
            files,
        )
        .await?;

        workspace.discard_binary().await
    }

    /// Fail the job, clean up its directory and pass the error on
    async fn abandon(
        &self,
        job: &Arc<BuildJob>,
        workspace: Option<&JobWorkspace>,
        err: BuildsrvError,
    ) -> BuildsrvError {
        error!(key = %job.key(), builder = self.builder.name(), "Build failed: {}", err);
        self.coordinator.fail(job);
        if let Some(ws) = workspace {
            ws.remove().await;
        }
        self.audit
            .log(
                "job.failed",
                &serde_json::json!({
                    "key": job.key().as_str(),
                    "job": job.id(),
                    "error": err.to_string(),
                }),
            )
            .await;
        err
    }

    async fn wait(&self, job: &BuildJob) -> BuildsrvResult<Arc<Artifact>> {
        debug!(key = %job.key(), "Waiting on in-progress build");
        match self.settings.wait_timeout {
            None => job.wait().await,
            Some(limit) => tokio::time::timeout(limit, job.wait())
                .await
                .map_err(|_| BuildsrvError::WaitTimeout(job.key().to_string()))?,
        }
    }

    /// Drop every job and remove the build root
    pub async fn shutdown(&self) -> BuildsrvResult<()> {
        self.coordinator.shutdown().await;
        remove_dir(&self.settings.build_root).await?;
        info!("Removed build root {}", self.settings.build_root.display());
        Ok(())
    }
}
