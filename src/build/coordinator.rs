//! Build job coordination
//!
//! The coordinator owns the table of live jobs and is the only code that
//! mutates it. It provides singleflight semantics: for any key, exactly
//! one caller is told to build while every other caller gets the same
//! job to wait on.
//!
//! The table lock is held only for map lookups and mutations, never while
//! a build runs, so unrelated keys build in parallel and identical keys
//! queue on the job's completion gate rather than on the lock.
//!
//! ```text
//! Pending --mark_ready--> Ready --ttl elapses--> (removed)
//! Pending --fail--------> (removed)
//! ```

use crate::audit::AuditLog;
use crate::build::expiry::ExpiryQueue;
use crate::build::job::{Artifact, BuildJob};
use crate::build::key::{BuildTarget, JobKey};
use crate::build::workspace::remove_dir;
use crate::error::{BuildsrvError, BuildsrvResult};
use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<JobKey, Arc<BuildJob>>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    table: Mutex<JobTable>,
    audit: Option<Arc<AuditLog>>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only if it still maps to the job instance `id`
    fn remove_instance(&self, key: &JobKey, id: Uuid) -> Option<Arc<BuildJob>> {
        let mut table = self.table();
        match table.jobs.get(key) {
            Some(job) if job.id() == id => table.jobs.remove(key),
            _ => None,
        }
    }

    /// Drop an expired job and its backing directory. Tolerates the job
    /// having been removed already.
    async fn evict(&self, key: &JobKey, id: Uuid) {
        let Some(job) = self.remove_instance(key, id) else {
            debug!(%key, "Expired job already gone");
            return;
        };

        if let Some(artifact) = job.artifact() {
            if let Err(e) = remove_dir(&artifact.dir).await {
                warn!(%key, "Failed to remove expired build: {}", e);
            }
        }

        info!(%key, job = %id, "Build expired");
        if let Some(ref audit) = self.audit {
            audit
                .log(
                    "job.evicted",
                    &serde_json::json!({ "key": key.as_str(), "job": id }),
                )
                .await;
        }
    }
}

/// In-memory table of build jobs with singleflight and TTL eviction
#[derive(Debug)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
    ttl: Duration,
    expiry: Option<ExpiryQueue>,
}

impl JobCoordinator {
    /// Create a coordinator whose finished jobs live for `ttl`.
    ///
    /// A zero `ttl` disables expiry. With a non-zero `ttl` this spawns the
    /// eviction task and must run inside a Tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, None)
    }

    /// Like `new`, also recording evictions in `audit`
    pub fn with_audit(ttl: Duration, audit: Arc<AuditLog>) -> Self {
        Self::build(ttl, Some(audit))
    }

    fn build(ttl: Duration, audit: Option<Arc<AuditLog>>) -> Self {
        let inner = Arc::new(Inner {
            table: Mutex::new(JobTable::default()),
            audit,
        });

        let expiry = (!ttl.is_zero()).then(|| {
            let weak: Weak<Inner> = Arc::downgrade(&inner);
            ExpiryQueue::spawn(move |key, id| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.evict(&key, id).await;
                    }
                }
            })
        });

        Self { inner, ttl, expiry }
    }

    /// Configured lifetime of finished jobs (zero = forever)
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Find the job for `target.key`, or register a new pending one.
    ///
    /// Returns `(job, true)` only to the caller that created the job; that
    /// caller must build it and then call `mark_ready` or `fail`. Everyone
    /// else gets `false` and waits on the job instead. Fails with
    /// `ShuttingDown` once `shutdown` has run.
    pub fn get_or_start(&self, target: &BuildTarget) -> BuildsrvResult<(Arc<BuildJob>, bool)> {
        let mut table = self.inner.table();
        if table.closed {
            return Err(BuildsrvError::ShuttingDown);
        }

        if let Some(job) = table.jobs.get(&target.key) {
            let job = Arc::clone(job);
            drop(table);
            debug!(key = %target.key, job = %job.id(), "Joining existing build");
            return Ok((job, false));
        }

        let job = Arc::new(BuildJob::new(target.clone()));
        table.jobs.insert(target.key.clone(), Arc::clone(&job));
        drop(table);

        info!(key = %target.key, job = %job.id(), "Starting new build");
        Ok((job, true))
    }

    /// Publish a finished build.
    ///
    /// Idempotent: only the first call for a pending job has any effect,
    /// and the return value says whether this call was it. Waiters are
    /// woken, the job is (re)confirmed in the table and, if builds expire,
    /// its eviction is scheduled.
    pub fn mark_ready(&self, job: &Arc<BuildJob>, artifact: Artifact) -> bool {
        let expires_at = if self.ttl.is_zero() {
            None
        } else {
            TimeDelta::from_std(self.ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        };

        if !job.finish(artifact, expires_at) {
            debug!(key = %job.key(), "Job already finalized");
            return false;
        }

        {
            let mut table = self.inner.table();
            if table.closed {
                debug!(key = %job.key(), "Coordinator closed, not publishing job");
                return true;
            }
            table
                .jobs
                .entry(job.key().clone())
                .or_insert_with(|| Arc::clone(job));
        }

        if let Some(ref expiry) = self.expiry {
            expiry.schedule(job.key().clone(), job.id(), self.ttl);
        }

        info!(key = %job.key(), job = %job.id(), "Build ready");
        true
    }

    /// Record a failed build: wake waiters with a failure and drop the job
    /// so the next request for the key starts over.
    ///
    /// Returns false if the job had already been finalized. The caller
    /// owns the job's backing directory and is responsible for removing it.
    pub fn fail(&self, job: &Arc<BuildJob>) -> bool {
        if !job.fail() {
            return false;
        }
        self.inner.remove_instance(job.key(), job.id());
        warn!(key = %job.key(), job = %job.id(), "Build failed, job removed");
        true
    }

    /// Remove whatever job is registered under `key`
    pub fn remove(&self, key: &JobKey) -> Option<Arc<BuildJob>> {
        self.inner.table().jobs.remove(key)
    }

    /// Look up the job registered under `key`
    pub fn get(&self, key: &JobKey) -> Option<Arc<BuildJob>> {
        self.inner.table().jobs.get(key).cloned()
    }

    /// The artifact of the ready job whose archive lives at `path`
    pub fn find_artifact(&self, path: &Path) -> Option<Arc<Artifact>> {
        self.inner
            .table()
            .jobs
            .values()
            .filter_map(|job| job.artifact())
            .find(|artifact| artifact.path == path)
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.inner.table().jobs.contains_key(key)
    }

    /// Number of jobs in the table, pending or ready
    pub fn len(&self) -> usize {
        self.inner.table().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every job and delete the artifacts of finished ones.
    ///
    /// Afterwards the table stays empty; builds finishing later still wake
    /// their waiters but are not published. Returns the number of jobs
    /// dropped.
    pub async fn shutdown(&self) -> usize {
        let jobs: Vec<Arc<BuildJob>> = {
            let mut table = self.inner.table();
            table.closed = true;
            table.jobs.drain().map(|(_, job)| job).collect()
        };

        for job in &jobs {
            if let Some(artifact) = job.artifact() {
                if let Err(e) = remove_dir(&artifact.dir).await {
                    warn!(key = %job.key(), "Failed to remove build: {}", e);
                }
            }
        }

        info!("Dropped {} build jobs", jobs.len());
        jobs.len()
    }
}
