//! Build job records
//!
//! A `BuildJob` is shared (via `Arc`) between the coordinator's table, the
//! request that owns the build and every request waiting on it. Its state
//! lives in a watch channel that doubles as the completion gate: the
//! single transition out of `Pending` wakes all waiters, and anyone who
//! subscribes later observes the final state without blocking.

use crate::archive::ArchiveFormat;
use crate::build::key::{BuildTarget, JobKey};
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::features::FeatureSet;
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// A finished, downloadable build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Backing directory owned by the job; removed on eviction
    pub dir: PathBuf,
    /// The packaged archive
    pub path: PathBuf,
    /// Suggested download file name
    pub display_name: String,
    pub format: ArchiveFormat,
}

/// Lifecycle state of a job
#[derive(Debug, Clone)]
pub enum JobState {
    /// Build in progress
    Pending,
    /// Artifact available
    Ready {
        artifact: Arc<Artifact>,
        /// `None` when builds never expire
        expires_at: Option<DateTime<Utc>>,
    },
    /// Build or packaging failed; the job has been dropped from the table
    Failed,
}

impl JobState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready { .. } => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One distinct (platform, feature set) build
#[derive(Debug)]
pub struct BuildJob {
    id: Uuid,
    target: BuildTarget,
    created_at: DateTime<Utc>,
    state: watch::Sender<JobState>,
}

impl BuildJob {
    /// Create a job in the `Pending` state
    pub fn new(target: BuildTarget) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            id: Uuid::new_v4(),
            target,
            created_at: Utc::now(),
            state,
        }
    }

    /// Unique id of this job instance; a key re-created after removal
    /// gets a new id
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &JobKey {
        &self.target.key
    }

    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn platform(&self) -> &Platform {
        &self.target.platform
    }

    pub fn features(&self) -> &FeatureSet {
        &self.target.features
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of the current state
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), JobState::Ready { .. })
    }

    /// The artifact, once the job is ready
    pub fn artifact(&self) -> Option<Arc<Artifact>> {
        match &*self.state.borrow() {
            JobState::Ready { artifact, .. } => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    /// Expiration time, if the job is ready and builds expire
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &*self.state.borrow() {
            JobState::Ready { expires_at, .. } => *expires_at,
            _ => None,
        }
    }

    /// Transition `Pending -> Ready` and open the gate.
    ///
    /// Returns false (and changes nothing) if the job already left
    /// `Pending`.
    pub(crate) fn finish(&self, artifact: Artifact, expires_at: Option<DateTime<Utc>>) -> bool {
        let artifact = Arc::new(artifact);
        self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = JobState::Ready {
                artifact,
                expires_at,
            };
            true
        })
    }

    /// Transition `Pending -> Failed` and open the gate.
    ///
    /// Returns false if the job already left `Pending`.
    pub(crate) fn fail(&self) -> bool {
        self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = JobState::Failed;
            true
        })
    }

    /// Wait until the job leaves `Pending`.
    ///
    /// Returns immediately if it already has. A failed job yields
    /// `JobFailed`.
    pub async fn wait(&self) -> BuildsrvResult<Arc<Artifact>> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !state.is_pending())
            .await
            .map(|state| state.clone())
            .map_err(|_| BuildsrvError::Internal(format!("job {} state channel closed", self.id)))?;

        match state {
            JobState::Ready { artifact, .. } => Ok(artifact),
            _ => Err(BuildsrvError::JobFailed(self.key().to_string())),
        }
    }
}
