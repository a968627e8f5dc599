//! Build job coordination
//!
//! Turns a canonical (platform, feature set) target into a job key and
//! guarantees at most one in-flight build per key, shared by every
//! concurrent requester, with finished builds reclaimed after a TTL.
//!
//! # Job States
//!
//! | State | In table | Description |
//! |-------|----------|-------------|
//! | Pending | yes | Build in progress, requesters wait on it |
//! | Ready | yes | Artifact on disk until evicted |
//! | Failed | no | Dropped so the next request retries |

pub mod coordinator;
pub mod expiry;
pub mod job;
pub mod key;
pub mod workspace;

pub use coordinator::JobCoordinator;
pub use job::{Artifact, BuildJob, JobState};
pub use key::{BuildTarget, JobKey};
pub use workspace::JobWorkspace;
