//! Delayed eviction
//!
//! One background task per coordinator holds every pending expiry in a
//! min-heap ordered by deadline and fires them in order. Each entry names
//! the job instance (key + id) it was scheduled for, so firing it after
//! the key was removed or re-created is harmless.

use crate::build::key::JobKey;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    deadline: Instant,
    key: JobKey,
    job_id: Uuid,
}

/// Handle for scheduling evictions on the background task.
///
/// Dropping the handle stops the task; anything still scheduled is
/// discarded.
#[derive(Debug)]
pub struct ExpiryQueue {
    tx: mpsc::UnboundedSender<Scheduled>,
}

impl ExpiryQueue {
    /// Spawn the scheduler task. Must be called inside a Tokio runtime.
    pub fn spawn<F, Fut>(on_expire: F) -> Self
    where
        F: Fn(JobKey, Uuid) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, on_expire));
        Self { tx }
    }

    /// Fire `on_expire(key, job_id)` once `after` has elapsed.
    ///
    /// Returns false if the delay is too large to represent or the task
    /// has stopped; either way the job simply never expires.
    pub fn schedule(&self, key: JobKey, job_id: Uuid, after: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(after) else {
            debug!(%key, "Expiry delay out of range, not scheduling");
            return false;
        };
        self.tx
            .send(Scheduled {
                deadline,
                key,
                job_id,
            })
            .is_ok()
    }
}

async fn run<F, Fut>(mut rx: mpsc::UnboundedReceiver<Scheduled>, on_expire: F)
where
    F: Fn(JobKey, Uuid) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut heap: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();

    loop {
        let next = heap.peek().map(|Reverse(s)| s.deadline);

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(scheduled) => {
                    trace!(key = %scheduled.key, "Expiry scheduled");
                    heap.push(Reverse(scheduled));
                }
                None => break,
            },
            _ = sleep_until(next), if next.is_some() => {
                let now = Instant::now();
                while heap.peek().is_some_and(|Reverse(s)| s.deadline <= now) {
                    if let Some(Reverse(due)) = heap.pop() {
                        on_expire(due.key, due.job_id).await;
                    }
                }
            }
        }
    }

    debug!("Expiry scheduler stopped with {} pending entries", heap.len());
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
