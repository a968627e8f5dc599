//! Builder abstraction
//!
//! The builder is the external engine that compiles a binary with a given
//! feature set for a given platform. The rest of the service treats it as
//! opaque: any error means "build failed".

mod command;

pub use command::CommandBuilder;

use crate::error::{BuildsrvError, BuildsrvResult};
use crate::features::FeatureSet;
use crate::platform::Platform;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Abstract build engine
#[async_trait]
pub trait Builder: Send + Sync {
    /// Set up an environment that builds with `features` included
    async fn prepare(&self, features: &FeatureSet) -> BuildsrvResult<Box<dyn PreparedBuild>>;

    /// Human-readable builder name for logs
    fn name(&self) -> &'static str;
}

/// A prepared build environment
///
/// `teardown` must be called exactly once, whether or not `build_for`
/// succeeded.
#[async_trait]
pub trait PreparedBuild: Send + Sync {
    /// Compile for `platform`, writing the binary to `output`
    async fn build_for(&self, platform: &Platform, output: &Path) -> BuildsrvResult<()>;

    /// Release whatever `prepare` allocated
    async fn teardown(&self);
}

/// Prepare, build and tear down in one go.
///
/// Teardown runs on every path once preparation succeeded, including a
/// panic inside `build_for`, which is reported as a failed build.
pub async fn build_binary(
    builder: &dyn Builder,
    features: &FeatureSet,
    platform: &Platform,
    output: &Path,
) -> BuildsrvResult<()> {
    let prepared = builder.prepare(features).await?;
    let result = AssertUnwindSafe(prepared.build_for(platform, output))
        .catch_unwind()
        .await;
    prepared.teardown().await;

    result.unwrap_or_else(|payload| {
        Err(BuildsrvError::BuildFailed {
            target: platform.to_string(),
            output: format!("builder panicked: {}", panic_message(&*payload)),
        })
    })
}

/// Text of a panic payload, when it carries one
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PlatformsConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        prepared: AtomicUsize,
        torn_down: AtomicUsize,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Outcome {
        Succeed,
        Fail,
        Panic,
    }

    struct FlakyBuilder {
        counters: Arc<Counters>,
        outcome: Outcome,
    }

    struct FlakyBuild {
        counters: Arc<Counters>,
        outcome: Outcome,
    }

    #[async_trait]
    impl Builder for FlakyBuilder {
        async fn prepare(&self, _features: &FeatureSet) -> BuildsrvResult<Box<dyn PreparedBuild>> {
            self.counters.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakyBuild {
                counters: Arc::clone(&self.counters),
                outcome: self.outcome,
            }))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[async_trait]
    impl PreparedBuild for FlakyBuild {
        async fn build_for(&self, platform: &Platform, _output: &Path) -> BuildsrvResult<()> {
            match self.outcome {
                Outcome::Succeed => Ok(()),
                Outcome::Fail => Err(BuildsrvError::BuildFailed {
                    target: platform.to_string(),
                    output: "boom".to_string(),
                }),
                Outcome::Panic => panic!("builder blew up"),
            }
        }

        async fn teardown(&self) {
            self.counters.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn platform() -> Platform {
        Platform::parse(Some("linux"), Some("amd64"), None, &PlatformsConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn teardown_runs_on_success_and_failure() {
        for outcome in [Outcome::Succeed, Outcome::Fail, Outcome::Panic] {
            let counters = Arc::new(Counters::default());
            let builder = FlakyBuilder {
                counters: Arc::clone(&counters),
                outcome,
            };

            let result = build_binary(
                &builder,
                &FeatureSet::default(),
                &platform(),
                Path::new("/nonexistent/caddy"),
            )
            .await;

            assert_eq!(result.is_err(), outcome != Outcome::Succeed);
            assert_eq!(counters.prepared.load(Ordering::SeqCst), 1);
            assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn panic_becomes_build_failure() {
        let builder = FlakyBuilder {
            counters: Arc::new(Counters::default()),
            outcome: Outcome::Panic,
        };

        let err = build_binary(
            &builder,
            &FeatureSet::default(),
            &platform(),
            Path::new("/nonexistent/caddy"),
        )
        .await
        .unwrap_err();

        match err {
            BuildsrvError::BuildFailed { output, .. } => {
                assert_eq!(output, "builder panicked: builder blew up")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_output_keeps_tail() {
        let stdout: String = (0..40).map(|i| format!("out {}\n", i)).collect();
        let stderr: String = (0..40).map(|i| format!("err {}\n", i)).collect();

        let tail = build_error_output(&stdout, &stderr);
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), BUILD_ERROR_TAIL_LINES);
        assert_eq!(lines.first(), Some(&"out 30"));
        assert_eq!(lines.last(), Some(&"err 39"));
    }

    #[test]
    fn error_output_short() {
        assert_eq!(build_error_output("a\n", "b\n"), "a\nb");
    }
}
