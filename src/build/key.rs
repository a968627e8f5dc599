//! Job keys
//!
//! A job key identifies one distinct build: the normalized platform plus
//! the canonical feature set. Two requests that would produce the same
//! binary always map to the same key.

use crate::features::FeatureSet;
use crate::platform::Platform;
use sha2::{Digest, Sha256};
use std::fmt;

/// Canonical identity of a build job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey(String);

impl JobKey {
    /// Derive the key for a platform and feature set.
    ///
    /// Format: `os:arch:arm:feature,feature,...` with an empty ARM field
    /// for non-ARM targets. Inputs must already be normalized.
    pub fn new(platform: &Platform, features: &FeatureSet) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            platform.os(),
            platform.arch(),
            platform.arm().unwrap_or(""),
            features
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA256 digest of the key (first 12 hex chars)
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..6])
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to start a build: where it runs and what goes in it
#[derive(Debug, Clone)]
pub struct BuildTarget {
    pub key: JobKey,
    pub platform: Platform,
    pub features: FeatureSet,
}

impl BuildTarget {
    pub fn new(platform: Platform, features: FeatureSet) -> Self {
        Self {
            key: JobKey::new(&platform, &features),
            platform,
            features,
        }
    }
}
