//! Feature registry
//!
//! The registry is the ordered list of every feature a build may include.
//! Registry order is significant: it is the order features are handed to
//! the builder and the order used for canonical job keys.

use crate::error::{BuildsrvError, BuildsrvResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A registered feature (directive + the plugin package providing it)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Identifier clients use to request the feature
    #[serde(alias = "directive")]
    pub name: String,

    /// Plugin package; empty for features built into the base source
    #[serde(default)]
    pub package: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Always included, whether requested or not
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl Feature {
    fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            package: String::new(),
            description: String::new(),
            required: false,
        }
    }

    fn addon(name: &str, package: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            package: package.to_string(),
            description: description.to_string(),
            required: false,
        }
    }

    /// Whether this feature comes from an external plugin package
    pub fn is_addon(&self) -> bool {
        !self.package.is_empty()
    }
}

/// Ordered, validated set of known features
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: Vec<Feature>,
}

impl FeatureRegistry {
    /// Create a registry from an ordered list of features.
    ///
    /// Names must be unique, non-empty and free of the separators used in
    /// job keys (`,` and `:`).
    pub fn new(features: Vec<Feature>) -> BuildsrvResult<Self> {
        let mut seen = HashSet::new();
        for feature in &features {
            let name = feature.name.as_str();
            if name.is_empty() {
                return Err(BuildsrvError::InvalidRegistry(
                    "feature name cannot be empty".to_string(),
                ));
            }
            if name.contains([',', ':']) || name.chars().any(char::is_whitespace) {
                return Err(BuildsrvError::InvalidRegistry(format!(
                    "feature name '{}' must not contain ',', ':' or whitespace",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(BuildsrvError::InvalidRegistry(format!(
                    "feature '{}' registered twice",
                    name
                )));
            }
        }
        Ok(Self { features })
    }

    /// Registry from config entries, or the built-in registry if none are given
    pub fn from_entries(entries: &[Feature]) -> BuildsrvResult<Self> {
        if entries.is_empty() {
            Ok(Self::builtin())
        } else {
            Self::new(entries.to_vec())
        }
    }

    /// The default registry of web server directives and add-on plugins
    pub fn builtin() -> Self {
        let features = vec![
            // Directives that initialize vital configuration settings
            Feature::builtin("root"),
            Feature::builtin("tls"),
            Feature::builtin("bind"),
            // Directives that don't create HTTP handlers
            Feature::builtin("startup"),
            Feature::builtin("shutdown"),
            Feature::addon(
                "git",
                "github.com/abiosoft/caddy-git",
                "Deploy your site with git push.",
            ),
            // Directives that inject handlers
            Feature::builtin("log"),
            Feature::builtin("gzip"),
            Feature::builtin("errors"),
            Feature::builtin("header"),
            Feature::addon(
                "ipfilter",
                "github.com/pyed/ipfilter",
                "Block or allow clients based on IP origin.",
            ),
            Feature::builtin("rewrite"),
            Feature::builtin("redir"),
            Feature::builtin("ext"),
            Feature::builtin("basicauth"),
            Feature::builtin("internal"),
            Feature::builtin("proxy"),
            Feature::builtin("fastcgi"),
            Feature::builtin("websocket"),
            Feature::builtin("markdown"),
            Feature::builtin("templates"),
            Feature::builtin("browse"),
        ];
        Self { features }
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a feature by name
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// All features in registry order
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Features provided by external plugin packages
    pub fn addons(&self) -> Vec<&Feature> {
        self.features.iter().filter(|f| f.is_addon()).collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
