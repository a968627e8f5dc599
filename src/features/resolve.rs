//! Feature resolution
//!
//! Turns a raw client feature list into a canonical `FeatureSet`:
//! every name validated against the registry, required features added,
//! duplicates dropped, and everything put in registry order.

use crate::error::{BuildsrvError, BuildsrvResult};
use crate::features::registry::{Feature, FeatureRegistry};
use std::fmt;

/// Canonical, registry-ordered set of features for one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    /// Feature names in canonical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    /// Plugin packages the builder must inject
    pub fn packages(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.is_addon())
            .map(|f| f.package.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Comma-separated names; identical sets always render identically.
impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.names().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Resolve requested feature names against the registry.
///
/// Fails on the first name (in request order) the registry doesn't know.
/// Request order and duplicates have no effect on the result.
pub fn resolve_features<S: AsRef<str>>(
    registry: &FeatureRegistry,
    requested: &[S],
) -> BuildsrvResult<FeatureSet> {
    if let Some(unknown) = requested
        .iter()
        .map(AsRef::<str>::as_ref)
        .find(|name| !registry.contains(name))
    {
        return Err(BuildsrvError::UnknownFeature(unknown.to_string()));
    }

    let features = registry
        .iter()
        .filter(|f| f.required || requested.iter().any(|r| r.as_ref() == f.name))
        .cloned()
        .collect();

    Ok(FeatureSet { features })
}
