//! Build features
//!
//! A feature is an optional component compiled into a custom build.
//! The registry lists every known feature in a fixed order; resolution
//! validates a client's request against it and produces the canonical
//! feature set used for job keys.

pub mod registry;
pub mod resolve;

pub use registry::{Feature, FeatureRegistry};
pub use resolve::{resolve_features, FeatureSet};
