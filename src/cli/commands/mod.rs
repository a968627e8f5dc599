//! CLI command implementations

pub mod config;
pub mod features;
pub mod serve;

pub use config::execute as config;
pub use features::execute as features;
pub use serve::execute as serve;
