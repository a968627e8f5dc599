//! buildsrv - on-demand custom build server
//!
//! Builds a binary for a requested platform and feature set, archives it,
//! and shares the result with every concurrent and later request for the
//! same combination until it expires.

pub mod archive;
pub mod audit;
pub mod build;
pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod platform;
pub mod server;
pub mod service;

pub use error::{BuildsrvError, BuildsrvResult};
