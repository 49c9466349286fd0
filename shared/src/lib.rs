//! Shared types and utilities for the package analysis services

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;

pub mod observability;
pub mod types;

pub use types::package::{Ecosystem, Package, RunPhase};
