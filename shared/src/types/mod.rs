//! Shared type definitions for the package analysis services
//!
//! - Package identity and ecosystems
//! - Run phases and the per-phase analysis command line

pub mod package;

pub use package::{Ecosystem, Package, RunPhase, UnknownEcosystem};
