//! Dynamic analysis of open-source packages.
//!
//! Each phase of a package (install, import) runs in a gVisor sandbox while
//! the sandbox's network traffic is captured. The runtime's syscall trace is
//! parsed afterwards into file, socket and command records, and sockets are
//! labelled with the hostnames DNS resolved to them.

pub mod analyzers;
pub mod capture;
pub mod config;
pub mod models;
pub mod sandbox;
pub mod strace;
pub mod utils;

pub use analyzers::{AnalysisEngine, DynamicAnalyzer};
pub use config::Config;
pub use models::{AnalysisError, AnalysisResult, IncompleteAnalysis, PhaseResults, Status};
