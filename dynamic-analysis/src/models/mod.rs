pub mod analysis_result;

// Re-export commonly used types for convenience
pub use analysis_result::{
    AnalysisResult,
    CommandRecord,
    DnsQuestionRecord,
    FileAccessRecord,
    PhaseResults,
    SocketRecord,
    Status,
};

use shared::RunPhase;
use thiserror::Error;

use crate::capture::CaptureError;
use crate::sandbox::SandboxError;

/// Infrastructure failures. A package misbehaving is never one of these; it
/// is reported through [`Status`] instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("Packet capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Failed to read trace log {path}: {source}")]
    TraceLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Trace parser task failed: {0}")]
    ParserTask(String),
}

/// An infrastructure error that stopped the run, with whatever was gathered
/// before it.
#[derive(Debug, Error)]
#[error("analysis stopped before completion: {source}")]
pub struct IncompleteAnalysis {
    /// Phase that was running when the error occurred; `None` if it happened
    /// while preparing the sandbox.
    pub phase: Option<RunPhase>,
    pub partial: PhaseResults,
    #[source]
    pub source: AnalysisError,
}
