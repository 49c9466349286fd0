use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::RunPhase;

use crate::sandbox::RunStatus;

/// Terminal status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The phase ran to completion; later phases may run.
    Completed,
    /// The package's command exited non-zero.
    ErrorAnalysis,
    /// The phase exceeded its deadline.
    ErrorTimeout,
    /// The run ended in a state that could not be classified.
    ErrorOther,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Completed => "completed",
            Status::ErrorAnalysis => "error_analysis",
            Status::ErrorTimeout => "error_timeout",
            Status::ErrorOther => "error_other",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Status::Completed)
    }
}

impl From<RunStatus> for Status {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Status::Completed,
            RunStatus::Failure => Status::ErrorAnalysis,
            RunStatus::Timeout => Status::ErrorTimeout,
            RunStatus::Unknown => Status::ErrorOther,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccessRecord {
    pub path: String,
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl FileAccessRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// OR-combine the access flags of another observation of the same path.
    pub fn merge(&mut self, read: bool, write: bool, delete: bool) {
        self.read |= read;
        self.write |= write;
        self.delete |= delete;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRecord {
    pub address: String,
    pub port: u16,
    /// Hostnames whose DNS answers resolved to `address` during the phase.
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandRecord {
    pub argv: Vec<String>,
    pub env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuestionRecord {
    pub class: String,
    pub name: String,
    pub types: Vec<String>,
}

/// Everything observed while running one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub phase: RunPhase,
    pub status: Status,
    pub files: Vec<FileAccessRecord>,
    pub sockets: Vec<SocketRecord>,
    pub commands: Vec<CommandRecord>,
    pub dns: Vec<DnsQuestionRecord>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn file(&self, path: &str) -> Option<&FileAccessRecord> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn socket(&self, address: &str, port: u16) -> Option<&SocketRecord> {
        self.sockets
            .iter()
            .find(|s| s.address == address && s.port == port)
    }
}

/// Per-phase results of a package run, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseResults {
    pub results: BTreeMap<RunPhase, AnalysisResult>,
    /// The last phase that was attempted, whether or not it produced a result.
    pub last_phase: Option<RunPhase>,
    /// Status of `last_phase`; `None` when no phase was attempted.
    pub status: Option<Status>,
}

impl PhaseResults {
    pub fn get(&self, phase: RunPhase) -> Option<&AnalysisResult> {
        self.results.get(&phase)
    }

    pub fn is_complete(&self) -> bool {
        self.status.map(|s| s.is_completed()).unwrap_or(false)
    }
}
