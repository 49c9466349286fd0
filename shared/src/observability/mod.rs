//! Observability utilities
//!
//! Provides centralized logging setup for all services

pub mod logging;

pub use logging::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("Unknown log level: {0}")]
    InvalidLevel(String),

    #[error("Unknown log format: {0}")]
    InvalidFormat(String),
}

pub type ObservabilityResult<T> = Result<T, ObservabilityError>;
