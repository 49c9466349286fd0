/// Configuration module for the dynamic analysis runner
///
/// This module provides centralized configuration management with support for:
/// - Environment variable loading (including a `.env` file)
/// - Default values
/// - Configuration validation
/// - Sandbox, packet capture and logging sections

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::observability::{LogConfig, LogFormat, LogLevel};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Bridge interface the sandbox network is attached to.
pub const DEFAULT_CAPTURE_INTERFACE: &str = "cni-analysis";

/// Stderr text printed by the runtime when the sandbox is torn down while
/// the container process is already gone. The exit is non-zero but the
/// package ran to completion.
pub const DEFAULT_BENIGN_EXIT_MARKER: &str = "sandbox is not running";

/// Main configuration structure for the dynamic analysis runner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            sandbox: SandboxConfig::from_env()?,
            capture: CaptureConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()?;
        self.capture.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Sandbox runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container engine binary driving the gVisor runtime
    pub runtime_bin: String,
    pub runsc_root: PathBuf,
    /// Directory receiving the runtime's debug logs, including the trace log
    pub log_dir: PathBuf,
    pub network: String,
    pub dns_server: String,
    /// Overrides the ecosystem's default image
    pub image: Option<String>,
    pub pull_image: bool,
    pub benign_exit_marker: String,
    pub phase_timeout_seconds: u64,
    /// `host:container[:options]` mounts
    pub volumes: Vec<String>,
    /// `KEY=VALUE` pairs passed into the container
    pub environment: Vec<String>,
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            runtime_bin: env::var("SANDBOX_RUNTIME_BIN").unwrap_or(defaults.runtime_bin),
            runsc_root: env::var("SANDBOX_RUNSC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.runsc_root),
            log_dir: env::var("SANDBOX_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            network: env::var("SANDBOX_NETWORK").unwrap_or(defaults.network),
            dns_server: env::var("SANDBOX_DNS_SERVER").unwrap_or(defaults.dns_server),
            image: env::var("SANDBOX_IMAGE").ok().filter(|s| !s.trim().is_empty()),
            pull_image: env_or("SANDBOX_PULL_IMAGE", defaults.pull_image)?,
            benign_exit_marker: env::var("SANDBOX_BENIGN_EXIT_MARKER")
                .unwrap_or(defaults.benign_exit_marker),
            phase_timeout_seconds: env_or(
                "SANDBOX_PHASE_TIMEOUT_SECS",
                defaults.phase_timeout_seconds,
            )?,
            volumes: env_list("SANDBOX_VOLUMES"),
            environment: env_list("SANDBOX_ENV"),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime_bin.trim().is_empty() {
            anyhow::bail!("Sandbox runtime binary cannot be empty");
        }
        if self.phase_timeout_seconds == 0 {
            anyhow::bail!("Sandbox phase timeout must be greater than 0");
        }
        if self.network.trim().is_empty() {
            anyhow::bail!("Sandbox network cannot be empty");
        }
        for volume in &self.volumes {
            if !volume.contains(':') {
                anyhow::bail!("Invalid sandbox volume (expected host:container): {}", volume);
            }
        }
        for pair in &self.environment {
            if !pair.contains('=') {
                anyhow::bail!("Invalid sandbox environment entry (expected KEY=VALUE): {}", pair);
            }
        }
        Ok(())
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_bin: "podman".to_string(),
            runsc_root: PathBuf::from("/var/run/runsc"),
            log_dir: PathBuf::from("/tmp/dynamic-analysis"),
            network: "analysis-net".to_string(),
            dns_server: "8.8.8.8".to_string(),
            image: None,
            pull_image: false,
            benign_exit_marker: DEFAULT_BENIGN_EXIT_MARKER.to_string(),
            phase_timeout_seconds: 600,
            volumes: Vec::new(),
            environment: Vec::new(),
        }
    }
}

/// Packet capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Set to false to run without capture; DNS correlation is then empty
    pub enabled: bool,
    pub interface: String,
    pub snaplen: i32,
    /// How long a blocking read waits before the loop re-checks for shutdown
    pub read_timeout_ms: i32,
    pub queue_capacity: usize,
    pub promiscuous: bool,
}

impl CaptureConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            enabled: env_or("CAPTURE_ENABLED", defaults.enabled)?,
            interface: env::var("CAPTURE_INTERFACE").unwrap_or(defaults.interface),
            snaplen: env_or("CAPTURE_SNAPLEN", defaults.snaplen)?,
            read_timeout_ms: env_or("CAPTURE_READ_TIMEOUT_MS", defaults.read_timeout_ms)?,
            queue_capacity: env_or("CAPTURE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            promiscuous: env_or("CAPTURE_PROMISCUOUS", defaults.promiscuous)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            anyhow::bail!("Capture interface cannot be empty");
        }
        if self.snaplen <= 0 {
            anyhow::bail!("Capture snaplen must be positive");
        }
        if self.read_timeout_ms <= 0 {
            anyhow::bail!("Capture read timeout must be positive");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("Capture queue capacity must be at least 1");
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: DEFAULT_CAPTURE_INTERFACE.to_string(),
            snaplen: 65535,
            read_timeout_ms: 250,
            queue_capacity: 4096,
            promiscuous: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            level: env::var("LOG_LEVEL").unwrap_or(defaults.level),
            format: env::var("LOG_FORMAT").unwrap_or(defaults.format),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.to_log_config("validation").map(|_| ())
    }

    /// Build the subscriber settings for `service_name`.
    pub fn to_log_config(&self, service_name: &str) -> Result<LogConfig> {
        let level: LogLevel = self.level.parse().context("Invalid LOG_LEVEL")?;
        let format: LogFormat = self.format.parse().context("Invalid LOG_FORMAT")?;

        Ok(LogConfig {
            level,
            format,
            service_name: service_name.to_string(),
            include_line_numbers: format != LogFormat::Json,
            include_thread_ids: format == LogFormat::Json,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
