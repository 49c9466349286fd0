/// Dynamic analyzer for a single phase
///
/// Runs one package command in the sandbox while capturing the sandbox's
/// network traffic, then turns the syscall trace and DNS view into an
/// [`AnalysisResult`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shared::RunPhase;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::capture::{default_backend, CaptureBackend, DnsAnalyzer, PacketCapture};
use crate::config::{CaptureConfig, Config};
use crate::models::{AnalysisError, AnalysisResult};
use crate::sandbox::{RunResult, RunStatus, Sandbox};
use crate::strace::{self, StraceResult};

use super::report::build_result;

pub struct DynamicAnalyzer {
    capture: CaptureConfig,
    backend: Arc<dyn CaptureBackend>,
    phase_timeout: Duration,
}

impl DynamicAnalyzer {
    pub fn new(
        capture: CaptureConfig,
        backend: Arc<dyn CaptureBackend>,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            capture,
            backend,
            phase_timeout,
        }
    }

    /// Analyzer using the capture backend compiled into this build.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.capture.clone(),
            default_backend(&config.capture),
            config.sandbox.phase_timeout(),
        )
    }

    /// Run `argv` for `phase` and collect what it did.
    ///
    /// Package misbehaviour (non-zero exit, deadline) is reported through the
    /// result's status; only infrastructure failures are errors.
    pub async fn run_phase<S>(
        &self,
        sandbox: &mut S,
        phase: RunPhase,
        argv: &[String],
    ) -> Result<AnalysisResult, AnalysisError>
    where
        S: Sandbox + ?Sized,
    {
        let started_at = Utc::now();

        let mut capture = PacketCapture::new(self.capture.interface.clone(), self.backend.clone())
            .with_queue_capacity(self.capture.queue_capacity);
        let dns = capture.register_handler(DnsAnalyzer::new());
        capture.start()?;

        debug!(%phase, ?argv, "Running phase command");
        let outcome = timeout(self.phase_timeout, sandbox.run(argv)).await;
        capture.close().await;

        let run = match outcome {
            Ok(run) => run?,
            Err(_) => {
                warn!(%phase, timeout = ?self.phase_timeout, "Phase exceeded its deadline");
                let (stdout, stderr) = sandbox.partial_output().await;
                RunResult::timed_out(stdout, stderr, sandbox.log_path())
            }
        };

        let trace = parse_trace(&run).await?;
        let finished_at = Utc::now();

        let dns = dns.lock().await;
        let result = build_result(phase, &run, trace, &dns, started_at, finished_at);

        info!(
            %phase,
            status = %result.status,
            files = result.files.len(),
            sockets = result.sockets.len(),
            commands = result.commands.len(),
            dns_questions = result.dns.len(),
            "Phase finished"
        );

        Ok(result)
    }
}

/// Parse the run's trace log off the async runtime.
///
/// A run abandoned at its deadline may not have produced a log yet; that is
/// an empty trace rather than an error.
async fn parse_trace(run: &RunResult) -> Result<StraceResult, AnalysisError> {
    let path = run.log_path().display().to_string();

    let reader = match run.log() {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && run.status() == RunStatus::Timeout => {
            warn!(log = %path, "No trace log after timeout");
            return Ok(StraceResult::default());
        }
        Err(e) => return Err(AnalysisError::TraceLog { path, source: e }),
    };

    tokio::task::spawn_blocking(move || strace::parse(reader))
        .await
        .map_err(|e| AnalysisError::ParserTask(e.to_string()))?
        .map_err(|e| AnalysisError::TraceLog { path, source: e })
}

impl std::fmt::Debug for DynamicAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicAnalyzer")
            .field("interface", &self.capture.interface)
            .field("phase_timeout", &self.phase_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::backend::testing::{FailingBackend, ReplayBackend};
    use crate::models::Status;
    use crate::sandbox::SandboxError;
    use async_trait::async_trait;
    use std::path::PathBuf;

    /// Sandbox whose command prints a line and then never finishes.
    struct StuckSandbox {
        log_path: PathBuf,
        printed: Vec<u8>,
    }

    impl StuckSandbox {
        fn new(log_path: PathBuf) -> Self {
            Self {
                log_path,
                printed: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Sandbox for StuckSandbox {
        async fn init(&mut self) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn run(&mut self, _argv: &[String]) -> Result<RunResult, SandboxError> {
            self.printed.extend_from_slice(b"fetching metadata\n");
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(RunResult::new(RunStatus::Success, Vec::new(), Vec::new(), self.log_path.clone()))
        }

        async fn clean(&mut self) -> Result<(), SandboxError> {
            Ok(())
        }

        fn log_path(&self) -> PathBuf {
            self.log_path.clone()
        }

        async fn partial_output(&mut self) -> (Vec<u8>, Vec<u8>) {
            (std::mem::take(&mut self.printed), Vec::new())
        }
    }

    fn analyzer(backend: Arc<dyn CaptureBackend>, phase_timeout: Duration) -> DynamicAnalyzer {
        DynamicAnalyzer::new(CaptureConfig::default(), backend, phase_timeout)
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut sandbox = StuckSandbox::new(dir.path().join("runsc.log.boot"));
        let analyzer = analyzer(ReplayBackend::new(Vec::new()), Duration::from_millis(50));

        let result = analyzer
            .run_phase(&mut sandbox, RunPhase::Install, &["install".to_string()])
            .await
            .unwrap();
        assert_eq!(result.status, Status::ErrorTimeout);
        assert!(result.files.is_empty());
        assert_eq!(result.stdout_bytes, "fetching metadata\n".len());
    }

    #[tokio::test]
    async fn test_partial_log_parsed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("runsc.log.boot");
        std::fs::write(
            &log_path,
            "I0210 01:30:25.117613 1 strace.go:651] [   2:   2] node X stat(0x7f00 /app/package.json, 0x7f10 {dev=1}) = 0 (0x0) (3µs)\n",
        )
        .unwrap();
        let mut sandbox = StuckSandbox::new(log_path);
        let analyzer = analyzer(ReplayBackend::new(Vec::new()), Duration::from_millis(50));

        let result = analyzer
            .run_phase(&mut sandbox, RunPhase::Import, &["import".to_string()])
            .await
            .unwrap();
        assert_eq!(result.status, Status::ErrorTimeout);
        assert!(result.file("/app/package.json").unwrap().read);
    }

    #[tokio::test]
    async fn test_capture_activation_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sandbox = StuckSandbox::new(dir.path().join("runsc.log.boot"));
        let analyzer = analyzer(Arc::new(FailingBackend), Duration::from_millis(50));

        let err = analyzer
            .run_phase(&mut sandbox, RunPhase::Install, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Capture(_)));
    }

    #[tokio::test]
    async fn test_missing_log_after_normal_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunResult::new(
            RunStatus::Success,
            Vec::new(),
            Vec::new(),
            dir.path().join("runsc.log.boot"),
        );
        assert!(matches!(
            parse_trace(&run).await,
            Err(AnalysisError::TraceLog { .. })
        ));
    }
}
