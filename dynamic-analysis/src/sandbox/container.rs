/// Container management for sandbox isolation
///
/// Runs package commands in podman containers backed by the gVisor runtime
/// (`runsc`). The runtime writes a syscall trace of every run to a debug log
/// that the trace parser consumes afterwards.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;

use super::{classify_exit, RunResult, Sandbox, SandboxError};

/// `%COMMAND%` is expanded by runsc to the name of the runsc subcommand that
/// writes the file; the syscall trace is written by the `boot` process.
const DEBUG_LOG_TEMPLATE: &str = "runsc.log.%COMMAND%";
const TRACE_LOG_NAME: &str = "runsc.log.boot";

/// Output of the current run. Held outside the run future so that a run
/// dropped at its deadline still leaves what it printed.
#[derive(Debug, Clone, Default)]
struct OutputBuffers {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffers {
    async fn take(&self) -> (Vec<u8>, Vec<u8>) {
        let stdout = std::mem::take(&mut *self.stdout.lock().await);
        let stderr = std::mem::take(&mut *self.stderr.lock().await);
        (stdout, stderr)
    }
}

/// Copy `pipe` into `sink` until EOF.
async fn drain<R: AsyncRead + Unpin>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.lock().await.extend_from_slice(&chunk[..n]);
    }
}

/// A podman + runsc sandbox for one image.
pub struct Container {
    config: SandboxConfig,
    image: String,
    log_path: PathBuf,
    /// Names of containers started by `run`, removed on `clean`.
    started: Vec<String>,
    output: OutputBuffers,
}

impl Container {
    pub fn new(config: SandboxConfig, image: impl Into<String>) -> Self {
        let log_path = config.log_dir.join(TRACE_LOG_NAME);
        Self {
            config,
            image: image.into(),
            log_path,
            started: Vec::new(),
            output: OutputBuffers::default(),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Arguments passed to the container engine before the command itself.
    fn run_args(&self, name: &str) -> Vec<String> {
        let debug_log = self.config.log_dir.join(DEBUG_LOG_TEMPLATE);

        let mut args = vec![
            "--cgroup-manager=cgroupfs".to_string(),
            "--events-backend=file".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--runtime=runsc".to_string(),
            format!("--runtime-flag=root={}", self.config.runsc_root.display()),
            format!("--runtime-flag=debug-log={}", debug_log.display()),
            "--runtime-flag=net-raw".to_string(),
            "--runtime-flag=strace".to_string(),
            "--runtime-flag=log-packets".to_string(),
            format!("--network={}", self.config.network),
            format!("--dns={}", self.config.dns_server),
        ];

        for volume in &self.config.volumes {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }

        for pair in &self.config.environment {
            args.push("--env".to_string());
            args.push(pair.clone());
        }

        args.push(self.image.clone());
        args
    }

    /// Delete a trace log left over from an earlier run so that it cannot be
    /// mistaken for this run's output.
    async fn remove_stale_log(&self) -> Result<(), SandboxError> {
        match tokio::fs::remove_file(&self.log_path).await {
            Ok(()) => {
                debug!("Removed stale trace log: {}", self.log_path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::StaleLog {
                path: self.log_path.clone(),
                source: e,
            }),
        }
    }

    async fn engine_output(&self, args: &[&str]) -> Result<std::process::Output, SandboxError> {
        Command::new(&self.config.runtime_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::Spawn {
                program: self.config.runtime_bin.clone(),
                source: e,
            })
    }

    /// Pull the image unless it is present locally and pulling is not forced.
    async fn pull_image_if_needed(&self) -> Result<(), SandboxError> {
        if !self.config.pull_image {
            debug!("Checking if image exists: {}", self.image);
            let check = self.engine_output(&["image", "exists", &self.image]).await?;
            if check.status.success() {
                debug!("Image already exists: {}", self.image);
                return Ok(());
            }
        }

        info!("Pulling sandbox image: {}", self.image);
        let output = self.engine_output(&["pull", &self.image]).await?;

        if !output.status.success() {
            return Err(SandboxError::Image {
                image: self.image.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Sandbox for Container {
    async fn init(&mut self) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(|e| SandboxError::LogDir {
                path: self.config.log_dir.clone(),
                source: e,
            })?;
        self.pull_image_if_needed().await
    }

    async fn run(&mut self, argv: &[String]) -> Result<RunResult, SandboxError> {
        self.remove_stale_log().await?;

        let name = format!("dynamic-analysis-{}", Uuid::new_v4());
        let mut cmd = Command::new(&self.config.runtime_bin);
        cmd.args(self.run_args(&name))
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Sandbox command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn {
            program: self.config.runtime_bin.clone(),
            source: e,
        })?;
        self.started.push(name.clone());

        let stdout_pipe = child.stdout.take().ok_or(SandboxError::MissingPipe("stdout"))?;
        let stderr_pipe = child.stderr.take().ok_or(SandboxError::MissingPipe("stderr"))?;

        self.output = OutputBuffers::default();
        let (out_read, err_read, exit) = tokio::join!(
            drain(stdout_pipe, self.output.stdout.clone()),
            drain(stderr_pipe, self.output.stderr.clone()),
            child.wait(),
        );
        out_read.map_err(SandboxError::Output)?;
        err_read.map_err(SandboxError::Output)?;
        let exit = exit.map_err(SandboxError::Output)?;
        let (stdout, stderr) = self.output.take().await;

        let status = classify_exit(exit.code(), &stderr, &self.config.benign_exit_marker);
        info!(
            container = %name,
            exit_code = ?exit.code(),
            ?status,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Sandbox command finished"
        );

        Ok(RunResult::new(status, stdout, stderr, self.log_path.clone()))
    }

    async fn partial_output(&mut self) -> (Vec<u8>, Vec<u8>) {
        self.output.take().await
    }

    async fn clean(&mut self) -> Result<(), SandboxError> {
        let mut first_error = None;

        for name in std::mem::take(&mut self.started) {
            // `--rm` usually removed it already; this catches runs that were
            // abandoned at their deadline.
            match self.engine_output(&["rm", "--force", "--ignore", &name]).await {
                Ok(output) if output.status.success() => {
                    debug!("Removed container: {}", name);
                }
                Ok(output) => {
                    let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!("Failed to remove container {}: {}", name, message);
                    first_error.get_or_insert(SandboxError::Cleanup { name, message });
                }
                Err(e) => {
                    warn!("Failed to remove container {}: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.log_path.clone()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("image", &self.image)
            .field("log_path", &self.log_path)
            .field("started", &self.started.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RunStatus;
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn test_config(log_dir: &Path) -> SandboxConfig {
        SandboxConfig {
            log_dir: log_dir.to_path_buf(),
            volumes: vec!["/srv/pkg:/local:ro".to_string()],
            environment: vec!["NODE_ENV=production".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_run_args_layout() {
        let container = Container::new(test_config(Path::new("/logs")), "img:latest");
        let args = container.run_args("sandbox-1");

        assert_eq!(args[0], "--cgroup-manager=cgroupfs");
        assert_eq!(args[2], "run");
        assert!(args.contains(&"--runtime=runsc".to_string()));
        assert!(args.contains(&"--runtime-flag=strace".to_string()));
        assert!(args.contains(&"--runtime-flag=debug-log=/logs/runsc.log.%COMMAND%".to_string()));
        assert!(args.contains(&"--network=analysis-net".to_string()));

        let volume = args.iter().position(|a| a == "--volume").unwrap();
        assert_eq!(args[volume + 1], "/srv/pkg:/local:ro");
        let env = args.iter().position(|a| a == "--env").unwrap();
        assert_eq!(args[env + 1], "NODE_ENV=production");

        // The image must come last so the package command follows it.
        assert_eq!(args.last().map(String::as_str), Some("img:latest"));
    }

    #[test]
    fn test_log_path() {
        let container = Container::new(test_config(Path::new("/logs")), "img");
        assert_eq!(container.log_path(), PathBuf::from("/logs/runsc.log.boot"));
    }

    #[tokio::test]
    async fn test_stale_log_removed() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(test_config(dir.path()), "img");
        std::fs::write(container.log_path(), "old trace").unwrap();

        container.remove_stale_log().await.unwrap();
        assert!(!container.log_path().exists());

        // Absent log is fine.
        container.remove_stale_log().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.runtime_bin = dir.path().join("no-such-engine").display().to_string();
        let mut container = Container::new(config, "img");

        let err = container.run(&["true".to_string()]).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_failure_is_a_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        // A shell rejects the engine's global flags and exits non-zero.
        config.runtime_bin = "/bin/sh".to_string();
        let mut container = Container::new(config, "img");

        let result = container.run(&["node".to_string()]).await.unwrap();
        assert_eq!(result.status(), RunStatus::Failure);
        assert!(!result.stderr().is_empty());
        assert_eq!(result.log_path(), container.log_path().as_path());
    }

    #[tokio::test]
    async fn test_output_survives_abandoned_read() {
        let buffers = OutputBuffers::default();
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"partial").await.unwrap();

        // The writer stays open, so the read never reaches EOF.
        let pending = drain(reader, buffers.stdout.clone());
        assert!(tokio::time::timeout(Duration::from_millis(50), pending).await.is_err());

        assert_eq!(buffers.take().await, (b"partial".to_vec(), Vec::new()));
        assert_eq!(buffers.take().await, (Vec::new(), Vec::new()));
    }
}
