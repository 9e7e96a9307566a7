//! `snapd` process supervisor.
//!
//! Starts the daemon with piped output and watches both streams on background
//! tasks. A line containing [`READY_MARKER`] marks the daemon ready; lines logged
//! at `error`, `fatal` or `panic` level are collected so a test can assert that
//! the daemon ran clean.

use super::Binary;
use crate::config::SnapdConfig;
use crate::error::{HarnessError, HarnessResult};
use regex::Regex;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Log line snapd prints once its REST API is serving.
pub const READY_MARKER: &str = "snapd started";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"level=(?:"?)(?:error|fatal|panic)\b"#).expect("Invalid error line regex")
});

/// Command-line settings for the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapdOptions {
    /// `--plugin-trust`
    pub plugin_trust: u8,
    /// `--log-level`
    pub log_level: u8,
    /// `--api-port`, omitted when `None`
    pub api_port: Option<u16>,
    /// Appended verbatim
    pub extra_args: Vec<String>,
}

impl Default for SnapdOptions {
    fn default() -> Self {
        Self::from_config(&SnapdConfig::default())
    }
}

impl SnapdOptions {
    /// Options from the `[snapd]` configuration section
    pub fn from_config(config: &SnapdConfig) -> Self {
        Self {
            plugin_trust: config.plugin_trust,
            log_level: config.log_level,
            api_port: config.api_port,
            extra_args: config.extra_args.clone(),
        }
    }

    /// Arguments passed to the daemon
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--plugin-trust".to_string(),
            self.plugin_trust.to_string(),
            "--log-level".to_string(),
            self.log_level.to_string(),
        ];
        if let Some(port) = self.api_port {
            args.push("--api-port".to_string());
            args.push(port.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// State shared with the output reader tasks
#[derive(Debug, Default)]
struct OutputState {
    ready: AtomicBool,
    ready_notify: Notify,
    errors: Mutex<Vec<String>>,
}

impl OutputState {
    fn observe(&self, stream: &'static str, line: &str) {
        tracing::trace!(target: "snapd", stream, "{}", line);

        if line.contains(READY_MARKER) && !self.ready.swap(true, Ordering::SeqCst) {
            tracing::debug!("snapd reported ready");
            self.ready_notify.notify_waiters();
        }

        if is_error_line(line) {
            tracing::warn!(stream, "snapd error: {}", line);
            self.errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(line.to_string());
        }
    }

    fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Whether a daemon log line was emitted at error level or worse.
pub fn is_error_line(line: &str) -> bool {
    ERROR_LINE.is_match(line)
}

async fn watch_output<R>(reader: R, stream: &'static str, state: Arc<OutputState>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => state.observe(stream, &line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(stream, "Failed to read snapd output: {}", e);
                break;
            }
        }
    }
}

/// Supervises one `snapd` process
pub struct Snapd {
    binary: Binary,
    options: SnapdOptions,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    state: Arc<OutputState>,
    started_at: Option<Instant>,
    exit_status: Option<ExitStatus>,
}

impl Snapd {
    /// Create a supervisor; nothing is spawned until [`Snapd::start`]
    pub fn new(binary: Binary, options: SnapdOptions) -> Self {
        Self {
            binary,
            options,
            child: None,
            readers: Vec::new(),
            state: Arc::new(OutputState::default()),
            started_at: None,
            exit_status: None,
        }
    }

    /// Binary this supervisor runs
    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    /// Spawn the daemon and start watching its output
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.is_alive() {
            tracing::debug!("snapd already running");
            return Ok(());
        }
        self.drain_readers().await;

        let program = self.binary.path();
        let args = self.options.args();
        tracing::info!("Starting snapd: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: program.clone(),
                source,
            })?;

        self.state = Arc::new(OutputState::default());
        if let Some(stdout) = child.stdout.take() {
            self.readers
                .push(tokio::spawn(watch_output(stdout, "stdout", Arc::clone(&self.state))));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers
                .push(tokio::spawn(watch_output(stderr, "stderr", Arc::clone(&self.state))));
        }

        tracing::debug!(pid = ?child.id(), "snapd spawned");
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        self.exit_status = None;
        Ok(())
    }

    /// Check if the daemon process is still running
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!("snapd exited with status: {}", status);
                self.exit_status = Some(status);
                self.child = None;
                false
            }
            Err(e) => {
                tracing::error!("Failed to check snapd status: {}", e);
                false
            }
        }
    }

    /// Whether the ready banner has been seen
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }

    /// Wait until the daemon reports ready.
    ///
    /// Fails early with [`HarnessError::DaemonExited`] if the process dies, and with
    /// [`HarnessError::DaemonNotReady`] once `timeout` has passed.
    pub async fn wait_ready(&mut self, timeout: Duration) -> HarnessResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return Ok(());
            }
            if !self.is_alive() {
                // let the readers flush whatever the daemon said on its way out
                self.drain_readers().await;
                if self.is_ready() {
                    return Ok(());
                }
                return Err(HarnessError::DaemonExited(self.exit_description()));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::DaemonNotReady(timeout));
            }

            let state = Arc::clone(&self.state);
            let _ = tokio::time::timeout(
                remaining.min(POLL_INTERVAL),
                state.ready_notify.notified(),
            )
            .await;
        }
    }

    /// Error lines logged by the daemon so far
    pub fn errors(&self) -> Vec<String> {
        self.state.errors()
    }

    /// Process id while running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Time since the daemon was started
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Kill the daemon, reap it and drain its output.
    ///
    /// Returns the exit status, or `None` if the daemon was never started.
    pub async fn stop(&mut self) -> HarnessResult<Option<ExitStatus>> {
        if let Some(mut child) = self.child.take() {
            tracing::info!("Stopping snapd");
            if let Err(e) = child.start_kill() {
                tracing::debug!("snapd kill failed, it may have exited already: {}", e);
            }
            let status = child.wait().await?;
            tracing::info!("snapd stopped with status: {}", status);
            self.exit_status = Some(status);
        }
        self.drain_readers().await;
        self.started_at = None;
        Ok(self.exit_status)
    }

    async fn drain_readers(&mut self) {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::warn!("snapd output reader did not finish, aborting it");
                abort.abort();
            }
        }
    }

    fn exit_description(&self) -> String {
        match self.exit_status {
            Some(status) => status.to_string(),
            None => "process is not running".to_string(),
        }
    }
}

impl Drop for Snapd {
    fn drop(&mut self) {
        // the child itself is killed by `kill_on_drop`
        for reader in &self.readers {
            reader.abort();
        }
    }
}
