//! Worker daemon control.
//!
//! The worker is an external daemon that holds the snapshot file open for
//! writes; it must be stopped across any snapshot or replace. The engine
//! talks to it through the narrow [`WorkerControl`] capability so tests can
//! substitute an in-memory fake. Readiness is probed over HTTP, never by
//! waiting on the spawned process (it runs as a server).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// Default worker readiness port.
pub const DEFAULT_WORKER_PORT: u16 = 37777;
/// Graceful-stop window before escalating to SIGKILL.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Readiness probe window after a start.
pub const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Narrow capability over the worker daemon.
#[allow(async_fn_in_trait)]
pub trait WorkerControl: Send + Sync {
    /// Recorded pid, verified against a live process.
    async fn pid(&self) -> Option<i32>;
    /// Graceful stop, forceful after [`STOP_TIMEOUT`]. Returns whether the
    /// worker was stopped (false when it was not running).
    async fn stop(&self) -> Result<bool>;
    /// Spawn detached and wait for readiness. Returns whether the worker
    /// came up; spawn failures are errors, readiness timeouts are `false`.
    async fn start(&self) -> Result<bool>;
    /// Poll the readiness endpoint until it answers 200 or the window ends.
    async fn wait_ready(&self, timeout: Duration) -> bool;
}

/// How to find and launch the real worker daemon.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// JSON pid file (`{"pid": 12345}`) at a well-known location.
    pub pid_file: PathBuf,
    /// Launch command; empty disables starting (the worker stays stopped
    /// until the next external trigger).
    pub command: Vec<String>,
    /// Port of the HTTP readiness endpoint (`/api/readiness`).
    pub port: u16,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let pid_file = std::env::var("MEMBRIDGE_WORKER_PID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".claude-mem/worker.pid"));
        let command = std::env::var("MEMBRIDGE_WORKER_CMD")
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let port = std::env::var("CLAUDE_MEM_WORKER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_WORKER_PORT);
        Self { pid_file, command, port }
    }
}

#[derive(Debug, Deserialize)]
struct PidFile {
    pid: i32,
}

/// [`WorkerControl`] implementation driving a real external process.
#[derive(Clone)]
pub struct ProcessWorker {
    cfg: WorkerConfig,
    http: reqwest::Client,
}

impl ProcessWorker {
    pub fn new(cfg: WorkerConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }

    fn readiness_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/readiness", self.cfg.port)
    }

    async fn probe_ready(&self) -> bool {
        match self
            .http
            .get(self.readiness_url())
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| Error::Worker(format!("signal {signal:?} to pid {pid}: {e}")))
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

impl WorkerControl for ProcessWorker {
    async fn pid(&self) -> Option<i32> {
        let raw = tokio::fs::read(&self.cfg.pid_file).await.ok()?;
        let parsed: PidFile = serde_json::from_slice(&raw).ok()?;
        if parsed.pid > 0 && process_alive(parsed.pid) {
            Some(parsed.pid)
        } else {
            None
        }
    }

    #[cfg(unix)]
    async fn stop(&self) -> Result<bool> {
        use nix::sys::signal::Signal;

        let Some(pid) = self.pid().await else {
            info!("worker not running, skipping stop");
            return Ok(false);
        };

        info!(pid, "stopping worker");
        send_signal(pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + STOP_TIMEOUT;
        while Instant::now() < deadline {
            if !process_alive(pid) {
                info!(pid, "worker stopped");
                return Ok(true);
            }
            sleep(Duration::from_millis(100)).await;
        }

        warn!(pid, "worker did not stop gracefully, sending SIGKILL");
        // ESRCH here just means it exited between the poll and the kill.
        let _ = send_signal(pid, Signal::SIGKILL);
        sleep(Duration::from_millis(500)).await;
        Ok(true)
    }

    #[cfg(not(unix))]
    async fn stop(&self) -> Result<bool> {
        Err(Error::Worker("worker control requires unix".to_string()))
    }

    async fn start(&self) -> Result<bool> {
        if self.cfg.command.is_empty() {
            warn!("no worker command configured (MEMBRIDGE_WORKER_CMD), not starting");
            return Ok(false);
        }

        info!(command = ?self.cfg.command, port = self.cfg.port, "starting worker");

        let mut cmd = tokio::process::Command::new(&self.cfg.command[0]);
        cmd.args(&self.cfg.command[1..])
            .env("CLAUDE_MEM_WORKER_PORT", self.cfg.port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Worker(format!("spawn {}: {e}", self.cfg.command[0])))?;

        let deadline = Instant::now() + READY_TIMEOUT;
        while Instant::now() < deadline {
            sleep(Duration::from_millis(500)).await;
            if self.probe_ready().await {
                info!("worker started successfully");
                return Ok(true);
            }
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    warn!(%status, "worker daemon exited before readiness");
                    return Ok(false);
                }
            }
        }

        warn!("worker readiness timeout after {}s", READY_TIMEOUT.as_secs());
        Ok(false)
    }

    async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.probe_ready().await {
                return true;
            }
            sleep(Duration::from_millis(500)).await;
        }
        false
    }
}
