//! Supervision of the agent-under-test.
//!
//! The agent is launched as `<argv...> -c <config-file>` with both output
//! streams captured. Every output line is logged at debug level and kept in a
//! short ring for diagnostics. When a trap listener is configured the start
//! blocks until the agent logs its readiness marker for the expected port.
//! [`AgentProcess::stop`] sends SIGINT and waits a bounded time for the exit.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::settings::HarnessSettings;

const RECENT_LINES: usize = 64;
const LINE_CHANNEL_CAPACITY: usize = 256;

/// How to recognize the agent's "listening" log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub marker: String,
    pub separator: String,
    /// Zero-based field index of the log message.
    pub message_field: usize,
    pub timeout: Duration,
}

impl ReadinessProbe {
    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self {
            marker: settings.log_format.readiness_marker.clone(),
            separator: settings.log_format.separator.clone(),
            message_field: settings.log_format.message_field,
            timeout: settings.timeouts.readiness(),
        }
    }

    /// Endpoint text following the marker, if `line` is a readiness line.
    ///
    /// The message field keeps any separators it contains.
    pub fn endpoint<'a>(&self, line: &'a str) -> Option<&'a str> {
        let message = line
            .splitn(self.message_field + 1, self.separator.as_str())
            .nth(self.message_field)?;
        message
            .trim_end()
            .strip_prefix(self.marker.as_str())
            .map(str::trim)
    }
}

/// Port number after the last `:` of an endpoint such as `127.0.0.1:16162`.
pub fn endpoint_port(endpoint: &str) -> Option<u16> {
    endpoint.rsplit_once(':')?.1.trim().parse().ok()
}

type RecentLines = Arc<Mutex<VecDeque<String>>>;

/// A running agent-under-test.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    pid: u32,
    shutdown_timeout: Duration,
    recent: RecentLines,
    readers: Vec<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
}

impl AgentProcess {
    /// Spawn the agent and, when `wait_for_port` is set, block until it
    /// reports listening on that port.
    ///
    /// On a readiness failure the process is killed before the error is
    /// returned.
    pub async fn start(
        argv: &[String],
        config_path: &Path,
        wait_for_port: Option<u16>,
        probe: &ReadinessProbe,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HarnessError::config("agent command line is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("-c")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: program.into(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        info!(pid, program = %program, config = %config_path.display(), "agent started");

        let recent: RecentLines = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LINES)));
        let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, "stdout", tx.clone(), recent.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, "stderr", tx, recent.clone()));
        }

        let mut agent = Self {
            child,
            pid,
            shutdown_timeout,
            recent,
            readers,
            exit_status: None,
        };

        if let Some(port) = wait_for_port
            && let Err(e) = agent.wait_ready(&mut rx, port, probe).await
        {
            agent.kill().await;
            return Err(e);
        }
        Ok(agent)
    }

    async fn wait_ready(
        &mut self,
        lines: &mut mpsc::Receiver<String>,
        port: u16,
        probe: &ReadinessProbe,
    ) -> Result<()> {
        let deadline = Instant::now() + probe.timeout;
        loop {
            let line = match tokio::time::timeout_at(deadline, lines.recv()).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(HarnessError::AgentExitedBeforeReady {
                        port,
                        recent_output: self.recent_output(),
                    });
                }
                Err(_) => {
                    return Err(HarnessError::AgentReadinessTimeout {
                        port,
                        timeout: probe.timeout,
                        recent_output: self.recent_output(),
                    });
                }
            };
            let Some(endpoint) = probe.endpoint(&line) else {
                continue;
            };
            return match endpoint_port(endpoint) {
                Some(observed) if observed == port => {
                    info!(pid = self.pid, port, "agent trap listener ready");
                    Ok(())
                }
                _ => Err(HarnessError::ReadinessPortMismatch {
                    expected: port,
                    observed: endpoint.to_string(),
                }),
            };
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The most recent output lines, oldest first.
    pub fn recent_output(&self) -> String {
        let recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        recent.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Interrupt the agent and wait for it to exit.
    ///
    /// Idempotent. An agent still running after the shutdown timeout is
    /// killed and reported as [`HarnessError::AgentShutdownTimeout`].
    pub async fn stop(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        if let Some(status) = self
            .child
            .try_wait()
            .map_err(|e| HarnessError::io("polling agent status", e))?
        {
            warn!(pid = self.pid, %status, "agent exited before shutdown was requested");
            return Ok(self.finish(status));
        }

        interrupt(&mut self.child).map_err(|e| HarnessError::io("sending SIGINT to agent", e))?;
        match tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = self.pid, %status, "agent stopped");
                Ok(self.finish(status))
            }
            Ok(Err(e)) => {
                self.abort_readers();
                Err(HarnessError::io("waiting for agent exit", e))
            }
            Err(_) => {
                self.kill().await;
                Err(HarnessError::AgentShutdownTimeout {
                    pid: self.pid,
                    timeout: self.shutdown_timeout,
                })
            }
        }
    }

    fn finish(&mut self, status: ExitStatus) -> ExitStatus {
        self.exit_status = Some(status);
        self.abort_readers();
        status
    }

    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(pid = self.pid, "failed to kill agent: {e}");
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.finish(status);
            }
            _ => self.abort_readers(),
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn spawn_reader<R>(
    stream: R,
    name: &'static str,
    lines: mpsc::Sender<String>,
    recent: RecentLines,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Agent output is not guaranteed to be UTF-8.
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    debug!(stream = name, "{line}");
                    {
                        let mut recent = recent.lock().unwrap_or_else(|p| p.into_inner());
                        if recent.len() == RECENT_LINES {
                            recent.pop_front();
                        }
                        recent.push_back(line.clone());
                    }
                    // Nobody listens once readiness is settled.
                    let _ = lines.send(line).await;
                }
                Err(e) => {
                    debug!(stream = name, "agent output unreadable: {e}");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: pid belongs to a child we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
