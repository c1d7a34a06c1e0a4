//! Harness-side handle for a mock responder process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::ResponderMap;
use super::barrier::{self, BarrierError};
use crate::error::{HarnessError, Result};

/// Lifecycle of a [`MockResponder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    /// Map and port fixed, no process yet.
    Created,
    /// Process spawned, rendezvous pending.
    Starting,
    /// Worker reported its socket bound.
    Ready,
    /// Worker released and answering requests.
    Serving,
    Terminated,
}

/// A mock SNMP responder running in its own process.
///
/// The map is written to a file before the process is spawned and never
/// changes afterwards. Dropping the handle kills the process.
#[derive(Debug)]
pub struct MockResponder {
    program: PathBuf,
    port: u16,
    map: ResponderMap,
    state: ResponderState,
    responses_file: Option<tempfile::NamedTempFile>,
    child: Option<Child>,
    // Held so the worker never sees its stdio pipes close while serving.
    stdio: Option<(ChildStdin, BufReader<ChildStdout>)>,
}

impl MockResponder {
    pub fn new(program: impl Into<PathBuf>, port: u16, map: ResponderMap) -> Self {
        Self {
            program: program.into(),
            port,
            map,
            state: ResponderState::Created,
            responses_file: None,
            child: None,
            stdio: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    fn startup_error(&self, message: impl Into<String>) -> HarnessError {
        HarnessError::ResponderStartup {
            port: self.port,
            message: message.into(),
        }
    }

    /// Spawn the process and complete the rendezvous within `timeout`.
    pub async fn start(&mut self, timeout: Duration) -> Result<()> {
        if self.state != ResponderState::Created {
            return Err(self.startup_error(format!("cannot start from state {:?}", self.state)));
        }

        let mut responses = tempfile::Builder::new()
            .prefix("monitor_responses_")
            .suffix(".json")
            .tempfile()
            .map_err(|e| HarnessError::io("creating responder map file", e))?;
        serde_json::to_writer(responses.as_file_mut(), &self.map)
            .map_err(|e| HarnessError::json("writing responder map", e))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--port")
            .arg(self.port.to_string())
            .arg("--responses")
            .arg(responses.path())
            .arg("--rendezvous-timeout-secs")
            .arg(timeout.as_secs().max(1).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            self.startup_error(format!("cannot spawn {}: {e}", self.program.display()))
        })?;
        self.state = ResponderState::Starting;
        self.responses_file = Some(responses);
        debug!(port = self.port, pid = child.id(), "responder spawned");

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            self.state = ResponderState::Terminated;
            return Err(self.startup_error("responder stdio was not captured"));
        };
        let mut stdout = BufReader::new(stdout);
        self.child = Some(child);

        match barrier::arrive_supervisor(&mut stdout, &mut stdin, timeout).await {
            Ok(port) if port == self.port => {}
            Ok(port) => {
                self.kill().await;
                return Err(self.startup_error(format!("responder bound port {port} instead")));
            }
            Err(e) => {
                let reason = match &e {
                    BarrierError::Closed => match self.exit_status() {
                        Some(status) => format!("responder exited during startup ({status})"),
                        None => e.to_string(),
                    },
                    _ => e.to_string(),
                };
                self.kill().await;
                return Err(self.startup_error(reason));
            }
        }
        self.state = ResponderState::Ready;
        self.stdio = Some((stdin, stdout));
        self.state = ResponderState::Serving;
        info!(port = self.port, entries = self.map.len(), "mock responder serving");
        Ok(())
    }

    /// Exit status if the process has already ended.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.kill().await
        {
            warn!(port = self.port, "failed to kill responder: {e}");
        }
        self.stdio = None;
        self.state = ResponderState::Terminated;
    }

    /// Force-terminate the process.
    ///
    /// A responder that already died (for example on an unmapped OID) is
    /// reported in the log; termination itself never fails.
    pub async fn terminate(&mut self) {
        if self.state == ResponderState::Terminated {
            return;
        }
        if let Some(status) = self.exit_status()
            && !status.success()
        {
            warn!(port = self.port, %status, "responder had already exited");
        }
        self.kill().await;
        self.responses_file = None;
    }
}

impl Drop for MockResponder {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}
