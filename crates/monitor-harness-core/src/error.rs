//! Error taxonomy for harness runs.
//!
//! Every bounded wait that can expire has its own variant so a failed run
//! reports which ceiling fired (rendezvous, readiness scan, message count,
//! shutdown) instead of a generic timeout.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::snmp::SnmpError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced by the harness to the orchestrator and the CLI.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Malformed or incomplete scenario input; raised before any process starts.
    #[error("Invalid scenario config: {message}")]
    Config { message: String },

    /// Harness settings could not be loaded.
    #[error("Invalid harness settings in {path}: {message}")]
    Settings { path: PathBuf, message: String },

    /// No collision-free port or name could be leased.
    #[error("Resource allocation failed for {resource}: {message}")]
    ResourceAllocation { resource: String, message: String },

    /// The mock responder never completed the startup rendezvous.
    #[error("Mock SNMP responder failed to start on port {port}: {message}")]
    ResponderStartup { port: u16, message: String },

    /// The readiness marker was not observed within the readiness timeout.
    #[error(
        "Agent did not report listening on port {port} within {timeout:?}; recent output:\n{recent_output}"
    )]
    AgentReadinessTimeout {
        port: u16,
        timeout: Duration,
        recent_output: String,
    },

    /// The agent output streams closed before the readiness marker appeared.
    #[error("Agent exited before listening on port {port}; recent output:\n{recent_output}")]
    AgentExitedBeforeReady { port: u16, recent_output: String },

    /// The readiness marker named a different endpoint than the one configured.
    #[error("Agent reported listening on '{observed}', expected port {expected}")]
    ReadinessPortMismatch { expected: u16, observed: String },

    /// The agent ignored the interrupt signal past the shutdown timeout.
    #[error("Agent (pid {pid}) did not exit within {timeout:?} after SIGINT")]
    AgentShutdownTimeout { pid: u32, timeout: Duration },

    /// Fewer (or more) messages than expected were consumed from a topic.
    #[error(
        "Topic '{topic}': expected {expected} message(s), consumed {received}; consumed records: {records}"
    )]
    MessageCountMismatch {
        topic: String,
        expected: usize,
        received: usize,
        records: String,
    },

    /// A consumed record did not match its expected template.
    #[error(
        "Topic '{topic}' message #{index}: field '{field}' {reason}\n  expected: {expected}\n  actual:   {actual}"
    )]
    MessageFieldMismatch {
        topic: String,
        index: usize,
        field: String,
        reason: String,
        expected: String,
        actual: String,
    },

    /// A step expecting no messages saw one arrive.
    #[error("Topic '{topic}': expected no messages, received {record}")]
    UnexpectedMessage { topic: String, record: String },

    /// Suite-level check found messages nobody expected.
    #[error("Residual messages left unconsumed: {}", format_residuals(.residuals))]
    ResidualMessage { residuals: Vec<(String, String)> },

    /// The agent-under-test or responder could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// Message bus client failure.
    #[error("Message bus error on topic '{topic}': {message}")]
    Bus { topic: String, message: String },

    /// SNMP encode/decode failure.
    #[error("SNMP codec error: {0}")]
    Snmp(#[from] SnmpError),

    /// File or socket I/O error with context.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// JSON (de)serialization error with context.
    #[error("JSON error while {context}: {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },
}

impl HarnessError {
    /// Short, stable kind name used in pass/fail reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Settings { .. } => "settings",
            Self::ResourceAllocation { .. } => "resource-allocation",
            Self::ResponderStartup { .. } => "responder-startup",
            Self::AgentReadinessTimeout { .. } => "agent-readiness-timeout",
            Self::AgentExitedBeforeReady { .. } => "agent-exited-before-ready",
            Self::ReadinessPortMismatch { .. } => "readiness-port-mismatch",
            Self::AgentShutdownTimeout { .. } => "agent-shutdown-timeout",
            Self::MessageCountMismatch { .. } => "message-count-mismatch",
            Self::MessageFieldMismatch { .. } => "message-field-mismatch",
            Self::UnexpectedMessage { .. } => "unexpected-message",
            Self::ResidualMessage { .. } => "residual-message",
            Self::Spawn { .. } => "spawn",
            Self::Bus { .. } => "bus",
            Self::Snmp(_) => "snmp",
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }
}

fn format_residuals(residuals: &[(String, String)]) -> String {
    residuals
        .iter()
        .map(|(topic, record)| format!("[{topic}] {record}"))
        .collect::<Vec<_>>()
        .join("; ")
}
