//! Harness settings resolution
//!
//! Resolves settings from multiple sources with priority:
//! 1. Command-line flags (passed as [`SettingsOverrides`])
//! 2. `MON_HARNESS_*` environment variables
//! 3. TOML file (`--settings <path>` or `./monitor-harness.toml`)
//! 4. Defaults

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{HarnessError, Result};

/// File name looked up in the current directory when no path is given.
pub const SETTINGS_FILE_NAME: &str = "monitor-harness.toml";

/// Name of the mock responder binary shipped next to the CLI.
pub const RESPONDER_BIN_NAME: &str = "mock-snmp-responder";

/// Complete harness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Bootstrap brokers the verifier consumes from (`host:port`).
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// Directory for materialized agent config files (system temp dir if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Explicit mock responder binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_bin: Option<PathBuf>,
    /// Leave config files on disk after a run.
    #[serde(default)]
    pub keep_config_files: bool,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub baseline: BaselineConfig,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            work_dir: None,
            responder_bin: None,
            keep_config_files: false,
            timeouts: Timeouts::default(),
            log_format: LogFormat::default(),
            baseline: BaselineConfig::default(),
        }
    }
}

impl HarnessSettings {
    /// Directory config files are written to.
    pub fn config_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Locate the mock responder binary.
    ///
    /// Uses the configured path when set; otherwise looks next to the
    /// running executable (and one level up, for test binaries under
    /// `deps/`), then falls back to a bare name resolved through `PATH`.
    pub fn responder_program(&self) -> PathBuf {
        if let Some(path) = &self.responder_bin {
            return path.clone();
        }
        let file_name = format!("{RESPONDER_BIN_NAME}{}", std::env::consts::EXE_SUFFIX);
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            for candidate in [dir.join(&file_name), dir.join("..").join(&file_name)] {
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
        PathBuf::from(file_name)
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

/// Every bounded wait of a run, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Ceiling for the agent's readiness marker.
    #[serde(default = "default_readiness_secs")]
    pub readiness_secs: u64,
    /// Ceiling for the agent to exit after SIGINT.
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
    /// Ceiling for the responder startup rendezvous.
    #[serde(default = "default_rendezvous_secs")]
    pub rendezvous_secs: u64,
    /// Idle ceiling while waiting for each expected message.
    #[serde(default = "default_message_idle_secs")]
    pub message_idle_secs: u64,
    /// How long an "expect nothing" step listens.
    #[serde(default = "default_silence_window_secs")]
    pub silence_window_secs: u64,
    /// How long the end-of-suite check listens on each topic.
    #[serde(default = "default_residual_window_secs")]
    pub residual_window_secs: u64,
}

fn default_readiness_secs() -> u64 {
    60
}

fn default_shutdown_secs() -> u64 {
    5
}

fn default_rendezvous_secs() -> u64 {
    5
}

fn default_message_idle_secs() -> u64 {
    60
}

fn default_silence_window_secs() -> u64 {
    5
}

fn default_residual_window_secs() -> u64 {
    5
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: default_readiness_secs(),
            shutdown_secs: default_shutdown_secs(),
            rendezvous_secs: default_rendezvous_secs(),
            message_idle_secs: default_message_idle_secs(),
            silence_window_secs: default_silence_window_secs(),
            residual_window_secs: default_residual_window_secs(),
        }
    }
}

impl Timeouts {
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }

    pub fn rendezvous(&self) -> Duration {
        Duration::from_secs(self.rendezvous_secs)
    }

    pub fn message_idle(&self) -> Duration {
        Duration::from_secs(self.message_idle_secs)
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_secs(self.silence_window_secs)
    }

    pub fn residual_window(&self) -> Duration {
        Duration::from_secs(self.residual_window_secs)
    }
}

/// Shape of the agent's structured log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFormat {
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Zero-based index of the message field.
    #[serde(default = "default_message_field")]
    pub message_field: usize,
    /// Message prefix announcing the trap listener endpoint.
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,
}

fn default_separator() -> String {
    "|".to_string()
}

fn default_message_field() -> usize {
    3
}

fn default_readiness_marker() -> String {
    "Listening for traps on ".to_string()
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            message_field: default_message_field(),
            readiness_marker: default_readiness_marker(),
        }
    }
}

/// Agent `conf` options merged under every scenario's config fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "default_debug")]
    pub debug: u8,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_sleep_main_thread")]
    pub sleep_main_thread: u64,
    #[serde(default = "default_sleep_worker_thread")]
    pub sleep_worker_thread: u64,
    /// Broker address as seen from the agent.
    #[serde(default = "default_kafka_broker")]
    pub kafka_broker: String,
}

fn default_debug() -> u8 {
    2
}

fn default_timeout() -> u64 {
    1
}

fn default_sleep_main_thread() -> u64 {
    100_000
}

fn default_sleep_worker_thread() -> u64 {
    25
}

fn default_kafka_broker() -> String {
    "kafka".to_string()
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            debug: default_debug(),
            timeout: default_timeout(),
            sleep_main_thread: default_sleep_main_thread(),
            sleep_worker_thread: default_sleep_worker_thread(),
            kafka_broker: default_kafka_broker(),
        }
    }
}

impl BaselineConfig {
    /// The baseline as a `conf` JSON object.
    pub fn to_conf(&self) -> Map<String, Value> {
        let mut conf = Map::new();
        conf.insert("debug".into(), Value::from(self.debug));
        conf.insert("timeout".into(), Value::from(self.timeout));
        conf.insert("sleep_main_thread".into(), Value::from(self.sleep_main_thread));
        conf.insert(
            "sleep_worker_thread".into(),
            Value::from(self.sleep_worker_thread),
        );
        conf.insert("kafka_broker".into(), Value::from(self.kafka_broker.clone()));
        conf
    }
}

/// Command-line overrides for settings.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    /// Explicit settings file; a load failure is an error.
    pub settings_path: Option<PathBuf>,
    pub brokers: Option<Vec<String>>,
    pub work_dir: Option<PathBuf>,
    pub responder_bin: Option<PathBuf>,
    pub keep_config_files: Option<bool>,
}

/// Resolve settings from all sources.
pub fn resolve_settings(
    overrides: &SettingsOverrides,
    current_dir: &Path,
) -> Result<HarnessSettings> {
    let mut settings = match &overrides.settings_path {
        Some(path) => load_settings_file(path)?,
        None => {
            let discovered = current_dir.join(SETTINGS_FILE_NAME);
            if discovered.is_file() {
                match load_settings_file(&discovered) {
                    Ok(settings) => settings,
                    Err(e) => {
                        warn!("Ignoring unreadable settings file: {e}");
                        HarnessSettings::default()
                    }
                }
            } else {
                HarnessSettings::default()
            }
        }
    };

    apply_env_overrides(&mut settings);
    apply_cli_overrides(&mut settings, overrides);
    Ok(settings)
}

/// Load settings from a TOML file.
pub fn load_settings_file(path: &Path) -> Result<HarnessSettings> {
    let contents = std::fs::read_to_string(path).map_err(|e| HarnessError::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| HarnessError::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn env_secs(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("Ignoring {name}={raw:?}: not a whole number of seconds");
            None
        }
    }
}

fn split_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply environment variable overrides.
fn apply_env_overrides(settings: &mut HarnessSettings) {
    if let Ok(brokers) = std::env::var("MON_HARNESS_BROKERS") {
        let brokers = split_brokers(&brokers);
        if !brokers.is_empty() {
            settings.brokers = brokers;
        }
    }

    if let Ok(dir) = std::env::var("MON_HARNESS_WORK_DIR") {
        settings.work_dir = Some(PathBuf::from(dir));
    }

    if let Ok(bin) = std::env::var("MON_HARNESS_RESPONDER_BIN") {
        settings.responder_bin = Some(PathBuf::from(bin));
    }

    if let Ok(keep) = std::env::var("MON_HARNESS_KEEP_CONFIG") {
        settings.keep_config_files = matches!(keep.trim(), "1" | "true" | "yes");
    }

    if let Ok(broker) = std::env::var("MON_HARNESS_KAFKA_BROKER") {
        settings.baseline.kafka_broker = broker;
    }

    if let Some(secs) = env_secs("MON_HARNESS_READINESS_TIMEOUT_SECS") {
        settings.timeouts.readiness_secs = secs;
    }
    if let Some(secs) = env_secs("MON_HARNESS_SHUTDOWN_TIMEOUT_SECS") {
        settings.timeouts.shutdown_secs = secs;
    }
    if let Some(secs) = env_secs("MON_HARNESS_MESSAGE_IDLE_SECS") {
        settings.timeouts.message_idle_secs = secs;
    }
}

/// Apply command-line overrides.
fn apply_cli_overrides(settings: &mut HarnessSettings, overrides: &SettingsOverrides) {
    if let Some(ref brokers) = overrides.brokers {
        settings.brokers = brokers.clone();
    }

    if let Some(ref dir) = overrides.work_dir {
        settings.work_dir = Some(dir.clone());
    }

    if let Some(ref bin) = overrides.responder_bin {
        settings.responder_bin = Some(bin.clone());
    }

    if let Some(keep) = overrides.keep_config_files {
        settings.keep_config_files = keep;
    }
}

/// Parse a comma-separated broker list as given on the command line.
pub fn parse_broker_list(raw: &str) -> Vec<String> {
    split_brokers(raw)
}
