//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use monitor_harness_core::{Harness, HarnessSettings, MessageBus, Result, TopicConsumer};
use tempfile::TempDir;

/// Bus over the JSON-line spool files written by `fake-agent`.
pub struct SpoolBus {
    dir: PathBuf,
}

impl SpoolBus {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl MessageBus for SpoolBus {
    fn consumer(&self, topic: &str) -> Result<Box<dyn TopicConsumer>> {
        Ok(Box::new(SpoolConsumer {
            path: self.dir.join(format!("{topic}.jsonl")),
            consumed: 0,
        }))
    }
}

struct SpoolConsumer {
    path: PathBuf,
    consumed: usize,
}

impl SpoolConsumer {
    fn next_line(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        contents
            .split_inclusive('\n')
            .filter(|line| line.ends_with('\n'))
            .nth(self.consumed)
            .map(|line| line.trim_end().to_string())
    }
}

impl TopicConsumer for SpoolConsumer {
    fn next_message(&mut self, idle: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + idle;
        loop {
            if let Some(line) = self.next_line() {
                self.consumed += 1;
                return Ok(Some(line.into_bytes()));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Scratch directories for one test: config files and the spool.
pub struct Workspace {
    pub configs: TempDir,
    pub spool: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            configs: TempDir::new().unwrap(),
            spool: TempDir::new().unwrap(),
        }
    }

    /// Settings with short waits and the responder built alongside the tests.
    pub fn settings(&self) -> HarnessSettings {
        let mut settings = HarnessSettings {
            work_dir: Some(self.configs.path().to_path_buf()),
            responder_bin: Some(PathBuf::from(env!("CARGO_BIN_EXE_mock-snmp-responder"))),
            ..HarnessSettings::default()
        };
        settings.timeouts.readiness_secs = 10;
        settings.timeouts.shutdown_secs = 2;
        settings.timeouts.rendezvous_secs = 5;
        settings.timeouts.message_idle_secs = 5;
        settings.timeouts.silence_window_secs = 1;
        settings.timeouts.residual_window_secs = 1;
        settings
    }

    pub fn harness_with(&self, settings: HarnessSettings) -> Harness {
        Harness::new(settings, Arc::new(SpoolBus::new(self.spool.path())))
    }

    pub fn harness(&self) -> Harness {
        self.harness_with(self.settings())
    }

    /// `fake-agent` command line in the given mode.
    pub fn agent(&self, mode: &str) -> Vec<String> {
        vec![
            env!("CARGO_BIN_EXE_fake-agent").to_string(),
            "--mode".to_string(),
            mode.to_string(),
            "--bus-dir".to_string(),
            self.spool.path().display().to_string(),
        ]
    }

    pub fn config_files(&self) -> usize {
        std::fs::read_dir(self.configs.path()).unwrap().count()
    }
}
