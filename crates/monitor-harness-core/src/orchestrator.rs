//! Test orchestration: one scenario run from config to teardown.
//!
//! Acquisition order is injector socket, mock responder, agent; teardown
//! runs in reverse on every exit path. The responder is ready before the
//! agent starts, and the agent's trap listener is confirmed before the
//! first trap is sent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::agent::{AgentProcess, ReadinessProbe};
use crate::agent_config::{ConfigMaterializer, MaterializedConfig};
use crate::bus::MessageBus;
use crate::error::{HarnessError, Result};
use crate::injector::EventInjector;
use crate::responder::MockResponder;
use crate::scenario::{Scenario, Step};
use crate::settings::HarnessSettings;
use crate::verifier::MessageVerifier;

/// Outcome of a passing scenario run.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub scenario: String,
    pub topic: String,
    pub steps: usize,
    /// Config file left on disk when `keep_config_files` is set.
    pub config_path: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Result of one scenario within a suite.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub result: Result<TestReport>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-scenario outcomes plus the end-of-suite residual check.
#[derive(Debug)]
pub struct SuiteReport {
    pub outcomes: Vec<ScenarioOutcome>,
    pub residual: Option<HarnessError>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.residual.is_none()
    }
}

/// Runs scenarios against an agent binary.
///
/// One harness is one test session: its verifier keeps a consumer per topic
/// across scenarios, and [`Harness::finish`] checks them all at the end.
pub struct Harness {
    settings: HarnessSettings,
    materializer: ConfigMaterializer,
    probe: ReadinessProbe,
    verifier: MessageVerifier,
}

/// Resources acquired by one run, released in reverse order.
#[derive(Default)]
struct Acquired {
    injector: Option<EventInjector>,
    responder: Option<MockResponder>,
    agent: Option<AgentProcess>,
}

impl Acquired {
    /// Release everything; every step runs even when an earlier one fails.
    /// The first failure is returned.
    async fn release(&mut self) -> Result<()> {
        let mut first = None;
        if let Some(mut agent) = self.agent.take()
            && let Err(e) = agent.stop().await
        {
            first = Some(e);
        }
        if let Some(mut responder) = self.responder.take() {
            responder.terminate().await;
        }
        self.injector = None;
        first.map_or(Ok(()), Err)
    }
}

impl Harness {
    pub fn new(settings: HarnessSettings, bus: Arc<dyn MessageBus>) -> Self {
        let materializer = ConfigMaterializer::from_settings(&settings);
        let probe = ReadinessProbe::from_settings(&settings);
        let verifier = MessageVerifier::new(bus, &settings.timeouts);
        Self {
            settings,
            materializer,
            probe,
            verifier,
        }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn verifier(&self) -> &MessageVerifier {
        &self.verifier
    }

    /// Run one scenario against `<argv...> -c <config>`.
    ///
    /// Structural problems are reported as [`HarnessError::Config`] before
    /// any process starts. Once processes are up, the first failure is
    /// returned after teardown; teardown failures that follow it are only
    /// logged.
    pub async fn base_test(&self, argv: &[String], scenario: &Scenario) -> Result<TestReport> {
        scenario.validate()?;
        if argv.is_empty() {
            return Err(HarnessError::config("agent command line is empty"));
        }
        let started = Instant::now();
        let mut config = self.materializer.materialize(&scenario.config)?;
        let config_path = config.path().map(Path::to_path_buf);
        info!(
            scenario = %scenario.name,
            topic = config.topic(),
            config = ?config_path,
            "scenario starting"
        );

        let mut acquired = Acquired::default();
        let outcome = match check_preconditions(scenario, &config) {
            Ok(()) => self.run(argv, scenario, &config, &mut acquired).await,
            Err(e) => Err(e),
        };
        let released = acquired.release().await;

        if self.settings.keep_config_files {
            debug!(config = ?config_path, "keeping config file");
        } else if let Err(e) = config.remove() {
            warn!("failed to remove config file: {e}");
        }

        match (outcome, released) {
            (Err(primary), Err(teardown)) => {
                warn!(kind = teardown.kind(), "teardown also failed: {teardown}");
                Err(primary)
            }
            (Err(primary), Ok(())) => Err(primary),
            (Ok(()), Err(teardown)) => Err(teardown),
            (Ok(()), Ok(())) => {
                let elapsed = started.elapsed();
                info!(scenario = %scenario.name, ?elapsed, "scenario passed");
                Ok(TestReport {
                    scenario: scenario.name.clone(),
                    topic: config.topic().to_string(),
                    steps: scenario.steps.len(),
                    config_path: config_path.filter(|_| self.settings.keep_config_files),
                    elapsed,
                })
            }
        }
    }

    async fn run(
        &self,
        argv: &[String],
        scenario: &Scenario,
        config: &MaterializedConfig,
        acquired: &mut Acquired,
    ) -> Result<()> {
        if scenario.steps.iter().any(Step::has_trap) {
            acquired.injector = Some(EventInjector::bind().await?);
        }

        if let Some(map) = &scenario.responses
            && let Some(port) = config.responder_port()
        {
            let responder = acquired.responder.insert(MockResponder::new(
                self.settings.responder_program(),
                port,
                map.clone(),
            ));
            responder.start(self.settings.timeouts.rendezvous()).await?;
        }

        let path = config
            .path()
            .ok_or_else(|| HarnessError::config("agent config was not written to disk"))?;
        let agent = AgentProcess::start(
            argv,
            path,
            config.trap_port(),
            &self.probe,
            self.settings.timeouts.shutdown(),
        )
        .await?;
        acquired.agent = Some(agent);

        for (index, step) in scenario.steps.iter().enumerate() {
            if let Some(trap) = &step.trap
                && let (Some(injector), Some(port)) = (&acquired.injector, config.trap_port())
            {
                injector.send_event(port, trap).await?;
            }
            if let Some(messages) = &step.messages {
                self.verifier.verify(config.topic(), messages).await?;
            }
            debug!(scenario = %scenario.name, step = index, "step complete");
        }
        Ok(())
    }

    /// End-of-session check that no opened topic has messages left.
    pub async fn finish(&self) -> Result<()> {
        self.verifier.assert_all_messages_consumed().await
    }

    /// Run every scenario in order, then the end-of-session check.
    pub async fn run_suite(&self, argv: &[String], scenarios: &[Scenario]) -> SuiteReport {
        let mut outcomes = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let result = self.base_test(argv, scenario).await;
            if let Err(e) = &result {
                error!(scenario = %scenario.name, kind = e.kind(), "scenario failed: {e}");
            }
            outcomes.push(ScenarioOutcome {
                name: scenario.name.clone(),
                result,
            });
        }
        let residual = self.finish().await.err();
        if let Some(e) = &residual {
            error!(kind = e.kind(), "{e}");
        }
        SuiteReport { outcomes, residual }
    }
}

fn check_preconditions(scenario: &Scenario, config: &MaterializedConfig) -> Result<()> {
    if scenario.responses.is_some() && config.responder_port().is_none() {
        return Err(HarnessError::config(format!(
            "scenario '{}' has responder values but no sensor to serve them",
            scenario.name
        )));
    }
    if scenario.steps.iter().any(Step::has_trap) && config.trap_port().is_none() {
        return Err(HarnessError::config(format!(
            "scenario '{}' sends traps but conf.snmp_traps is not configured",
            scenario.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::responder::ResponderMap;
    use crate::snmp::{GenericTrap, SnmpValue, TrapSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> HarnessSettings {
        let mut settings = HarnessSettings {
            work_dir: Some(dir.path().to_path_buf()),
            ..HarnessSettings::default()
        };
        settings.timeouts.readiness_secs = 1;
        settings.timeouts.silence_window_secs = 1;
        settings.timeouts.residual_window_secs = 1;
        settings.timeouts.message_idle_secs = 1;
        settings
    }

    fn harness(dir: &TempDir) -> Harness {
        Harness::new(settings(dir), Arc::new(MemoryBus::new()))
    }

    fn sleeper() -> Vec<String> {
        ["sh", "-c", "exec sleep 30", "sh"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn leftover_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn sensor_config() -> serde_json::Value {
        json!({"sensors": [{"sensor_id": 1, "monitors": [{"name": "m", "oid": [0, 0]}]}]})
    }

    #[tokio::test]
    async fn responses_without_sensors_fail_before_any_process() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario::new("no sensors", json!({"conf": {"snmp_traps": {}}}))
            .with_responses(ResponderMap::new().with(&[0, 0], SnmpValue::Integer(1)))
            .with_step(Step::expect_none());
        let argv = vec!["/nonexistent/agent".to_string()];
        let err = harness(&dir).base_test(&argv, &scenario).await.unwrap_err();
        assert_eq!(err.kind(), "config");
        assert_eq!(leftover_files(&dir), 0);
    }

    #[tokio::test]
    async fn trap_step_without_listener_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario::new("trap", sensor_config()).with_step(Step::trap(
            TrapSpec::v2c(GenericTrap::ColdStart),
            Vec::new(),
        ));
        let argv = vec!["/nonexistent/agent".to_string()];
        let err = harness(&dir).base_test(&argv, &scenario).await.unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn empty_command_line_is_rejected() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario::new("s", sensor_config()).with_step(Step::expect_none());
        let err = harness(&dir).base_test(&[], &scenario).await.unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn missing_agent_binary_is_a_spawn_error_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario::new("s", sensor_config()).with_step(Step::expect_none());
        let argv = vec!["/nonexistent/agent".to_string()];
        let err = harness(&dir).base_test(&argv, &scenario).await.unwrap_err();
        assert_eq!(err.kind(), "spawn");
        assert_eq!(leftover_files(&dir), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quiet_agent_passes_an_expect_none_step() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir);
        let scenario = Scenario::new("quiet", sensor_config()).with_step(Step::expect_none());
        let report = harness.base_test(&sleeper(), &scenario).await.unwrap();
        assert_eq!(report.steps, 1);
        assert!(report.topic.starts_with("monitor_topic_"));
        assert!(report.config_path.is_none());
        assert_eq!(leftover_files(&dir), 0);
        harness.finish().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_trap_listener_times_out_readiness() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario::new("traps", json!({"conf": {"snmp_traps": {}}}))
            .with_step(Step::trap(TrapSpec::v2c(GenericTrap::ColdStart), Vec::new()));
        let err = harness(&dir)
            .base_test(&sleeper(), &scenario)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "agent-readiness-timeout");
        assert_eq!(leftover_files(&dir), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kept_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir);
        settings.keep_config_files = true;
        let harness = Harness::new(settings, Arc::new(MemoryBus::new()));
        let scenario = Scenario::new("keep", sensor_config()).with_step(Step::expect_none());
        let report = harness.base_test(&sleeper(), &scenario).await.unwrap();
        let path = report.config_path.unwrap();
        assert!(path.is_file());
        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["conf"]["kafka_topic"], json!(report.topic));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn suite_reports_each_scenario() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir);
        let scenarios = vec![
            Scenario::new("ok", sensor_config()).with_step(Step::expect_none()),
            Scenario::new("bad", json!({"sensors": [{"sensor_id": 1}]}))
                .with_step(Step::expect_none()),
        ];
        let report = harness.run_suite(&sleeper(), &scenarios).await;
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.residual.is_none());
        assert!(!report.is_success());
        let failure = report.outcomes[1].result.as_ref().unwrap_err();
        assert_eq!(failure.kind(), "config");
    }
}
