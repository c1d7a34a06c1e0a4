//! Black-box test harness for an SNMP monitoring agent.
//!
//! The harness materializes a per-run agent config, starts a mock SNMP
//! responder for polled values, launches the agent-under-test, injects traps
//! and verifies the JSON records the agent publishes to its output topic.
//!
//! [`orchestrator::Harness`] ties the pieces together; each component is
//! usable on its own.

pub mod agent;
pub mod agent_config;
pub mod alloc;
pub mod bus;
pub mod error;
pub mod injector;
pub mod logging;
pub mod orchestrator;
pub mod responder;
pub mod scenario;
pub mod scenarios;
pub mod settings;
pub mod snmp;
pub mod verifier;

pub use bus::{KafkaBus, MemoryBus, MessageBus, TopicConsumer};
pub use error::{HarnessError, Result};
pub use orchestrator::{Harness, ScenarioOutcome, SuiteReport, TestReport};
pub use scenario::{Scenario, Step};
pub use settings::{HarnessSettings, SettingsOverrides, resolve_settings};
pub use verifier::{ExpectedMessage, FieldExpectation, MessageVerifier};
