//! Scenario documents.
//!
//! ```json
//! {
//!   "name": "cold start",
//!   "config": {"conf": {"snmp_traps": {}}},
//!   "steps": [
//!     {"trap": {"version": "v2c", "generic": "coldStart"},
//!      "messages": [{"monitor": "SNMPv2-MIB::coldStart", "value": "1.000000"}]}
//!   ]
//! }
//! ```
//!
//! A step without `messages` skips verification; `"messages": []` asserts
//! that nothing arrives.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarnessError, Result};
use crate::responder::ResponderMap;
use crate::snmp::TrapSpec;
use crate::verifier::ExpectedMessage;

/// One test run: a config fragment, optional responder data and the steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Agent config fragment, completed by the materializer.
    pub config: Value,
    /// Values the mock responder serves. No responder is started without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<ResponderMap>,
    pub steps: Vec<Step>,
}

/// An optional trap to inject followed by an optional verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap: Option<TrapSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ExpectedMessage>>,
}

impl Step {
    /// Verify exactly these messages.
    pub fn expect(messages: Vec<ExpectedMessage>) -> Self {
        Self {
            trap: None,
            messages: Some(messages),
        }
    }

    /// Verify that no message arrives.
    pub fn expect_none() -> Self {
        Self::expect(Vec::new())
    }

    /// Inject `trap`, then verify `messages`.
    pub fn trap(trap: TrapSpec, messages: Vec<ExpectedMessage>) -> Self {
        Self {
            trap: Some(trap),
            messages: Some(messages),
        }
    }

    pub fn has_trap(&self) -> bool {
        self.trap.is_some()
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
            responses: None,
            steps: Vec::new(),
        }
    }

    pub fn with_responses(mut self, responses: ResponderMap) -> Self {
        self.responses = Some(responses);
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Structural checks that need no process.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::config("scenario has no name"));
        }
        if !self.config.is_object() {
            return Err(HarnessError::config(format!(
                "scenario '{}': config must be a JSON object",
                self.name
            )));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::config(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        Ok(())
    }

    /// Load and validate a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("reading scenario {}", path.display()), e))?;
        let scenario: Self = serde_json::from_str(&contents)
            .map_err(|e| HarnessError::json(format!("parsing scenario {}", path.display()), e))?;
        scenario.validate()?;
        Ok(scenario)
    }
}
