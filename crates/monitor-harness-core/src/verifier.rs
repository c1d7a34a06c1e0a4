//! Bounded consumption and checking of agent output messages.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::bus::{MessageBus, TopicConsumer};
use crate::error::{HarnessError, Result};
use crate::settings::Timeouts;

/// Expected state of one record field.
///
/// In JSON, `null` spells [`FieldExpectation::Absent`]; any other value must
/// match the record's field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldExpectation {
    Equals(Value),
    Absent,
}

impl From<Value> for FieldExpectation {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            other => Self::Equals(other),
        }
    }
}

impl From<FieldExpectation> for Value {
    fn from(expectation: FieldExpectation) -> Self {
        match expectation {
            FieldExpectation::Equals(value) => value,
            FieldExpectation::Absent => Value::Null,
        }
    }
}

/// Values are compared as text: strings by content, everything else by its
/// JSON rendering.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Template a consumed record is checked against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedMessage(BTreeMap<String, FieldExpectation>);

/// Why a record failed its template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: String,
    pub reason: String,
}

impl ExpectedMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to equal `value`.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0
            .insert(name.into(), FieldExpectation::Equals(value.into()));
        self
    }

    /// Require `name` to be missing from the record.
    pub fn absent(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), FieldExpectation::Absent);
        self
    }

    /// Set or clear a field depending on `value`.
    pub fn field_opt(self, name: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self.absent(name),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldExpectation> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check `record`; the first failing field is reported.
    pub fn check(&self, record: &Map<String, Value>) -> std::result::Result<(), FieldMismatch> {
        for (field, expectation) in &self.0 {
            let actual = record.get(field);
            let reason = match (expectation, actual) {
                (FieldExpectation::Absent, None) => continue,
                (FieldExpectation::Absent, Some(found)) => {
                    format!("must be absent, found {found}")
                }
                (FieldExpectation::Equals(expected), None) => {
                    format!("is missing, expected {expected}")
                }
                (FieldExpectation::Equals(expected), Some(found)) => {
                    if as_text(expected) == as_text(found) {
                        continue;
                    }
                    format!("expected {expected}, found {found}")
                }
            };
            return Err(FieldMismatch {
                field: field.clone(),
                reason,
            });
        }
        Ok(())
    }
}

type SharedConsumer = Arc<Mutex<Box<dyn TopicConsumer>>>;

fn lock(consumer: &SharedConsumer) -> std::sync::MutexGuard<'_, Box<dyn TopicConsumer>> {
    consumer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn render(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Pulls messages per topic and checks them against templates.
///
/// One consumer is opened per topic on first use and reused for the rest of
/// the session, so consecutive steps on a topic continue where the previous
/// one stopped.
pub struct MessageVerifier {
    bus: Arc<dyn MessageBus>,
    message_idle: Duration,
    silence_window: Duration,
    residual_window: Duration,
    consumers: Mutex<HashMap<String, SharedConsumer>>,
}

impl MessageVerifier {
    pub fn new(bus: Arc<dyn MessageBus>, timeouts: &Timeouts) -> Self {
        Self {
            bus,
            message_idle: timeouts.message_idle(),
            silence_window: timeouts.silence_window(),
            residual_window: timeouts.residual_window(),
            consumers: Mutex::new(HashMap::new()),
        }
    }

    fn consumer(&self, topic: &str) -> Result<SharedConsumer> {
        let mut consumers = self
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(consumer) = consumers.get(topic) {
            return Ok(Arc::clone(consumer));
        }
        let consumer = Arc::new(Mutex::new(self.bus.consumer(topic)?));
        consumers.insert(topic.to_string(), Arc::clone(&consumer));
        debug!(topic, "opened topic consumer");
        Ok(consumer)
    }

    /// Topics a consumer has been opened for.
    pub fn topics(&self) -> Vec<String> {
        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut topics: Vec<String> = consumers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Consume `expected.len()` messages from `topic` and check them in order.
    ///
    /// An empty `expected` listens for the silence window and fails on any
    /// message.
    pub async fn verify(&self, topic: &str, expected: &[ExpectedMessage]) -> Result<()> {
        let consumer = self.consumer(topic)?;
        let wanted = expected.len();
        let idle = if wanted == 0 {
            self.silence_window
        } else {
            self.message_idle
        };

        let task_topic = topic.to_string();
        let received = tokio::task::spawn_blocking(move || pull(&consumer, wanted, idle))
            .await
            .map_err(|e| HarnessError::Bus {
                topic: task_topic,
                message: format!("consumer task failed: {e}"),
            })??;

        check(topic, expected, &received)?;
        info!(topic, messages = wanted, "messages verified");
        Ok(())
    }

    /// End-of-suite check: no opened topic may yield another message.
    ///
    /// Topics are checked concurrently, one blocking task each.
    pub async fn assert_all_messages_consumed(&self) -> Result<()> {
        let opened: Vec<(String, SharedConsumer)> = {
            let consumers = self
                .consumers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            consumers
                .iter()
                .map(|(topic, consumer)| (topic.clone(), Arc::clone(consumer)))
                .collect()
        };
        if opened.is_empty() {
            return Ok(());
        }

        let window = self.residual_window;
        let mut checks = JoinSet::new();
        for (topic, consumer) in opened {
            checks.spawn_blocking(move || {
                let next = lock(&consumer).next_message(window);
                (topic, next)
            });
        }

        let mut residuals = Vec::new();
        while let Some(joined) = checks.join_next().await {
            let (topic, next) = joined.map_err(|e| HarnessError::Bus {
                topic: "*".to_string(),
                message: format!("residual check task failed: {e}"),
            })?;
            if let Some(payload) = next? {
                residuals.push((topic, render(&payload)));
            }
        }
        if residuals.is_empty() {
            Ok(())
        } else {
            residuals.sort();
            Err(HarnessError::ResidualMessage { residuals })
        }
    }
}

fn pull(consumer: &SharedConsumer, wanted: usize, idle: Duration) -> Result<Vec<Vec<u8>>> {
    let mut consumer = lock(consumer);
    // Listening for silence still needs one attempt.
    let attempts = wanted.max(1);
    let mut received = Vec::with_capacity(attempts);
    for _ in 0..attempts {
        match consumer.next_message(idle)? {
            Some(payload) => received.push(payload),
            None => break,
        }
    }
    Ok(received)
}

fn check(topic: &str, expected: &[ExpectedMessage], received: &[Vec<u8>]) -> Result<()> {
    if expected.is_empty() {
        if let Some(payload) = received.first() {
            return Err(HarnessError::UnexpectedMessage {
                topic: topic.to_string(),
                record: render(payload),
            });
        }
        return Ok(());
    }
    if received.len() != expected.len() {
        return Err(HarnessError::MessageCountMismatch {
            topic: topic.to_string(),
            expected: expected.len(),
            received: received.len(),
            records: format!(
                "[{}]",
                received.iter().map(|p| render(p)).collect::<Vec<_>>().join(", ")
            ),
        });
    }

    for (index, (template, payload)) in expected.iter().zip(received).enumerate() {
        let expected_text = serde_json::to_string(template)
            .map_err(|e| HarnessError::json("rendering expected message", e))?;
        let record = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(record)) => record,
            _ => {
                return Err(HarnessError::MessageFieldMismatch {
                    topic: topic.to_string(),
                    index,
                    field: "<record>".to_string(),
                    reason: "is not a JSON object".to_string(),
                    expected: expected_text,
                    actual: render(payload),
                });
            }
        };
        if let Err(mismatch) = template.check(&record) {
            return Err(HarnessError::MessageFieldMismatch {
                topic: topic.to_string(),
                index,
                field: mismatch.field,
                reason: mismatch.reason,
                expected: expected_text,
                actual: render(payload),
            });
        }
    }
    Ok(())
}
