//! In-process bus for tests.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::{MessageBus, TopicConsumer};
use crate::error::Result;

#[derive(Debug, Default)]
struct Shared {
    topics: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    published: Condvar,
}

/// Topics kept in memory; every consumer reads its topic from the start.
///
/// Clones share the same topics, so a test can hand one clone to the harness
/// and publish through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to `topic` and wake waiting consumers.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let mut topics = self
            .shared
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(topic.to_string())
            .or_default()
            .push(payload.into());
        self.shared.published.notify_all();
    }

    /// Number of payloads ever published to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        let topics = self
            .shared
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).map_or(0, Vec::len)
    }
}

impl MessageBus for MemoryBus {
    fn consumer(&self, topic: &str) -> Result<Box<dyn TopicConsumer>> {
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            offset: 0,
        }))
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    topic: String,
    offset: usize,
}

impl TopicConsumer for MemoryConsumer {
    fn next_message(&mut self, idle: Duration) -> Result<Option<Vec<u8>>> {
        let topics = self
            .shared
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (topics, _) = self
            .shared
            .published
            .wait_timeout_while(topics, idle, |topics| {
                topics.get(&self.topic).map_or(0, Vec::len) <= self.offset
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let payload = topics
            .get(&self.topic)
            .and_then(|messages| messages.get(self.offset))
            .cloned();
        if payload.is_some() {
            self.offset += 1;
        }
        Ok(payload)
    }
}
