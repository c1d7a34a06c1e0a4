//! Kafka-backed bus.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use kafka::consumer::{Consumer, FetchOffset};
use tracing::{debug, info};

use super::{MessageBus, TopicConsumer};
use crate::error::{HarnessError, Result};

const FETCH_MAX_WAIT: Duration = Duration::from_millis(250);
const CONNECT_RETRY: Duration = Duration::from_millis(500);

/// Consumes from a Kafka cluster without a consumer group.
///
/// Every consumer starts at the earliest retained offset, so a topic can be
/// re-read from the start by opening a new consumer.
#[derive(Debug, Clone)]
pub struct KafkaBus {
    hosts: Vec<String>,
    client_id: String,
}

impl KafkaBus {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            client_id: "monitor-harness".to_string(),
        }
    }
}

impl MessageBus for KafkaBus {
    fn consumer(&self, topic: &str) -> Result<Box<dyn TopicConsumer>> {
        if self.hosts.is_empty() {
            return Err(HarnessError::Bus {
                topic: topic.to_string(),
                message: "no broker hosts configured".to_string(),
            });
        }
        Ok(Box::new(KafkaTopicConsumer {
            hosts: self.hosts.clone(),
            client_id: self.client_id.clone(),
            topic: topic.to_string(),
            consumer: None,
            pending: VecDeque::new(),
        }))
    }
}

/// Connects lazily: the agent creates its topic on first produce, so the
/// topic may not exist yet when verification starts.
struct KafkaTopicConsumer {
    hosts: Vec<String>,
    client_id: String,
    topic: String,
    consumer: Option<Consumer>,
    pending: VecDeque<Vec<u8>>,
}

impl KafkaTopicConsumer {
    fn connect(&self) -> kafka::Result<Consumer> {
        Consumer::from_hosts(self.hosts.clone())
            .with_client_id(self.client_id.clone())
            .with_topic(self.topic.clone())
            .with_fallback_offset(FetchOffset::Earliest)
            .with_fetch_max_wait_time(FETCH_MAX_WAIT)
            .create()
    }

    fn bus_error(&self, e: kafka::Error) -> HarnessError {
        HarnessError::Bus {
            topic: self.topic.clone(),
            message: e.to_string(),
        }
    }
}

impl TopicConsumer for KafkaTopicConsumer {
    fn next_message(&mut self, idle: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + idle;
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if self.consumer.is_none() {
                match self.connect() {
                    Ok(consumer) => {
                        info!(topic = %self.topic, "kafka consumer attached");
                        self.consumer = Some(consumer);
                    }
                    Err(e) => {
                        debug!(topic = %self.topic, "kafka consumer not ready: {e}");
                        std::thread::sleep(CONNECT_RETRY.min(deadline - now));
                        continue;
                    }
                }
            }
            let Some(consumer) = self.consumer.as_mut() else {
                continue;
            };

            let sets = match consumer.poll() {
                Ok(sets) => sets,
                Err(e) => return Err(self.bus_error(e)),
            };
            let mut consumed = Vec::new();
            for set in sets.iter() {
                for message in set.messages() {
                    consumed.push(message.value.to_vec());
                }
                if let Err(e) = consumer.consume_messageset(set) {
                    return Err(self.bus_error(e));
                }
            }
            self.pending.extend(consumed);
        }
    }
}
