//! Message bus seam.
//!
//! [`MessageBus`] opens [`TopicConsumer`]s; the verifier only ever talks to
//! these traits. [`KafkaBus`] is the production implementation and
//! [`MemoryBus`] is an in-process stand-in for tests.
//!
//! Both traits are blocking; async callers run them on the blocking pool.

mod kafka;
mod memory;

use std::time::Duration;

use crate::error::Result;

pub use kafka::KafkaBus;
pub use memory::MemoryBus;

/// Reads one topic from its earliest retained message onwards.
pub trait TopicConsumer: Send {
    /// Next payload, or `None` if nothing arrives within `idle`.
    fn next_message(&mut self, idle: Duration) -> Result<Option<Vec<u8>>>;
}

/// Source of topic consumers.
pub trait MessageBus: Send + Sync {
    fn consumer(&self, topic: &str) -> Result<Box<dyn TopicConsumer>>;
}
