//! Durable dispatch queue port.
//!
//! The queue carries only `DispatchMessage` payloads (a log id). Delivery is
//! at-least-once: a message stays owned by its consumer until it is either
//! acknowledged or negatively acknowledged, and anything left unacknowledged
//! when a consumer dies is handed out again.

mod memory;
mod redis_list;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::DispatchMessage;

pub use self::memory::MemoryDispatchQueue;
pub use self::redis_list::RedisDispatchQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

/// One message handed to a consumer, owned until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Raw payload exactly as published. May be malformed.
    pub payload: String,
    tag: u64,
}

impl Delivery {
    pub(crate) fn new(tag: u64, payload: String) -> Self {
        Self { payload, tag }
    }

    /// Consumer-local delivery tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Durably enqueue a message. Returns once the broker has accepted it.
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message.
    async fn next_delivery(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Permanently remove a delivered message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivered message. With `requeue` it is delivered again later,
    /// otherwise it is discarded (moved to the dead-letter list).
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;
}
