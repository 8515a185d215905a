//! Redis reliable-list queue.
//!
//! Layout for a queue named `notifications`:
//! - `notifications` — ready messages, `LPUSH`ed by producers, consumed from the right
//! - `notifications:processing:<consumer>` — messages owned by one consumer
//! - `notifications:dead` — discarded payloads, capped at `DEAD_LETTER_CAP`
//!
//! `BLMOVE` moves a message into the processing list atomically, so a consumer
//! crash leaves it there until `recover` puts it back on the ready list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{Delivery, DispatchQueue, QueueError};
use crate::types::DispatchMessage;

/// Maximum number of payloads kept on the dead-letter list.
const DEAD_LETTER_CAP: isize = 10_000;

/// Smallest `BLMOVE` timeout; zero would block forever.
const MIN_BLOCK_SECS: f64 = 0.1;

pub struct RedisDispatchQueue {
    conn: ConnectionManager,
    blocking_conn: Option<ConnectionManager>,
    queue: String,
    processing: String,
    dead: String,
    next_tag: AtomicU64,
}

impl RedisDispatchQueue {
    /// A queue handle usable for publishing (and, less efficiently, consuming).
    pub fn new(conn: ConnectionManager, queue: impl Into<String>, consumer_id: &str) -> Self {
        let queue = queue.into();
        Self {
            conn,
            blocking_conn: None,
            processing: format!("{}:processing:{}", queue, consumer_id),
            dead: format!("{}:dead", queue),
            queue,
            next_tag: AtomicU64::new(1),
        }
    }

    /// Use a dedicated connection for the blocking consume call so acks and
    /// publishes are not stuck behind it.
    pub fn with_blocking_connection(mut self, conn: ConnectionManager) -> Self {
        self.blocking_conn = Some(conn);
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Return everything left in this consumer's processing list to the ready list.
    ///
    /// Call once at startup, before consuming. Oldest entries are redelivered first.
    /// Only this consumer's own list is swept, so a replacement process must
    /// reuse the consumer id of the one it replaces.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut moved = 0usize;

        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;

            match payload {
                Some(_) => moved += 1,
                None => break,
            }
        }

        if moved > 0 {
            tracing::warn!(
                queue = %self.queue,
                processing = %self.processing,
                moved,
                "Recovered unacknowledged messages from a previous run"
            );
        }

        Ok(moved)
    }

    /// Number of messages waiting to be consumed.
    pub async fn ready_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(&self.queue)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[async_trait]
impl DispatchQueue for RedisDispatchQueue {
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queue)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn next_delivery(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self
            .blocking_conn
            .clone()
            .unwrap_or_else(|| self.conn.clone());

        let payload: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query_async(&mut conn)
            .await?;

        Ok(payload.map(|p| Delivery::new(self.next_tag.fetch_add(1, Ordering::Relaxed), p)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.payload)
            .ignore();

        if requeue {
            // Back on the consuming end so it is retried before newer work.
            pipe.cmd("RPUSH")
                .arg(&self.queue)
                .arg(&delivery.payload)
                .ignore();
        } else {
            pipe.cmd("LPUSH")
                .arg(&self.dead)
                .arg(&delivery.payload)
                .ignore()
                .cmd("LTRIM")
                .arg(&self.dead)
                .arg(0)
                .arg(DEAD_LETTER_CAP - 1)
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
