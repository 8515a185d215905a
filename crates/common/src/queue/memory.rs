use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, DispatchQueue, QueueError};
use crate::types::DispatchMessage;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    in_flight: HashMap<u64, String>,
    dead: Vec<String>,
    acked: Vec<String>,
    next_tag: u64,
}

/// In-process queue with the same ownership rules as the Redis queue:
/// a delivered message is in flight until acked or nacked.
#[derive(Default)]
pub struct MemoryDispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    fail_publish: AtomicBool,
    failing_settles: AtomicU32,
}

impl MemoryDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `publish` fail as if the broker were down.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` acks or nacks fail, leaving the message in flight.
    pub fn fail_next_settles(&self, count: u32) {
        self.failing_settles.store(count, Ordering::SeqCst);
    }

    /// Enqueue an arbitrary payload, bypassing encoding.
    pub async fn publish_raw(&self, payload: impl Into<String>) {
        self.state.lock().await.ready.push_back(payload.into());
        self.notify.notify_one();
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    pub async fn dead_letters(&self) -> Vec<String> {
        self.state.lock().await.dead.clone()
    }

    /// Simulate a consumer crash: everything in flight goes back to the ready list.
    pub async fn recover(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut tags: Vec<u64> = state.in_flight.keys().copied().collect();
        tags.sort_unstable();
        let moved = tags.len();
        for tag in tags.into_iter().rev() {
            if let Some(payload) = state.in_flight.remove(&tag) {
                state.ready.push_front(payload);
            }
        }
        drop(state);
        for _ in 0..moved {
            self.notify.notify_one();
        }
        moved
    }

    async fn take(&self, tag: u64) -> Result<String, QueueError> {
        let injected = self
            .failing_settles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(QueueError::Unavailable("broker unreachable".to_string()));
        }

        self.state
            .lock()
            .await
            .in_flight
            .remove(&tag)
            .ok_or_else(|| QueueError::Unavailable(format!("unknown delivery tag {}", tag)))
    }
}

#[async_trait]
impl DispatchQueue for MemoryDispatchQueue {
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker unreachable".to_string()));
        }
        self.publish_raw(message.encode()?).await;
        Ok(())
    }

    async fn next_delivery(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.ready.pop_front() {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    state.in_flight.insert(tag, payload.clone());
                    return Ok(Some(Delivery::new(tag, payload)));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let payload = self.take(delivery.tag()).await?;
        self.state.lock().await.acked.push(payload);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let payload = self.take(delivery.tag()).await?;
        let mut state = self.state.lock().await;
        if requeue {
            state.ready.push_front(payload);
            drop(state);
            self.notify.notify_one();
        } else {
            state.dead.push(payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_is_in_flight_until_acked() {
        let queue = MemoryDispatchQueue::new();
        queue.publish(&DispatchMessage::new(1)).await.unwrap();

        let delivery = queue
            .next_delivery(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.ready_len().await, 0);
        assert_eq!(queue.in_flight_len().await, 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(queue.acked().await.len(), 1);
        assert!(queue.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_requeue_and_discard() {
        let queue = MemoryDispatchQueue::new();
        queue.publish_raw("a").await;

        let first = queue.next_delivery(Duration::from_millis(50)).await.unwrap().unwrap();
        queue.nack(&first, true).await.unwrap();
        assert_eq!(queue.ready_len().await, 1);

        let second = queue.next_delivery(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(second.payload, "a");
        assert_ne!(first.tag(), second.tag());
        queue.nack(&second, false).await.unwrap();
        assert_eq!(queue.ready_len().await, 0);
        assert_eq!(queue.dead_letters().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_next_delivery_times_out_when_empty() {
        let queue = MemoryDispatchQueue::new();
        let got = queue.next_delivery(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_publish_wakes_waiting_consumer() {
        let queue = std::sync::Arc::new(MemoryDispatchQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next_delivery(Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.publish(&DispatchMessage::new(9)).await.unwrap();

        let delivery = waiter.await.unwrap().unwrap();
        assert_eq!(
            DispatchMessage::decode(&delivery.payload).unwrap().notification_log_id,
            9
        );
    }

    #[tokio::test]
    async fn test_recover_returns_unacked_messages() {
        let queue = MemoryDispatchQueue::new();
        queue.publish_raw("a").await;
        queue.publish_raw("b").await;
        let _a = queue.next_delivery(Duration::from_millis(50)).await.unwrap().unwrap();
        let _b = queue.next_delivery(Duration::from_millis(50)).await.unwrap().unwrap();

        assert_eq!(queue.recover().await, 2);
        let again = queue.next_delivery(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(again.payload, "a");
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let queue = MemoryDispatchQueue::new();
        queue.set_fail_publish(true);
        assert!(queue.publish(&DispatchMessage::new(1)).await.is_err());
        assert_eq!(queue.ready_len().await, 0);
    }
}
