//! Per-message dispatch state machine.
//!
//! For each delivery:
//! 1. Decode the payload (malformed → discard)
//! 2. Load the log (missing → discard, store error → requeue)
//! 3. Drop duplicates: a log already in flight here, or already terminal
//! 4. Re-check preferences (store error → requeue, log stays PENDING)
//! 5. Not opted in → SKIPPED; unknown channel tag → UNSUPPORTED
//! 6. Send through the channel registry → SENT or FAILED
//! 7. Persist the terminal status with compare-and-set, then ack

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use herald_common::store::{NotificationLogStore, PreferenceStore};
use herald_common::types::{DispatchMessage, NotificationLog, NotificationStatus, is_opted_in};

use crate::channels::ChannelRegistry;
use crate::retry::SendPolicy;

/// What to do with the delivery once processing is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Nack without requeue.
    Discard,
    /// Nack with requeue.
    Requeue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A terminal status was decided. `recorded` is false when the status
    /// write failed and the log was left PENDING.
    Finished {
        status: NotificationStatus,
        recorded: bool,
    },
    /// The log is already terminal or already being processed.
    Duplicate,
    /// Payload could not be decoded.
    Malformed,
    /// The referenced log does not exist.
    NotFound,
    /// A dependency failed before any terminal decision.
    Retry(String),
}

impl DispatchOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            DispatchOutcome::Finished { .. } | DispatchOutcome::Duplicate => Disposition::Ack,
            DispatchOutcome::Malformed | DispatchOutcome::NotFound => Disposition::Discard,
            DispatchOutcome::Retry(_) => Disposition::Requeue,
        }
    }
}

pub struct DispatchProcessor {
    logs: Arc<dyn NotificationLogStore>,
    preferences: Arc<dyn PreferenceStore>,
    channels: ChannelRegistry,
    send_policy: SendPolicy,
    in_flight: Mutex<HashSet<i64>>,
}

/// Releases an in-flight claim when processing ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl DispatchProcessor {
    pub fn new(
        logs: Arc<dyn NotificationLogStore>,
        preferences: Arc<dyn PreferenceStore>,
        channels: ChannelRegistry,
    ) -> Self {
        Self {
            logs,
            preferences,
            channels,
            send_policy: SendPolicy::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    fn claim(&self, id: i64) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(id).then(|| InFlight {
            set: &self.in_flight,
            id,
        })
    }

    /// Run one delivery payload through the state machine.
    pub async fn process(&self, payload: &str) -> DispatchOutcome {
        let message = match DispatchMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %payload,
                    "Discarding malformed dispatch message"
                );
                return DispatchOutcome::Malformed;
            }
        };
        let id = message.notification_log_id;

        let Some(_claim) = self.claim(id) else {
            tracing::info!(log_id = id, "Log already in flight, dropping duplicate delivery");
            return DispatchOutcome::Duplicate;
        };

        let log = match self.logs.get(id).await {
            Ok(Some(log)) => log,
            Ok(None) => {
                tracing::error!(log_id = id, "Notification log not found, discarding message");
                return DispatchOutcome::NotFound;
            }
            Err(e) => {
                tracing::warn!(log_id = id, error = %e, "Log lookup failed, will retry");
                return DispatchOutcome::Retry(e.to_string());
            }
        };

        if log.status.is_terminal() {
            tracing::info!(
                log_id = id,
                status = %log.status,
                "Log already finalized, skipping redelivery"
            );
            return DispatchOutcome::Duplicate;
        }

        let preferences = match self.preferences.list(&log.user_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    log_id = id,
                    user_id = %log.user_id,
                    error = %e,
                    "Preference lookup failed, will retry"
                );
                return DispatchOutcome::Retry(e.to_string());
            }
        };

        let status = self.decide(&log, is_opted_in(&preferences, &log.channel)).await;
        let recorded = self.record(id, status).await;

        DispatchOutcome::Finished { status, recorded }
    }

    async fn decide(&self, log: &NotificationLog, opted_in: bool) -> NotificationStatus {
        if !opted_in {
            tracing::info!(
                log_id = log.id,
                user_id = %log.user_id,
                channel = %log.channel,
                "User not opted in, skipping"
            );
            return NotificationStatus::Skipped;
        }

        let channel = match log.parsed_channel() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(log_id = log.id, error = %e, "No sender for channel");
                return NotificationStatus::Unsupported;
            }
        };

        let result = self
            .send_policy
            .run(|attempt| {
                tracing::debug!(log_id = log.id, channel = %channel, attempt, "Sending");
                self.channels.send(channel, &log.recipient, &log.message)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(log_id = log.id, channel = %channel, "Notification sent");
                NotificationStatus::Sent
            }
            Err(e) => {
                tracing::error!(
                    log_id = log.id,
                    channel = %channel,
                    error = %e,
                    "Notification send failed"
                );
                NotificationStatus::Failed
            }
        }
    }

    async fn record(&self, id: i64, status: NotificationStatus) -> bool {
        match self.logs.finalize(id, status).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    log_id = id,
                    status = %status,
                    "Log was finalized concurrently, keeping existing status"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    log_id = id,
                    status = %status,
                    error = %e,
                    "Failed to record terminal status; log left PENDING"
                );
                false
            }
        }
    }
}
