//! Ingestion gateway: the only way notifications enter the pipeline.
//!
//! `submit` runs, in order and stopping at the first failure:
//! 1. request validation
//! 2. per-client rate limiting
//! 3. opt-in check against the preference store
//! 4. `PENDING` log insert
//! 5. dispatch message publish (log marked `FAILED` if this fails)
//!
//! The log row is written before the message is published because the
//! worker looks it up by id as soon as it consumes the message.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use herald_common::error::AppError;
use herald_common::queue::DispatchQueue;
use herald_common::store::{NotificationLogStore, PreferenceStore};
use herald_common::types::{
    Channel, DispatchMessage, NewNotification, NotificationRequest, NotificationStatus,
    is_opted_in,
};

use crate::rate_limiter::RateLimiter;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Response for an accepted request. Delivery happens later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub status: &'static str,
    pub log_id: i64,
}

impl Accepted {
    fn new(log_id: i64) -> Self {
        Self {
            status: "Notification accepted",
            log_id,
        }
    }
}

pub struct IngestionGateway {
    logs: Arc<dyn NotificationLogStore>,
    preferences: Arc<dyn PreferenceStore>,
    queue: Arc<dyn DispatchQueue>,
    limiter: Arc<dyn RateLimiter>,
    dependency_timeout: Duration,
}

impl IngestionGateway {
    pub fn new(
        logs: Arc<dyn NotificationLogStore>,
        preferences: Arc<dyn PreferenceStore>,
        queue: Arc<dyn DispatchQueue>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            logs,
            preferences,
            queue,
            limiter,
            dependency_timeout: Duration::from_secs(5),
        }
    }

    /// Upper bound for each external call made while a client is waiting.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Accept a notification request for asynchronous delivery.
    pub async fn submit(
        &self,
        request: &NotificationRequest,
        client_key: &str,
    ) -> Result<Accepted, AppError> {
        let notification = validate(request)?;

        if !self
            .bounded("rate limiter", self.limiter.allow(client_key))
            .await?
        {
            tracing::warn!(client = %client_key, "Rejected request: rate limit exceeded");
            return Err(AppError::RateLimited);
        }

        let preferences = self
            .bounded("preference lookup", self.preferences.list(&notification.user_id))
            .await?;
        if !is_opted_in(&preferences, notification.channel.as_str()) {
            tracing::info!(
                user_id = %notification.user_id,
                channel = %notification.channel,
                "Rejected request: user has not opted in"
            );
            return Err(AppError::NotOptedIn {
                user_id: notification.user_id,
                channel: notification.channel.to_string(),
            });
        }

        let log = self.logs.create(&notification).await.map_err(|e| {
            tracing::error!(
                error = %e,
                user_id = %notification.user_id,
                "Failed to save notification log"
            );
            e
        })?;

        let published = self
            .bounded("queue publish", async {
                self.queue
                    .publish(&DispatchMessage::new(log.id))
                    .await
                    .map_err(AppError::from)
            })
            .await;

        if let Err(e) = published {
            tracing::error!(log_id = log.id, error = %e, "Failed to publish dispatch message");
            // Best effort: the caller gets the publish error either way.
            if let Err(mark_err) = self.logs.finalize(log.id, NotificationStatus::Failed).await {
                tracing::warn!(
                    log_id = log.id,
                    error = %mark_err,
                    "Could not mark unpublished notification as FAILED"
                );
            }
            return Err(e);
        }

        tracing::info!(
            log_id = log.id,
            user_id = %log.user_id,
            channel = %log.channel,
            "Notification logged and queued"
        );

        Ok(Accepted::new(log.id))
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.dependency_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TransientDependency(format!(
                "{} timed out after {}ms",
                what,
                self.dependency_timeout.as_millis()
            ))),
        }
    }
}

/// Check the request shape and turn it into a storable notification.
pub fn validate(request: &NotificationRequest) -> Result<NewNotification, AppError> {
    let user_id = required("user_id", &request.user_id)?;
    let channel_tag = required("channel", &request.channel)?;
    let message = required("message", &request.message)?;
    let recipient = required("recipient", &request.recipient)?;

    let channel: Channel = channel_tag.parse().map_err(|_| {
        AppError::Validation(format!(
            "Invalid channel '{}'. Valid channels: sms, email, whatsapp",
            channel_tag
        ))
    })?;

    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let valid_recipient = match channel {
        Channel::Email => looks_like_email(recipient),
        Channel::Sms | Channel::WhatsApp => looks_like_phone_number(recipient),
    };
    if !valid_recipient {
        return Err(AppError::Validation(format!(
            "recipient '{}' is not a valid {} address",
            recipient, channel
        )));
    }

    Ok(NewNotification {
        user_id: user_id.to_string(),
        channel,
        message: message.to_string(),
        recipient: recipient.to_string(),
    })
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value)
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// E.164-style: optional leading `+`, then 7 to 15 digits.
fn looks_like_phone_number(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::queue::MemoryDispatchQueue;
    use herald_common::store::{MemoryNotificationLogStore, MemoryPreferenceStore};

    use crate::rate_limiter::{MemoryRateLimiter, RateLimitPolicy};

    struct Harness {
        logs: Arc<MemoryNotificationLogStore>,
        preferences: Arc<MemoryPreferenceStore>,
        queue: Arc<MemoryDispatchQueue>,
        gateway: IngestionGateway,
    }

    fn harness(limit: u64) -> Harness {
        let logs = Arc::new(MemoryNotificationLogStore::new());
        let preferences = Arc::new(MemoryPreferenceStore::new());
        let queue = Arc::new(MemoryDispatchQueue::new());
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimitPolicy::new(
            limit,
            Duration::from_secs(60),
        )));
        let gateway = IngestionGateway::new(
            logs.clone(),
            preferences.clone(),
            queue.clone(),
            limiter,
        );
        Harness {
            logs,
            preferences,
            queue,
            gateway,
        }
    }

    fn email_request() -> NotificationRequest {
        NotificationRequest {
            user_id: "U".to_string(),
            channel: "email".to_string(),
            message: "hi".to_string(),
            recipient: "u@x.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_accepted_request_creates_one_pending_log_and_message() {
        let h = harness(20);
        h.preferences.set("U", "email", true).await;

        let accepted = h.gateway.submit(&email_request(), "client").await.unwrap();
        assert_eq!(accepted.status, "Notification accepted");

        let logs = h.logs.all().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, accepted.log_id);
        assert_eq!(logs[0].status, NotificationStatus::Pending);

        assert_eq!(h.queue.ready_len().await, 1);
        let delivery = h
            .queue
            .next_delivery(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            DispatchMessage::decode(&delivery.payload).unwrap(),
            DispatchMessage::new(accepted.log_id)
        );
    }

    #[tokio::test]
    async fn test_not_opted_in_creates_no_log() {
        let h = harness(20);
        h.preferences.set("U", "email", false).await;
        h.preferences.set("U", "sms", true).await;

        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();
        assert!(matches!(err, AppError::NotOptedIn { .. }));
        assert!(h.logs.all().await.is_empty());
        assert_eq!(h.queue.ready_len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_opted_in() {
        let h = harness(20);
        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();
        assert!(matches!(err, AppError::NotOptedIn { .. }));
    }

    #[tokio::test]
    async fn test_validation_runs_before_rate_limit() {
        let h = harness(1);
        h.preferences.set("U", "email", true).await;

        let mut bad = email_request();
        bad.message = "   ".to_string();
        for _ in 0..3 {
            let err = h.gateway.submit(&bad, "client").await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }

        // Invalid requests did not consume the client's budget.
        assert!(h.gateway.submit(&email_request(), "client").await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_without_side_effects() {
        let h = harness(2);
        h.preferences.set("U", "email", true).await;

        h.gateway.submit(&email_request(), "client").await.unwrap();
        h.gateway.submit(&email_request(), "client").await.unwrap();
        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();

        assert!(matches!(err, AppError::RateLimited));
        assert_eq!(h.logs.all().await.len(), 2);
        assert_eq!(h.queue.ready_len().await, 2);
    }

    #[tokio::test]
    async fn test_preference_outage_is_internal_error() {
        let h = harness(20);
        h.preferences.set_unavailable(true);

        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();
        assert!(err.is_internal());
        assert!(h.logs.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_log_write_failure_publishes_nothing() {
        let h = harness(20);
        h.preferences.set("U", "email", true).await;
        h.logs.set_fail_writes(true);

        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();
        assert!(err.is_internal());
        assert_eq!(h.queue.ready_len().await, 0);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_log_failed() {
        let h = harness(20);
        h.preferences.set("U", "email", true).await;
        h.queue.set_fail_publish(true);

        let err = h.gateway.submit(&email_request(), "client").await.unwrap_err();
        assert!(err.is_internal());

        let logs = h.logs.all().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, NotificationStatus::Failed);
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut req = email_request();
        req.user_id = String::new();
        assert!(matches!(validate(&req), Err(AppError::Validation(m)) if m.contains("user_id")));

        let mut req = email_request();
        req.recipient = " ".to_string();
        assert!(matches!(validate(&req), Err(AppError::Validation(m)) if m.contains("recipient")));
    }

    #[test]
    fn test_validate_rejects_unknown_channel() {
        let mut req = email_request();
        req.channel = "pigeon".to_string();
        assert!(matches!(validate(&req), Err(AppError::Validation(m)) if m.contains("pigeon")));
    }

    #[test]
    fn test_validate_checks_recipient_per_channel() {
        let mut req = email_request();
        req.recipient = "not-an-email".to_string();
        assert!(validate(&req).is_err());

        req.channel = "sms".to_string();
        req.recipient = "+14155550123".to_string();
        assert_eq!(validate(&req).unwrap().channel, Channel::Sms);

        req.channel = "whatsapp".to_string();
        req.recipient = "u@x.com".to_string();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_validate_limits_message_length() {
        let mut req = email_request();
        req.message = "a".repeat(MAX_MESSAGE_CHARS);
        assert!(validate(&req).is_ok());
        req.message.push('a');
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_validate_trims_fields() {
        let mut req = email_request();
        req.user_id = "  U  ".to_string();
        req.channel = "EMAIL".to_string();
        let n = validate(&req).unwrap();
        assert_eq!(n.user_id, "U");
        assert_eq!(n.channel, Channel::Email);
    }

    #[test]
    fn test_phone_and_email_shapes() {
        assert!(looks_like_phone_number("+919876543210"));
        assert!(looks_like_phone_number("5550123"));
        assert!(!looks_like_phone_number("+1-415-555"));
        assert!(!looks_like_phone_number("+1234"));
        assert!(looks_like_email("a.b@example.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a@@b.com"));
        assert!(!looks_like_email("a b@c.com"));
    }
}
