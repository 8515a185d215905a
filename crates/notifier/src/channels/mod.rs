//! Notification channels.
//!
//! Every channel implements the single capability `ChannelSender::send`.
//! The dispatch processor picks a sender by `Channel` through the
//! `ChannelRegistry` and knows nothing about the providers behind it:
//! - SMS and WhatsApp go through the Twilio Messages API
//! - Email goes out over authenticated SMTP

mod email;
mod sms;
mod twilio;
mod whatsapp;

pub use email::EmailSender;
pub use sms::SmsSender;
pub use twilio::TwilioClient;
pub use whatsapp::WhatsAppSender;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use herald_common::config::AppConfig;
use herald_common::types::Channel;

/// Why a send attempt failed.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("{0} channel is not configured")]
    NotConfigured(Channel),

    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),

    /// The provider refused the message. Retrying will not help.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// Network failure or provider-side error. May succeed on retry.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transport(_))
    }
}

/// A delivery channel backed by a third-party provider.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError>;
}

/// Maps each channel to its configured sender.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under the channel it reports. Replaces any earlier one.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    /// Build senders for every channel whose credentials are present.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        match (&config.twilio_account_sid, &config.twilio_auth_token) {
            (Some(sid), Some(token)) => {
                let twilio = TwilioClient::new(sid.clone(), token.clone())?;
                if let Some(from) = &config.twilio_phone_number {
                    registry = registry.with_sender(Arc::new(SmsSender::new(twilio.clone(), from)));
                }
                if let Some(from) = &config.twilio_whatsapp_number {
                    registry = registry.with_sender(Arc::new(WhatsAppSender::new(twilio, from)));
                }
            }
            _ => tracing::warn!("Twilio credentials missing; SMS and WhatsApp are disabled"),
        }

        match (&config.smtp_username, &config.smtp_password) {
            (Some(username), Some(password)) => {
                let from = config.email_from.as_deref().unwrap_or(username);
                let email = EmailSender::starttls(
                    &config.smtp_host,
                    config.smtp_port,
                    username,
                    password,
                    from,
                    &config.email_subject,
                )?;
                registry = registry.with_sender(Arc::new(email));
            }
            _ => tracing::warn!("SMTP credentials missing; email is disabled"),
        }

        let configured: Vec<&str> = Channel::ALL
            .iter()
            .filter(|c| registry.is_configured(**c))
            .map(|c| c.as_str())
            .collect();
        tracing::info!(channels = ?configured, "Channel senders configured");

        Ok(registry)
    }

    pub fn is_configured(&self, channel: Channel) -> bool {
        self.senders.contains_key(&channel)
    }

    /// Send through the sender registered for `channel`.
    pub async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        body: &str,
    ) -> Result<(), SendError> {
        match self.senders.get(&channel) {
            Some(sender) => sender.send(recipient, body).await,
            None => Err(SendError::NotConfigured(channel)),
        }
    }
}
