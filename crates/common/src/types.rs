use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Channel {
    /// All channels, in a stable order.
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::WhatsApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a channel tag names no known channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "whatsapp" => Ok(Channel::WhatsApp),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}

/// Lifecycle status of a notification log.
///
/// `Pending` is the only non-terminal state. Every other status is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
    Unsupported,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "PENDING"),
            NotificationStatus::Sent => write!(f, "SENT"),
            NotificationStatus::Failed => write!(f, "FAILED"),
            NotificationStatus::Skipped => write!(f, "SKIPPED"),
            NotificationStatus::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// Durable record of one accepted notification request.
///
/// `channel` is kept as the raw tag so rows written with a tag this build
/// does not know about can still be loaded and closed out.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationLog {
    pub id: i64,
    pub user_id: String,
    pub channel: String,
    pub message: String,
    pub recipient: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationLog {
    pub fn parsed_channel(&self) -> Result<Channel, UnknownChannel> {
        self.channel.parse()
    }
}

/// Fields needed to create a new log row. The store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: String,
    pub channel: Channel,
    pub message: String,
    pub recipient: String,
}

/// A user's opt-in flag for one channel.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Preference {
    pub user_id: String,
    pub channel: String,
    pub enabled: bool,
}

/// Preference as exchanged over the preference endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub channel: String,
    pub enabled: bool,
}

impl From<Preference> for ChannelPreference {
    fn from(p: Preference) -> Self {
        Self {
            channel: p.channel,
            enabled: p.enabled,
        }
    }
}

/// Returns true only when an explicit, enabled preference exists for `channel`.
///
/// Missing records and unknown tags both count as "not opted in".
pub fn is_opted_in(preferences: &[ChannelPreference], channel: &str) -> bool {
    preferences
        .iter()
        .any(|p| p.enabled && p.channel.eq_ignore_ascii_case(channel))
}

/// Queue payload. Carries only the log identity; the worker reloads the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub notification_log_id: i64,
}

impl DispatchMessage {
    pub fn new(notification_log_id: i64) -> Self {
        Self {
            notification_log_id,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Incoming ingestion request body.
///
/// `type` is accepted as an alias of `channel`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, alias = "type")]
    pub channel: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub recipient: String,
}
