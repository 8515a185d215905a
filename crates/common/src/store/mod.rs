//! Storage ports for notification logs and user preferences.
//!
//! Both the ingestion gateway and the dispatch workers receive these as
//! `Arc<dyn ...>` so the pipeline can run against PostgreSQL, a remote
//! preference service, or the in-memory doubles used in tests.

mod http;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::AppError;
use crate::types::{ChannelPreference, NewNotification, NotificationLog, NotificationStatus};

pub use http::HttpPreferenceStore;
pub use memory::{MemoryNotificationLogStore, MemoryPreferenceStore};
pub use postgres::{PgNotificationLogStore, PgPreferenceStore};

/// Durable record of every notification and its lifecycle status.
#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    /// Insert a new log in `PENDING`. The row is visible to readers once this returns.
    async fn create(&self, notification: &NewNotification) -> Result<NotificationLog, AppError>;

    async fn get(&self, id: i64) -> Result<Option<NotificationLog>, AppError>;

    /// Move a `PENDING` log to a terminal status.
    ///
    /// Returns `false` without writing when the log is missing or no longer
    /// `PENDING`, so a duplicate delivery can never overwrite a terminal status.
    async fn finalize(&self, id: i64, status: NotificationStatus) -> Result<bool, AppError>;
}

/// Per-user, per-channel opt-in flags.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// All preferences for a user. Empty for unknown users.
    async fn list(&self, user_id: &str) -> Result<Vec<ChannelPreference>, AppError>;

    /// Replace the user's full preference set atomically.
    async fn replace(
        &self,
        user_id: &str,
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError>;
}
