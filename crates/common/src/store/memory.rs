use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{NotificationLogStore, PreferenceStore};
use crate::error::AppError;
use crate::types::{ChannelPreference, NewNotification, NotificationLog, NotificationStatus};

/// In-process log store with the same compare-and-set semantics as the
/// PostgreSQL store. Failure switches let tests exercise outage paths.
#[derive(Default)]
pub struct MemoryNotificationLogStore {
    logs: Mutex<BTreeMap<i64, NotificationLog>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryNotificationLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` and `finalize` fail as if the database were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get` fail as if the database were down.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<NotificationLog> {
        self.logs.lock().await.values().cloned().collect()
    }

    /// Insert a row verbatim, bypassing channel validation.
    pub async fn insert_raw(&self, log: NotificationLog) {
        self.logs.lock().await.insert(log.id, log);
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), AppError> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::TransientDependency(
                "notification log store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationLogStore for MemoryNotificationLogStore {
    async fn create(&self, notification: &NewNotification) -> Result<NotificationLog, AppError> {
        self.check(&self.fail_writes)?;

        let mut logs = self.logs.lock().await;
        let id = logs.keys().next_back().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        let log = NotificationLog {
            id,
            user_id: notification.user_id.clone(),
            channel: notification.channel.to_string(),
            message: notification.message.clone(),
            recipient: notification.recipient.clone(),
            status: NotificationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        logs.insert(id, log.clone());
        Ok(log)
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationLog>, AppError> {
        self.check(&self.fail_reads)?;
        Ok(self.logs.lock().await.get(&id).cloned())
    }

    async fn finalize(&self, id: i64, status: NotificationStatus) -> Result<bool, AppError> {
        self.check(&self.fail_writes)?;
        if !status.is_terminal() {
            return Err(AppError::Internal(format!(
                "refusing to move log {} back to {}",
                id, status
            )));
        }

        let mut logs = self.logs.lock().await;
        match logs.get_mut(&id) {
            Some(log) if log.status == NotificationStatus::Pending => {
                log.status = status;
                log.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-process preference store. `set_unavailable(true)` simulates an outage.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    preferences: Mutex<HashMap<String, Vec<ChannelPreference>>>,
    unavailable: AtomicBool,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Convenience for tests: set one channel flag for a user.
    pub async fn set(&self, user_id: &str, channel: &str, enabled: bool) {
        let mut prefs = self.preferences.lock().await;
        let entry = prefs.entry(user_id.to_string()).or_default();
        entry.retain(|p| p.channel != channel);
        entry.push(ChannelPreference {
            channel: channel.to_string(),
            enabled,
        });
    }

    fn check(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::TransientDependency(
                "preference store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn list(&self, user_id: &str) -> Result<Vec<ChannelPreference>, AppError> {
        self.check()?;
        Ok(self
            .preferences
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        user_id: &str,
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError> {
        self.check()?;
        let mut prefs = self.preferences.lock().await;
        if preferences.is_empty() {
            prefs.remove(user_id);
        } else {
            prefs.insert(user_id.to_string(), preferences.to_vec());
        }
        Ok(preferences.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    fn new_email() -> NewNotification {
        NewNotification {
            user_id: "u1".to_string(),
            channel: Channel::Email,
            message: "hi".to_string(),
            recipient: "u@x.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryNotificationLogStore::new();
        let a = store.create(&new_email()).await.unwrap();
        let b = store.create(&new_email()).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_finalize_only_from_pending() {
        let store = MemoryNotificationLogStore::new();
        let log = store.create(&new_email()).await.unwrap();

        assert!(store.finalize(log.id, NotificationStatus::Sent).await.unwrap());
        assert!(!store.finalize(log.id, NotificationStatus::Failed).await.unwrap());
        assert_eq!(
            store.get(log.id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
        assert!(store.finalize(log.id, NotificationStatus::Pending).await.is_err());
        assert!(!store.finalize(999, NotificationStatus::Sent).await.unwrap());
    }

    #[tokio::test]
    async fn test_preference_outage() {
        let store = MemoryPreferenceStore::new();
        store.set("u1", "email", true).await;
        assert_eq!(store.list("u1").await.unwrap().len(), 1);

        store.set_unavailable(true);
        assert!(matches!(
            store.list("u1").await,
            Err(AppError::TransientDependency(_))
        ));
    }
}
