use async_trait::async_trait;
use sqlx::PgPool;

use super::{NotificationLogStore, PreferenceStore};
use crate::error::AppError;
use crate::types::{
    ChannelPreference, NewNotification, NotificationLog, NotificationStatus, Preference,
};

/// `notification_logs` table access.
#[derive(Clone)]
pub struct PgNotificationLogStore {
    pool: PgPool,
}

impl PgNotificationLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLogStore for PgNotificationLogStore {
    async fn create(&self, notification: &NewNotification) -> Result<NotificationLog, AppError> {
        let log: NotificationLog = sqlx::query_as(
            r#"
            INSERT INTO notification_logs (user_id, channel, message, recipient, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&notification.user_id)
        .bind(notification.channel.as_str())
        .bind(&notification.message)
        .bind(&notification.recipient)
        .bind(NotificationStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(log)
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationLog>, AppError> {
        let log: Option<NotificationLog> =
            sqlx::query_as("SELECT * FROM notification_logs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(log)
    }

    async fn finalize(&self, id: i64, status: NotificationStatus) -> Result<bool, AppError> {
        if !status.is_terminal() {
            return Err(AppError::Internal(format!(
                "refusing to move log {} back to {}",
                id, status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE notification_logs
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(status.to_string())
        .bind(id)
        .bind(NotificationStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// `preferences` table access.
#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn list(&self, user_id: &str) -> Result<Vec<ChannelPreference>, AppError> {
        let rows: Vec<Preference> = sqlx::query_as(
            "SELECT user_id, channel, enabled FROM preferences WHERE user_id = $1 ORDER BY channel",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChannelPreference::from).collect())
    }

    async fn replace(
        &self,
        user_id: &str,
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for pref in preferences {
            sqlx::query("INSERT INTO preferences (user_id, channel, enabled) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(&pref.channel)
                .bind(pref.enabled)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            count = preferences.len(),
            "Preferences replaced"
        );

        self.list(user_id).await
    }
}
