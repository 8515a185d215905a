//! Preference service: validation in front of the preference store.
//!
//! Channels are stored as canonical lowercase tags. Unknown and duplicated
//! channels are rejected so a replace never half-applies.

use std::collections::HashSet;

use herald_common::error::AppError;
use herald_common::store::PreferenceStore;
use herald_common::types::{Channel, ChannelPreference};

/// Service layer for preference reads and full-set replacement.
pub struct PreferenceService;

impl PreferenceService {
    /// All preferences for a user. Empty for unknown users.
    pub async fn list(
        store: &dyn PreferenceStore,
        user_id: &str,
    ) -> Result<Vec<ChannelPreference>, AppError> {
        let user_id = Self::user_id(user_id)?;
        store.list(user_id).await
    }

    /// Replace the user's preference set after validating every entry.
    pub async fn replace(
        store: &dyn PreferenceStore,
        user_id: &str,
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError> {
        let user_id = Self::user_id(user_id)?;
        let normalized = Self::normalize(preferences)?;
        let stored = store.replace(user_id, &normalized).await?;

        tracing::info!(
            user_id = %user_id,
            enabled = normalized.iter().filter(|p| p.enabled).count(),
            total = normalized.len(),
            "Preferences updated"
        );

        Ok(stored)
    }

    /// Canonicalize channel tags; reject unknown or repeated channels.
    pub fn normalize(
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(preferences.len());

        for pref in preferences {
            let channel: Channel = pref.channel.parse().map_err(|_| {
                AppError::Validation(format!(
                    "Invalid channel '{}'. Valid channels: sms, email, whatsapp",
                    pref.channel
                ))
            })?;

            if !seen.insert(channel) {
                return Err(AppError::Validation(format!(
                    "Channel '{}' listed more than once",
                    channel
                )));
            }

            normalized.push(ChannelPreference {
                channel: channel.to_string(),
                enabled: pref.enabled,
            });
        }

        Ok(normalized)
    }

    fn user_id(user_id: &str) -> Result<&str, AppError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::Validation("user id is required".to_string()));
        }
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::store::MemoryPreferenceStore;

    fn pref(channel: &str, enabled: bool) -> ChannelPreference {
        ChannelPreference {
            channel: channel.to_string(),
            enabled,
        }
    }

    #[test]
    fn test_normalize_canonicalizes_tags() {
        let out = PreferenceService::normalize(&[pref("EMAIL", true), pref(" WhatsApp", false)])
            .unwrap();
        assert_eq!(out, vec![pref("email", true), pref("whatsapp", false)]);
    }

    #[test]
    fn test_normalize_rejects_unknown_channel() {
        let err = PreferenceService::normalize(&[pref("fax", true)]).unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m.contains("fax")));
    }

    #[test]
    fn test_normalize_rejects_duplicates() {
        let err = PreferenceService::normalize(&[pref("sms", true), pref("SMS", false)])
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_replace_then_list() {
        let store = MemoryPreferenceStore::new();
        PreferenceService::replace(&store, "u1", &[pref("Email", true)])
            .await
            .unwrap();

        let prefs = PreferenceService::list(&store, "u1").await.unwrap();
        assert_eq!(prefs, vec![pref("email", true)]);
        assert!(PreferenceService::list(&store, "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_replace_leaves_store_untouched() {
        let store = MemoryPreferenceStore::new();
        PreferenceService::replace(&store, "u1", &[pref("sms", true)])
            .await
            .unwrap();

        let prefs = [pref("email", true), pref("fax", true)];
        let result = PreferenceService::replace(&store, "u1", &prefs).await;
        assert!(result.is_err());
        assert_eq!(
            PreferenceService::list(&store, "u1").await.unwrap(),
            vec![pref("sms", true)]
        );
    }

    #[tokio::test]
    async fn test_blank_user_id_rejected() {
        let store = MemoryPreferenceStore::new();
        assert!(matches!(
            PreferenceService::list(&store, "  ").await,
            Err(AppError::Validation(_))
        ));
    }
}
