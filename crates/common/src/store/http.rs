use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use super::PreferenceStore;
use crate::error::AppError;
use crate::types::ChannelPreference;

/// Reads and writes preferences through a remote preference service
/// (`GET`/`PUT /v1/users/{id}/preferences`).
///
/// Every transport or non-2xx failure maps to `TransientDependency`, which the
/// dispatch workers treat as retryable.
#[derive(Clone)]
pub struct HttpPreferenceStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPreferenceStore {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid preference service URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Preference service URL '{}' cannot carry a path",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
        })
    }

    /// `{base}/v1/users/{user_id}/preferences` with the id percent-encoded as
    /// a single path segment.
    fn url(&self, user_id: &str) -> Result<Url, AppError> {
        // The URL parser drops dot segments, which would address another resource.
        if user_id.is_empty() || user_id == "." || user_id == ".." {
            return Err(AppError::Validation(format!("Invalid user_id '{}'", user_id)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Config("Preference service URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["v1", "users", user_id, "preferences"]);
        Ok(url)
    }
}

fn unavailable(e: reqwest::Error) -> AppError {
    AppError::TransientDependency(format!("preference service: {}", e))
}

#[async_trait]
impl PreferenceStore for HttpPreferenceStore {
    async fn list(&self, user_id: &str) -> Result<Vec<ChannelPreference>, AppError> {
        let response = self
            .client
            .get(self.url(user_id)?)
            .send()
            .await
            .map_err(unavailable)?;

        // Older deployments answer 404 for users without preferences.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let response = response.error_for_status().map_err(unavailable)?;
        response.json().await.map_err(unavailable)
    }

    async fn replace(
        &self,
        user_id: &str,
        preferences: &[ChannelPreference],
    ) -> Result<Vec<ChannelPreference>, AppError> {
        let response = self
            .client
            .put(self.url(user_id)?)
            .json(preferences)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Validation(format!(
                "preference service rejected update ({}): {}",
                status, body
            )));
        }
        response.error_for_status().map_err(unavailable)?;

        self.list(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_strips_trailing_slash() {
        let store = HttpPreferenceStore::new("http://prefs:8081/").unwrap();
        assert_eq!(
            store.url("user-1").unwrap().as_str(),
            "http://prefs:8081/v1/users/user-1/preferences"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let store = HttpPreferenceStore::new("http://gateway/prefs/").unwrap();
        assert_eq!(
            store.url("user-1").unwrap().path(),
            "/prefs/v1/users/user-1/preferences"
        );
    }

    #[test]
    fn test_user_id_is_a_single_path_segment() {
        let store = HttpPreferenceStore::new("http://prefs:8081").unwrap();

        let url = store.url("alice/../bob").unwrap();
        assert_eq!(url.path(), "/v1/users/alice%2F..%2Fbob/preferences");

        let url = store.url("carol?x=1#frag").unwrap();
        assert_eq!(url.path(), "/v1/users/carol%3Fx=1%23frag/preferences");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_dot_user_ids_are_rejected() {
        let store = HttpPreferenceStore::new("http://prefs:8081").unwrap();
        for id in ["", ".", ".."] {
            assert!(matches!(store.url(id), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpPreferenceStore::new("not a url"),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Port 9 (discard) is closed on loopback in test environments.
        let store = HttpPreferenceStore::new("http://127.0.0.1:9").unwrap();
        let err = store.list("user-1").await.unwrap_err();
        assert!(matches!(err, AppError::TransientDependency(_)));
    }
}
