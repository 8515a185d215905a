//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use herald_common::config::AppConfig;
use herald_common::queue::{DispatchQueue, RedisDispatchQueue};
use herald_common::store::{
    HttpPreferenceStore, NotificationLogStore, PgNotificationLogStore, PgPreferenceStore,
    PreferenceStore,
};
use herald_engine::ingestion::IngestionGateway;
use herald_engine::rate_limiter::{RateLimitPolicy, RateLimiter, RedisRateLimiter};

use crate::extract::TrustedProxies;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<IngestionGateway>,
    pub logs: Arc<dyn NotificationLogStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub trusted_proxies: TrustedProxies,
}

impl AppState {
    pub fn new(
        logs: Arc<dyn NotificationLogStore>,
        preferences: Arc<dyn PreferenceStore>,
        queue: Arc<dyn DispatchQueue>,
        limiter: Arc<dyn RateLimiter>,
        ingestion_timeout: Duration,
    ) -> Self {
        let gateway = IngestionGateway::new(logs.clone(), preferences.clone(), queue, limiter)
            .with_timeout(ingestion_timeout);

        Self {
            gateway: Arc::new(gateway),
            logs,
            preferences,
            trusted_proxies: TrustedProxies::default(),
        }
    }

    /// Believe `X-Forwarded-For` from these peers.
    pub fn with_trusted_proxies(mut self, proxies: TrustedProxies) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    /// Production wiring: PostgreSQL stores, Redis queue and rate limiter.
    ///
    /// Preferences come from the remote preference service when one is configured.
    pub fn connect(
        pool: PgPool,
        redis: ConnectionManager,
        config: &AppConfig,
    ) -> anyhow::Result<Self> {
        let preferences: Arc<dyn PreferenceStore> = match &config.preference_service_url {
            Some(url) => Arc::new(HttpPreferenceStore::new(url)?),
            None => Arc::new(PgPreferenceStore::new(pool.clone())),
        };

        let queue = RedisDispatchQueue::new(
            redis.clone(),
            config.queue_name.clone(),
            &config.queue_consumer_id,
        );
        let limiter = RedisRateLimiter::new(
            redis,
            RateLimitPolicy::new(
                config.rate_limit_max_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
        );

        Ok(Self::new(
            Arc::new(PgNotificationLogStore::new(pool)),
            preferences,
            Arc::new(queue),
            Arc::new(limiter),
            Duration::from_millis(config.ingestion_timeout_ms),
        )
        .with_trusted_proxies(TrustedProxies::new(config.trusted_proxies.iter().copied())))
    }
}
