use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_common::queue::RedisDispatchQueue;
use herald_common::store::{
    HttpPreferenceStore, PgNotificationLogStore, PgPreferenceStore, PreferenceStore,
};
use herald_common::{db, redis_pool};
use herald_notifier::channels::ChannelRegistry;
use herald_notifier::dispatcher::{Dispatcher, DispatcherConfig};
use herald_notifier::processor::DispatchProcessor;
use herald_notifier::retry::SendPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_sender=info,herald_notifier=info,herald_common=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Herald sender starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    // Consumers block in BLMOVE, so they get a connection of their own.
    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let blocking = redis_pool::create_redis_pool(&config.redis_url).await?;
    let queue = RedisDispatchQueue::new(redis, config.queue_name.clone(), &config.queue_consumer_id)
        .with_blocking_connection(blocking);

    queue.recover().await?;

    let preferences: Arc<dyn PreferenceStore> = match &config.preference_service_url {
        Some(url) => {
            tracing::info!(url = %url, "Using remote preference service");
            Arc::new(HttpPreferenceStore::new(url)?)
        }
        None => Arc::new(PgPreferenceStore::new(pool.clone())),
    };

    let channels = ChannelRegistry::from_config(&config)?;
    let policy = SendPolicy::new(
        config.send_max_attempts,
        Duration::from_millis(config.send_retry_backoff_ms),
    );
    let processor = DispatchProcessor::new(
        Arc::new(PgNotificationLogStore::new(pool)),
        preferences,
        channels,
    )
    .with_send_policy(policy);

    let dispatcher = Dispatcher::new(
        Arc::new(queue),
        Arc::new(processor),
        DispatcherConfig::from_app_config(&config),
    );

    tracing::info!(
        queue = %config.queue_name,
        consumer = %config.queue_consumer_id,
        "Waiting for notifications"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
        signal.cancel();
    });

    dispatcher.run(shutdown).await?;

    tracing::info!("Herald sender stopped.");
    Ok(())
}
