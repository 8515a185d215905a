use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (queue + rate limiter)
    pub redis_url: String,

    /// Address the HTTP API binds to (default: 0.0.0.0:8082)
    pub api_bind_addr: String,

    /// Name of the durable dispatch queue (default: "notifications")
    pub queue_name: String,

    /// Stable identity of this sender process. Names its processing list, so
    /// it must survive restarts for unacknowledged messages to be recovered.
    /// Set `QUEUE_CONSUMER_ID` explicitly (e.g. a StatefulSet pod name) where
    /// hostnames change across restarts; `HOSTNAME` is only a fallback.
    pub queue_consumer_id: String,

    /// Peers allowed to report the client address via `X-Forwarded-For`.
    /// Empty means the header is ignored and the socket peer is the client.
    pub trusted_proxies: Vec<IpAddr>,

    /// Requests allowed per client within one rate-limit window (default: 20)
    pub rate_limit_max_requests: u64,

    /// Rate-limit window length in seconds (default: 60)
    pub rate_limit_window_secs: u64,

    /// Upper bound on the preference lookup and queue publish during ingestion
    pub ingestion_timeout_ms: u64,

    /// Maximum number of notifications dispatched concurrently by one sender
    pub worker_concurrency: usize,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Send attempts per notification before it is marked FAILED (default: 1)
    pub send_max_attempts: u32,

    /// Delay between send attempts, multiplied by the attempt number
    pub send_retry_backoff_ms: u64,

    /// Pause before a message is requeued after a transient failure
    pub requeue_delay_ms: u64,

    /// Base URL of a remote preference service. When unset, preferences are read from PostgreSQL.
    pub preference_service_url: Option<String>,

    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,

    /// Sender number for SMS
    pub twilio_phone_number: Option<String>,

    /// Sender number for WhatsApp (with or without the `whatsapp:` prefix)
    pub twilio_whatsapp_number: Option<String>,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    /// Email sender address (defaults to the SMTP username)
    pub email_from: Option<String>,

    pub email_subject: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8082".to_string()),
            queue_name: std::env::var("QUEUE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            queue_consumer_id: resolve_consumer_id(
                non_empty_var("QUEUE_CONSUMER_ID"),
                non_empty_var("HOSTNAME"),
            ),
            trusted_proxies: parse_ip_list(
                "TRUSTED_PROXIES",
                std::env::var("TRUSTED_PROXIES").ok().as_deref(),
            )?,
            rate_limit_max_requests: parse_var("RATE_LIMIT_MAX_REQUESTS", 20)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", 60)?,
            ingestion_timeout_ms: parse_var("INGESTION_TIMEOUT_MS", 5000)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 16)?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            send_max_attempts: parse_var("SEND_MAX_ATTEMPTS", 1)?,
            send_retry_backoff_ms: parse_var("SEND_RETRY_BACKOFF_MS", 500)?,
            requeue_delay_ms: parse_var("REQUEUE_DELAY_MS", 1000)?,
            preference_service_url: non_empty_var("PREFERENCE_SERVICE_URL"),
            twilio_account_sid: non_empty_var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: non_empty_var("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: non_empty_var("TWILIO_PHONE_NUMBER"),
            twilio_whatsapp_number: non_empty_var("TWILIO_WHATSAPP_NUMBER"),
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            smtp_port: parse_var("SMTP_PORT", 587)?,
            smtp_username: non_empty_var("SMTP_USERNAME"),
            smtp_password: non_empty_var("SMTP_PASSWORD"),
            email_from: non_empty_var("EMAIL_FROM"),
            email_subject: std::env::var("EMAIL_SUBJECT")
                .unwrap_or_else(|_| "You have a new notification".to_string()),
        })
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
fn parse_var<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    parse_value(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_value<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T> {
    match raw {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}

/// Comma-separated IP addresses; blank entries are ignored.
fn parse_ip_list(key: &str, raw: Option<&str>) -> anyhow::Result<Vec<IpAddr>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse()
                .map_err(|_| anyhow::anyhow!("{} entry '{}' is not an IP address", key, v))
        })
        .collect()
}

/// Explicit id, else hostname, else a fixed name for single-instance setups.
fn resolve_consumer_id(explicit: Option<String>, hostname: Option<String>) -> String {
    explicit
        .or(hostname)
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "herald-sender".to_string())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_default_when_unset() {
        let value: u64 = parse_value("RATE_LIMIT_MAX_REQUESTS", None, 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_value_trims_input() {
        let value: u16 = parse_value("SMTP_PORT", Some(" 2525 "), 587).unwrap();
        assert_eq!(value, 2525);
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let err = parse_value::<u64>("WORKER_CONCURRENCY", Some("twenty"), 1).unwrap_err();
        assert!(err.to_string().contains("WORKER_CONCURRENCY"));
    }

    #[test]
    fn test_consumer_id_precedence() {
        assert_eq!(
            resolve_consumer_id(Some("sender-0".into()), Some("pod-7f9c".into())),
            "sender-0"
        );
        assert_eq!(resolve_consumer_id(None, Some(" pod-7f9c ".into())), "pod-7f9c");
        assert_eq!(resolve_consumer_id(None, None), "herald-sender");
    }

    #[test]
    fn test_parse_ip_list() {
        assert!(parse_ip_list("TRUSTED_PROXIES", None).unwrap().is_empty());

        let ips = parse_ip_list("TRUSTED_PROXIES", Some("10.0.0.1, ,::1")).unwrap();
        assert_eq!(
            ips,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );

        let err = parse_ip_list("TRUSTED_PROXIES", Some("10.0.0.0/8")).unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/8"));
    }
}
