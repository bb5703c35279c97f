// =============================================================================
// config.rs — THE GRAND CONFIGURATION CATHEDRAL
// =============================================================================
//
// Every tunable in the engine lives here, loaded from the environment with
// sensible defaults so the thing runs out of the box and still respects
// your wishes if you set something. Prefixed FILING_WATCH_ so it doesn't
// collide with whatever else shares the environment.
// =============================================================================

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // DURABLE STORE
    // =========================================================================
    /// SQLite connection string, e.g. `sqlite://filing_watch.db`.
    pub database_url: String,

    // =========================================================================
    // EDGAR
    // =========================================================================
    pub edgar_base_url: String,
    /// Mandatory descriptive User-Agent EDGAR requires on every request.
    pub edgar_user_agent: String,
    /// Requests per second against the single global EDGAR bucket.
    pub edgar_rate_limit_per_sec: u32,
    pub edgar_max_retries: u32,
    pub edgar_request_timeout: Duration,

    // =========================================================================
    // PRICE ADAPTER
    // =========================================================================
    pub price_provider_timeout: Duration,
    pub price_request_timeout: Duration,
    pub price_cache_ttl: Duration,
    /// Requests per second against each provider's own rate-limit bucket.
    pub price_per_provider_rate_limit: u32,
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_base_url: String,
    pub finnhub_api_key: Option<String>,
    pub finnhub_base_url: String,
    pub yahoo_base_url: String,
    pub iex_api_key: Option<String>,
    pub iex_base_url: String,
    /// Shared cache for multi-node deployments; process-local DashMap is
    /// used when this is absent.
    pub shared_cache_redis_url: Option<String>,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub circuit_breaker_success_threshold: u32,

    // =========================================================================
    // JOB QUEUE
    // =========================================================================
    /// Max concurrently RUNNING jobs per worker process.
    pub worker_pool_size: usize,
    /// Sleep when no pullable job is found.
    pub queue_idle_backoff: Duration,
    /// Sleep when the pull itself errors.
    pub queue_pull_error_backoff: Duration,
    pub default_max_retries: u32,
    /// Grace period `stop()` waits for RUNNING jobs to finish.
    pub shutdown_grace: Duration,
    /// A RUNNING job older than `heartbeat * 3` is reclaimed by the reaper.
    pub worker_heartbeat: Duration,
    pub reaper_interval: Duration,

    // =========================================================================
    // POLLER
    // =========================================================================
    pub poll_interval: Duration,

    // =========================================================================
    // ALERT DISPATCH
    // =========================================================================
    pub alert_redis_url: String,
    pub alert_redis_channel: String,
    pub alert_redis_sorted_set: String,

    // =========================================================================
    // CLEANUP
    // =========================================================================
    pub cleanup_interval: Duration,
    pub cleanup_retention: Duration,

    // =========================================================================
    // METRICS SERVER
    // =========================================================================
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Config {
            database_url: env_or_default("FILING_WATCH_DATABASE_URL", "sqlite://filing_watch.db"),

            edgar_base_url: env_or_default("FILING_WATCH_EDGAR_BASE_URL", "https://data.sec.gov"),
            edgar_user_agent: env_or_default(
                "FILING_WATCH_EDGAR_USER_AGENT",
                "FilingWatchEngine/1.0 (contact@filingwatch.example)",
            ),
            edgar_rate_limit_per_sec: parse_or("FILING_WATCH_EDGAR_RATE_LIMIT", 10),
            edgar_max_retries: parse_or("FILING_WATCH_EDGAR_MAX_RETRIES", 3),
            edgar_request_timeout: Duration::from_secs(parse_or(
                "FILING_WATCH_EDGAR_REQUEST_TIMEOUT_SECS",
                30,
            )),

            price_provider_timeout: Duration::from_secs(parse_or(
                "FILING_WATCH_PRICE_PROVIDER_TIMEOUT_SECS",
                5,
            )),
            price_request_timeout: Duration::from_secs(parse_or(
                "FILING_WATCH_PRICE_REQUEST_TIMEOUT_SECS",
                15,
            )),
            price_cache_ttl: Duration::from_secs(parse_or("FILING_WATCH_PRICE_CACHE_TTL_SECS", 60)),
            price_per_provider_rate_limit: parse_or("FILING_WATCH_PRICE_PER_PROVIDER_RATE_LIMIT", 5),
            alpha_vantage_api_key: env::var("FILING_WATCH_ALPHA_VANTAGE_API_KEY").ok(),
            alpha_vantage_base_url: env_or_default(
                "FILING_WATCH_ALPHA_VANTAGE_BASE_URL",
                "https://www.alphavantage.co/query",
            ),
            finnhub_api_key: env::var("FILING_WATCH_FINNHUB_API_KEY").ok(),
            finnhub_base_url: env_or_default(
                "FILING_WATCH_FINNHUB_BASE_URL",
                "https://finnhub.io/api/v1",
            ),
            yahoo_base_url: env_or_default(
                "FILING_WATCH_YAHOO_BASE_URL",
                "https://query1.finance.yahoo.com",
            ),
            iex_api_key: env::var("FILING_WATCH_IEX_API_KEY").ok(),
            iex_base_url: env_or_default(
                "FILING_WATCH_IEX_BASE_URL",
                "https://cloud.iexapis.com/stable",
            ),
            shared_cache_redis_url: env::var("FILING_WATCH_SHARED_CACHE_REDIS_URL").ok(),

            circuit_breaker_failure_threshold: parse_or("FILING_WATCH_CB_FAILURE_THRESHOLD", 5),
            circuit_breaker_reset_timeout: Duration::from_secs(parse_or(
                "FILING_WATCH_CB_RESET_TIMEOUT_SECS",
                60,
            )),
            circuit_breaker_success_threshold: parse_or("FILING_WATCH_CB_SUCCESS_THRESHOLD", 2),

            worker_pool_size: parse_or("FILING_WATCH_WORKER_POOL_SIZE", 3),
            queue_idle_backoff: Duration::from_secs(parse_or(
                "FILING_WATCH_QUEUE_IDLE_BACKOFF_SECS",
                1,
            )),
            queue_pull_error_backoff: Duration::from_secs(parse_or(
                "FILING_WATCH_QUEUE_PULL_ERROR_BACKOFF_SECS",
                5,
            )),
            default_max_retries: parse_or("FILING_WATCH_DEFAULT_MAX_RETRIES", 3),
            shutdown_grace: Duration::from_secs(parse_or("FILING_WATCH_SHUTDOWN_GRACE_SECS", 10)),
            worker_heartbeat: Duration::from_secs(parse_or(
                "FILING_WATCH_WORKER_HEARTBEAT_SECS",
                30,
            )),
            reaper_interval: Duration::from_secs(parse_or(
                "FILING_WATCH_REAPER_INTERVAL_SECS",
                60,
            )),

            poll_interval: Duration::from_secs(parse_or("FILING_WATCH_POLL_INTERVAL_SECS", 900)),

            alert_redis_url: env_or_default("FILING_WATCH_ALERT_REDIS_URL", "redis://127.0.0.1:6379"),
            alert_redis_channel: env_or_default("FILING_WATCH_ALERT_REDIS_CHANNEL", "filing_watch:alerts"),
            alert_redis_sorted_set: env_or_default(
                "FILING_WATCH_ALERT_REDIS_SORTED_SET",
                "filing_watch:alerts:log",
            ),

            cleanup_interval: Duration::from_secs(parse_or("FILING_WATCH_CLEANUP_INTERVAL_SECS", 3600)),
            cleanup_retention: Duration::from_secs(parse_or(
                "FILING_WATCH_CLEANUP_RETENTION_SECS",
                7 * 24 * 3600,
            )),

            metrics_port: parse_or("FILING_WATCH_METRICS_PORT", 9090),
        }
    }
}

/// Read an environment variable with a default fallback.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to `default` on
/// absence or parse failure.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_on_missing_var() {
        env::remove_var("FILING_WATCH_TEST_NONEXISTENT");
        let v: u32 = parse_or("FILING_WATCH_TEST_NONEXISTENT", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_or_falls_back_on_unparseable_var() {
        env::set_var("FILING_WATCH_TEST_BAD", "not-a-number");
        let v: u32 = parse_or("FILING_WATCH_TEST_BAD", 7);
        assert_eq!(v, 7);
        env::remove_var("FILING_WATCH_TEST_BAD");
    }
}
