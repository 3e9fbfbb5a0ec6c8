//! Runtime settings, read from `TOOLCTX_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding `tools.json`, `categories.json`, `stats.json`.
    pub data_dir: PathBuf,
    /// Per-attempt fetch timeout.
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    /// Base backoff delay, doubled on every retry.
    pub retry_delay: Duration,
    pub items_per_page: usize,
    pub health_interval: Duration,
    pub health_initial_delay: Duration,
    pub search_debounce: Duration,
    pub filter_debounce: Duration,
    pub default_debounce: Duration,
    /// Run full-text search on a background worker task.
    pub use_worker: bool,
    pub queue_cap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            fetch_timeout: Duration::from_secs(10),
            fetch_retries: 3,
            retry_delay: Duration::from_millis(1_000),
            items_per_page: 20,
            health_interval: Duration::from_secs(30),
            health_initial_delay: Duration::from_secs(5),
            search_debounce: Duration::from_millis(300),
            filter_debounce: Duration::from_millis(150),
            default_debounce: Duration::from_millis(200),
            use_worker: false,
            queue_cap: 64,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> { std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok()) }

fn env_ms(key: &str) -> Option<Duration> { env_parse::<u64>(key).map(Duration::from_millis) }

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Settings {
    /// Defaults overridden by any `TOOLCTX_*` variables that parse.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: std::env::var("TOOLCTX_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            fetch_timeout: env_ms("TOOLCTX_FETCH_TIMEOUT_MS").unwrap_or(d.fetch_timeout),
            fetch_retries: env_parse("TOOLCTX_FETCH_RETRIES").unwrap_or(d.fetch_retries),
            retry_delay: env_ms("TOOLCTX_RETRY_DELAY_MS").unwrap_or(d.retry_delay),
            items_per_page: env_parse::<usize>("TOOLCTX_ITEMS_PER_PAGE").filter(|n| *n > 0).unwrap_or(d.items_per_page),
            health_interval: env_parse::<u64>("TOOLCTX_HEALTH_INTERVAL_SECS").map(Duration::from_secs).unwrap_or(d.health_interval),
            health_initial_delay: d.health_initial_delay,
            search_debounce: d.search_debounce,
            filter_debounce: d.filter_debounce,
            default_debounce: d.default_debounce,
            use_worker: env_flag("TOOLCTX_USE_WORKER").unwrap_or(d.use_worker),
            queue_cap: env_parse::<usize>("TOOLCTX_QUEUE_CAP").filter(|n| *n > 0).unwrap_or(d.queue_cap),
        }
    }
}
