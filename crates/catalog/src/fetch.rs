//! Per-attempt timeout with exponential backoff between attempts.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use toolctx_core::Settings;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Total attempts; at least one is always made.
    pub retries: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self { Self::from_settings(&Settings::default()) }
}

impl FetchPolicy {
    pub fn from_settings(s: &Settings) -> Self { Self { timeout: s.fetch_timeout, retries: s.fetch_retries, base_delay: s.retry_delay } }

    /// Single attempt, no waiting.
    pub fn once(timeout: Duration) -> Self { Self { timeout, retries: 1, base_delay: Duration::ZERO } }

    pub fn backoff(&self, attempt: u32) -> Duration { self.base_delay.saturating_mul(1u32 << attempt.min(16)) }
}

/// A missing file will not appear on retry.
fn is_final(e: &anyhow::Error) -> bool {
    e.chain().any(|c| c.downcast_ref::<std::io::Error>().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound))
}

/// Run `op` until it succeeds, racing each attempt against the timeout.
/// Not-found errors end the loop at once.
pub async fn with_retry<T, F, Fut>(policy: FetchPolicy, what: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.retries.max(1);
    let mut last = anyhow!("{what}: no attempt made");
    for attempt in 0..attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(v)) => {
                debug!(what, attempt, "fetch ok");
                return Ok(v);
            }
            Ok(Err(e)) if is_final(&e) => {
                metrics::counter!("catalog_fetch_failures_total", 1u64);
                debug!(what, attempt, error = %e, "not found; not retrying");
                return Err(e.context(format!("{what}: not found")));
            }
            Ok(Err(e)) => last = e,
            Err(_) => last = anyhow!("{what}: timed out after {}ms", policy.timeout.as_millis()),
        }
        metrics::counter!("catalog_fetch_failures_total", 1u64);
        if attempt + 1 < attempts {
            let delay = policy.backoff(attempt);
            warn!(what, attempt, delay_ms = %delay.as_millis(), error = %last, "fetch failed; backing off");
            tokio::time::sleep(delay).await;
        }
    }
    Err(last.context(format!("{what}: gave up after {attempts} attempts")))
}

/// Read a whole file as text under `policy`.
pub async fn read_with_retry(path: &Path, policy: FetchPolicy) -> anyhow::Result<String> {
    let what = path.display().to_string();
    with_retry(policy, &what, || async { tokio::fs::read_to_string(path).await.with_context(|| format!("reading {}", path.display())) }).await
}
