// Bounded fetch queue with exponential backoff.
//
// Every outbound page and comment fetch goes through one shared
// FetchQueue so the number of simultaneous network calls stays capped no
// matter how many forums are subscribed. A failed call that looks like a
// gateway rate limit (HTTP 429) is retried with exponential backoff and
// jitter; any other error is returned immediately.
//
// The permit is released before sleeping so a backing-off task never holds
// a slot another forum could use.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use regex_lite::Regex;
use tokio::sync::Semaphore;
use tracing::warn;

/// Maximum number of retry attempts on rate-limit (429) errors.
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (doubles each retry).
const BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Maximum backoff delay to cap exponential growth.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared concurrency bound for outbound fetches. Cheap to clone.
#[derive(Clone)]
pub struct FetchQueue {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl FetchQueue {
    /// Create a queue allowing at most `max_concurrent` fetches at once (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of fetches currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Run `operation` inside a queue slot, retrying on rate-limit errors.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .context("Fetch queue closed")?;
                operation().await
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_rate_limit_error(&err) || attempt >= MAX_RETRIES {
                        return Err(err);
                    }

                    attempt += 1;
                    let delay = backoff_delay(attempt);

                    warn!(
                        attempt = attempt,
                        max_retries = MAX_RETRIES,
                        backoff_secs = delay.as_secs_f64(),
                        "Gateway rate limited, retrying in {:.1}s",
                        delay.as_secs_f64(),
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Exponential backoff with +/-25% jitter, capped at MAX_BACKOFF.
fn backoff_delay(attempt: u32) -> Duration {
    let backoff = BASE_BACKOFF
        .saturating_mul(1u32 << attempt.min(16))
        .min(MAX_BACKOFF);

    // The nanosecond component of the wall clock is enough variation to
    // spread retries from concurrent forums apart.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0;
    Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
}

fn rate_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:returned|http|status) 429\b|too many requests|rate limit")
            .expect("rate limit pattern is valid")
    })
}

/// Check whether an error is a rate-limit error anywhere in its chain.
///
/// A bare "429" is not enough: cids, paths and line numbers carry digits
/// too. Only a 429 status as reported by a gateway or HTTP layer counts.
fn is_rate_limit_error(err: &anyhow::Error) -> bool {
    rate_limit_pattern().is_match(&format!("{err:#}"))
}
