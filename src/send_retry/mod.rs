//! Send-Retry Policy (spec.md §4.11): rate-limit-aware retry with bounded
//! attempts and observable retry/giveup events.
//!
//! Grounded in the teacher SDK's [`RetryPolicy::execute`](roci::util::retry)
//! shape (classify → sleep → retry, honoring `is_retryable`), generalized
//! to honor a server-provided `retry_after_ms` before falling back to
//! exponential backoff with full jitter, and to emit observable events
//! instead of only logging.

use std::time::Duration;

use tracing::warn;

use crate::error::BotError;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Observable event emitted around a send attempt (spec.md §3 `SendRetryEvent`).
#[derive(Debug, Clone)]
pub enum SendRetryEvent {
    Retry {
        platform: String,
        destination: String,
        attempt: u32,
        max_attempts: u32,
        retry_after_ms: Option<u64>,
    },
    GiveUp {
        platform: String,
        destination: String,
        attempt: u32,
        max_attempts: u32,
        retryable: bool,
        error: String,
    },
}

pub struct SendRetryOptions<'a> {
    pub platform: &'a str,
    pub destination: &'a str,
    pub max_attempts: u32,
    pub on_event: Option<Box<dyn Fn(SendRetryEvent) + Send + Sync + 'a>>,
}

impl<'a> SendRetryOptions<'a> {
    pub fn new(platform: &'a str, destination: &'a str) -> Self {
        Self {
            platform,
            destination,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            on_event: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_on_event(mut self, f: impl Fn(SendRetryEvent) + Send + Sync + 'a) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    fn emit(&self, event: SendRetryEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }
}

/// Deterministic (non-jittered) exponential backoff, exposed separately so
/// tests can assert monotonic growth without fighting jitter.
fn backoff_ms(attempt: u32) -> u64 {
    let exp = INITIAL_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10));
    exp.min(MAX_BACKOFF_MS)
}

/// Full-jitter backoff: uniform random in `[0, backoff_ms(attempt)]`.
/// `jitter` is injected so tests can pin it to a deterministic value.
fn jittered_backoff_ms(attempt: u32, jitter: f64) -> u64 {
    let cap = backoff_ms(attempt) as f64;
    (cap * jitter.clamp(0.0, 1.0)) as u64
}

fn default_jitter() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Send `send_fn` with rate-limit-aware retry.
///
/// - On success, returns immediately.
/// - On a retryable [`BotError`] (rate limit or transient network), emits a
///   `Retry` event, sleeps (honoring the error's `retry_after_ms` if
///   present, else jittered exponential backoff), and retries up to
///   `max_attempts`.
/// - On a non-retryable error, or once attempts are exhausted, emits
///   exactly one `GiveUp` event and propagates the error.
pub async fn send_with_rate_limit_retry<F, Fut>(
    send_fn: F,
    options: SendRetryOptions<'_>,
) -> Result<(), BotError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), BotError>>,
{
    send_with_rate_limit_retry_jittered(send_fn, options, default_jitter).await
}

/// Test seam: same as [`send_with_rate_limit_retry`] but with an injectable
/// jitter source instead of the wall-clock one.
async fn send_with_rate_limit_retry_jittered<F, Fut>(
    send_fn: F,
    options: SendRetryOptions<'_>,
    jitter_source: impl Fn() -> f64,
) -> Result<(), BotError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), BotError>>,
{
    let mut attempt = 1u32;
    loop {
        match send_fn().await {
            Ok(()) => return Ok(()),
            Err(error) => {
                let retryable = error.is_retryable();
                if !retryable || attempt >= options.max_attempts {
                    options.emit(SendRetryEvent::GiveUp {
                        platform: options.platform.to_string(),
                        destination: options.destination.to_string(),
                        attempt,
                        max_attempts: options.max_attempts,
                        retryable,
                        error: error.to_string(),
                    });
                    return Err(error);
                }

                let retry_after_ms = match &error {
                    BotError::RateLimited { retry_after_ms } => *retry_after_ms,
                    _ => None,
                };
                let sleep_ms = retry_after_ms.unwrap_or_else(|| jittered_backoff_ms(attempt - 1, jitter_source()));

                warn!(
                    platform = options.platform,
                    destination = options.destination,
                    attempt,
                    max_attempts = options.max_attempts,
                    sleep_ms,
                    error = %error,
                    "send failed, retrying"
                );
                options.emit(SendRetryEvent::Retry {
                    platform: options.platform.to_string(),
                    destination: options.destination.to_string(),
                    attempt,
                    max_attempts: options.max_attempts,
                    retry_after_ms,
                });

                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn succeeds_immediately_with_no_events() {
        let events = Mutex::new(Vec::new());
        let options = SendRetryOptions::new("irc", "#test").with_on_event(|e| {
            events.lock().unwrap().push(format!("{e:?}"));
        });
        let result = send_with_rate_limit_retry(|| async { Ok(()) }, options).await;
        assert!(result.is_ok());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_retryable_error_gives_up_immediately_with_one_event() {
        let retry_count = AtomicU32::new(0);
        let giveup_count = AtomicU32::new(0);
        let options = SendRetryOptions::new("irc", "#test").with_on_event(|e| match e {
            SendRetryEvent::Retry { .. } => {
                retry_count.fetch_add(1, Ordering::SeqCst);
            }
            SendRetryEvent::GiveUp { .. } => {
                giveup_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        let result = send_with_rate_limit_retry(
            || async { Err(BotError::Transport { platform: "irc".into(), message: "bad request".into() }) },
            options,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(retry_count.load(Ordering::SeqCst), 0);
        assert_eq!(giveup_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retryable_error_emits_max_attempts_minus_one_retries_then_giveup() {
        let retry_count = AtomicU32::new(0);
        let giveup_count = AtomicU32::new(0);
        let options = SendRetryOptions::new("discord", "C123")
            .with_max_attempts(3)
            .with_on_event(|e| match e {
                SendRetryEvent::Retry { .. } => {
                    retry_count.fetch_add(1, Ordering::SeqCst);
                }
                SendRetryEvent::GiveUp { .. } => {
                    giveup_count.fetch_add(1, Ordering::SeqCst);
                }
            });

        let result = send_with_rate_limit_retry_jittered(
            || async { Err(BotError::RateLimited { retry_after_ms: Some(1) }) },
            options,
            || 0.0,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(retry_count.load(Ordering::SeqCst), 2);
        assert_eq!(giveup_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_is_honored_and_total_wait_is_observed() {
        let attempts = AtomicU32::new(0);
        let retry_after_seen = Mutex::new(Vec::new());
        let options = SendRetryOptions::new("discord", "C123").with_on_event(|e| {
            if let SendRetryEvent::Retry { retry_after_ms, .. } = e {
                retry_after_seen.lock().unwrap().push(retry_after_ms);
            }
        });

        let start = tokio::time::Instant::now();
        let result = send_with_rate_limit_retry(
            move || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BotError::RateLimited { retry_after_ms: Some(250) })
                    } else {
                        Ok(())
                    }
                }
            },
            options,
        )
        .await;

        assert!(result.is_ok());
        let seen = retry_after_seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Some(250));
        assert_eq!(seen[1], Some(250));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_ms(0), INITIAL_BACKOFF_MS);
        assert_eq!(backoff_ms(1), INITIAL_BACKOFF_MS * 2);
        assert_eq!(backoff_ms(2), INITIAL_BACKOFF_MS * 4);
        assert_eq!(backoff_ms(20), MAX_BACKOFF_MS);
    }
}
