// Exponential backoff with cap and jitter, plus an async retry helper.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Reconnect delay schedule. Each `next_delay` call returns the current delay
/// plus up to 50% jitter, then doubles the base toward the cap. `reset` is
/// called after a healthy (re)connect.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
        )
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (base * 2).min(self.max);
        let jitter_ceiling = base.as_millis() as u64 / 2;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        base + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Runs `operation` until it succeeds or `attempts` tries are exhausted,
/// sleeping per the policy between failures. The final error is returned
/// unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &mut BackoffPolicy,
    attempts: u32,
    what: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                warn!("{what}: attempt {attempt}/{attempts} failed: {e}, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.next_delay();
                warn!(
                    "{what}: attempt {attempt}/{attempts} failed: {e}, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
