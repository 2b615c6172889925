//! Transport-independent "poll until ready" helper.
//!
//! A [`RetryPolicy`] decides how many times and how often a check runs; the
//! check itself reports a [`PollStep`]. The loop suspends for the policy's
//! delay before every attempt, so a source that never becomes ready is given
//! up on after the sum of all delays.
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max_interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before the zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                factor,
                max_interval,
            } => {
                let scaled = self.interval.as_secs_f64() * factor.powi(attempt as i32);
                Duration::from_secs_f64(scaled.min(max_interval.as_secs_f64()))
            }
        }
    }

    /// Upper bound on time spent waiting when every attempt is pending.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.delay(a)).sum()
    }
}

/// Result of a single check.
#[derive(Debug)]
pub enum PollStep<T, E> {
    Ready(T),
    Pending,
    Failed(E),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("poll failed: {0}")]
    Failed(E),
}

/// Run `check` under `policy` until it reports ready or failed, or the
/// attempt budget runs out.
pub async fn poll_until<T, E, F, Fut>(policy: &RetryPolicy, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollStep<T, E>>,
{
    for attempt in 0..policy.max_attempts {
        tokio::time::sleep(policy.delay(attempt)).await;
        match check(attempt).await {
            PollStep::Ready(value) => return Ok(value),
            PollStep::Failed(err) => return Err(PollError::Failed(err)),
            PollStep::Pending => {
                debug!(attempt, max = policy.max_attempts, "still pending");
            }
        }
    }
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}
