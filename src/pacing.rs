use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ApiSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Delay applied between failed backend attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(n-1)` after the n-th failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let shift = failed_attempt.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_settings(settings: &ApiSettings) -> Self {
        let base = Duration::from_millis(settings.retry_backoff_ms);
        let backoff = match settings.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(settings.max_backoff_ms),
            },
        };
        Self::new(settings.max_retries, backoff)
    }
}

/// Blocking-delay seam between backend calls.
///
/// Returns an error when the build has been cancelled; callers propagate it
/// so the whole build stops.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TokioSleeper {
    cancel: CancellationToken,
}

impl TokioSleeper {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("build cancelled");
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => anyhow::bail!("build cancelled"),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Retry policy, post-call pacing interval and the sleeper that enforces both.
#[derive(Clone)]
pub struct Pacing {
    pub policy: RetryPolicy,
    pub rate_limit_delay: Duration,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Pacing {
    pub fn new(policy: RetryPolicy, rate_limit_delay: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            policy,
            rate_limit_delay,
            sleeper,
        }
    }

    pub fn from_settings(settings: &ApiSettings, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::new(
            RetryPolicy::from_settings(settings),
            Duration::from_millis(settings.rate_limit_delay_ms),
            sleeper,
        )
    }

    /// Pause enforced after every successful backend call.
    pub async fn after_success(&self) -> anyhow::Result<()> {
        self.sleeper.sleep(self.rate_limit_delay).await
    }
}

impl std::fmt::Debug for Pacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacing")
            .field("policy", &self.policy)
            .field("rate_limit_delay", &self.rate_limit_delay)
            .finish_non_exhaustive()
    }
}
