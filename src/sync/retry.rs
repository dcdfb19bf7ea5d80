//! Bounded retry around session expiry.
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::upstream::{Session, UpstreamError, UpstreamResult, UpstreamSource};

/// How many times a call site may run its request when the session expires,
/// and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before `attempt` (0-indexed); the first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Runs `op`; on [`UpstreamError::SessionExpired`] refreshes the session and
/// runs it again, up to the policy's attempt count. Any other outcome returns
/// immediately. The session that produced the final result is handed back.
pub async fn call_with_refresh<S, T, F, Fut>(
    source: &S,
    policy: &RetryPolicy,
    session: Session,
    mut op: F,
) -> (UpstreamResult<T>, Session)
where
    S: UpstreamSource + ?Sized,
    F: FnMut(Session) -> Fut,
    Fut: Future<Output = UpstreamResult<T>>,
{
    let mut session = session;
    let mut attempt = 0;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match op(session.clone()).await {
            Err(UpstreamError::SessionExpired) if attempt + 1 < policy.max_attempts => {
                warn!(attempt, "session expired; refreshing");
                session = refresh_or_keep(source, session).await;
                attempt += 1;
            }
            other => return (other, session),
        }
    }
}

/// Refreshed session, or the old one when the refresh fails.
pub async fn refresh_or_keep<S>(source: &S, session: Session) -> Session
where
    S: UpstreamSource + ?Sized,
{
    match source.refresh_session(&session).await {
        Ok(renewed) => renewed,
        Err(err) => {
            warn!(%err, "session refresh failed; keeping current session");
            session
        }
    }
}
