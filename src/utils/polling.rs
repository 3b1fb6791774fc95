/// Polling utilities for waiting on conditions with a deadline, an attempt budget and cancellation
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration for polling operations
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Wall-clock budget, computed into a deadline once at loop entry
    pub timeout: Option<Duration>,
    pub interval: Duration,
    /// Upper bound on condition evaluations
    pub max_attempts: Option<u32>,
    /// Random extra delay added to each pause, up to this amount
    pub jitter: Duration,
    pub description: String,
}

/// Why a poll loop stopped without producing a value
#[derive(Debug)]
pub enum PollError<E> {
    /// The deadline passed before the condition was met
    TimedOut { budget: Duration, attempts: u32 },
    /// Every allowed attempt was used
    Exhausted { attempts: u32 },
    /// The cancellation token fired
    Cancelled,
    /// The condition reported a hard failure
    Aborted(E),
}

impl PollingConfig {
    /// Create a deadline-bounded polling configuration
    pub fn new(timeout_secs: u64, interval_secs: u64, description: impl Into<String>) -> Self {
        Self {
            timeout: Some(Duration::from_secs(timeout_secs)),
            interval: Duration::from_secs(interval_secs),
            max_attempts: None,
            jitter: Duration::ZERO,
            description: description.into(),
        }
    }

    /// Create an attempt-bounded configuration with a fixed delay between attempts
    pub fn attempts(max_attempts: u32, delay: Duration, description: impl Into<String>) -> Self {
        Self {
            timeout: None,
            interval: delay,
            max_attempts: Some(max_attempts.max(1)),
            jitter: Duration::ZERO,
            description: description.into(),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Poll until condition is met, the deadline passes, attempts run out or `cancel` fires
    ///
    /// The condition receives the 1-based attempt number and should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    ///
    /// No pause follows the final attempt, and a pause never runs past the deadline.
    pub async fn poll<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut condition: F,
    ) -> Result<T, PollError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();
        // A budget too large to represent never expires
        let deadline = self.timeout.and_then(|budget| start.checked_add(budget));
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            attempt += 1;
            match condition(attempt).await {
                Ok(Some(value)) => {
                    info!("✓ {}", self.description);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(PollError::Aborted(e)),
            }

            if let Some(max) = self.max_attempts {
                if attempt >= max {
                    return Err(PollError::Exhausted { attempts: attempt });
                }
            }

            let mut pause = self.interval.saturating_add(self.jitter_sample());
            if let (Some(deadline), Some(budget)) = (deadline, self.timeout) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PollError::TimedOut {
                        budget,
                        attempts: attempt,
                    });
                }
                pause = pause.min(deadline - now);
            }

            debug!(
                "{}: attempt {} not satisfied, sleeping {:?}",
                self.description, attempt, pause
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Poll until condition returns Ok(true)
    ///
    /// Simplified version for boolean conditions
    pub async fn poll_until<F, Fut, E>(
        &self,
        cancel: &CancellationToken,
        mut condition: F,
    ) -> Result<(), PollError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        self.poll(cancel, |attempt| {
            let check = condition(attempt);
            async move {
                match check.await {
                    Ok(true) => Ok(Some(())),
                    Ok(false) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
