//! Bounded poll loop that waits for the system to reach an expected state.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::backend::{ExpectedState, Installer};
use crate::error::OphopError;

/// Timeout and poll interval for one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationWindow {
    pub timeout: Duration,
    pub interval: Duration,
}

impl ValidationWindow {
    pub const fn from_secs(timeout: u64, interval: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout),
            interval: Duration::from_secs(interval),
        }
    }

    /// Upper bound on the number of polls one validation may issue.
    pub fn max_polls(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        let timeout = self.timeout.as_millis();
        u64::try_from(timeout.div_ceil(interval)).unwrap_or(u64::MAX).saturating_add(1)
    }
}

/// Result of one validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub success: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: Option<String>,
    expected: String,
}

impl ValidationOutcome {
    /// Convert a failed outcome into `ValidationTimeout`.
    pub fn into_result(self) -> Result<Self, OphopError> {
        if self.success {
            return Ok(self);
        }
        Err(OphopError::ValidationTimeout {
            expected: self.expected,
            elapsed_secs: self.elapsed.as_secs(),
            attempts: self.attempts,
            last_error: self
                .last_error
                .unwrap_or_else(|| "no observation recorded".to_string()),
        })
    }
}

/// Polls an installer until its state matches an expectation.
pub struct Validator<'a, I: Installer + ?Sized> {
    installer: &'a I,
}

impl<'a, I: Installer + ?Sized> Validator<'a, I> {
    pub const fn new(installer: &'a I) -> Self {
        Self { installer }
    }

    /// Poll until `expected` is observed or `window.timeout` elapses.
    ///
    /// The first poll is immediate and later polls are `window.interval`
    /// apart. The deadline is checked after every poll. A poll still pending
    /// at `timeout + interval` is abandoned and counted as a mismatch, so a
    /// call never blocks longer than that.
    pub async fn validate(
        &self,
        expected: &ExpectedState,
        window: ValidationWindow,
    ) -> ValidationOutcome {
        let start = Instant::now();
        let hard_deadline = start + window.timeout + window.interval;
        let mut attempts = 0u32;
        let mut last_error = None;

        info!(
            "Validating {} via {} (timeout: {}s, interval: {}s)",
            expected,
            self.installer.name(),
            window.timeout.as_secs(),
            window.interval.as_secs()
        );

        loop {
            attempts += 1;

            let budget = hard_deadline.saturating_duration_since(Instant::now());
            match timeout(budget, self.installer.observe()).await {
                Err(_) => {
                    warn!(
                        "Poll {}: observation timed out after {}s",
                        attempts,
                        budget.as_secs()
                    );
                    last_error = Some(format!(
                        "observation timed out after {}s",
                        budget.as_secs()
                    ));
                }
                Ok(Ok(state)) => match expected.check(&state) {
                    Ok(()) => {
                        debug!("Observed {} after {} polls", expected, attempts);
                        return ValidationOutcome {
                            success: true,
                            attempts,
                            elapsed: start.elapsed(),
                            last_error: None,
                            expected: expected.to_string(),
                        };
                    }
                    Err(mismatch) => {
                        debug!("Poll {}: {}", attempts, mismatch);
                        last_error = Some(mismatch);
                    }
                },
                Ok(Err(e)) => {
                    warn!("Poll {}: failed to observe state: {:#}", attempts, e);
                    last_error = Some(format!("{e:#}"));
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= window.timeout {
                warn!(
                    "Gave up waiting for {} after {}s and {} polls",
                    expected,
                    elapsed.as_secs(),
                    attempts
                );
                return ValidationOutcome {
                    success: false,
                    attempts,
                    elapsed,
                    last_error,
                    expected: expected.to_string(),
                };
            }

            sleep(window.interval).await;
        }
    }
}
