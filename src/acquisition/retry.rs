use std::time::Duration;

use tokio::time::sleep;

use crate::{
    acquisition::error::{AcquisitionError, retry_exhausted},
    provider::{AddressProvider, ProviderError},
};

/// Bounded, strictly sequential retry around a single release call.
///
/// A failed release leaves a billed address behind, so exhaustion is always
/// surfaced with the last provider error rather than swallowed.
#[derive(Debug, Clone)]
pub struct ReleaseRetrier {
    max_attempts: u32,
    delay: Duration,
}

impl ReleaseRetrier {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns the number of attempts it took.
    pub async fn release(
        &self,
        provider: &dyn AddressProvider,
        allocation_id: &str,
    ) -> Result<u32, AcquisitionError> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let err: ProviderError = match provider.release(allocation_id).await {
                Ok(()) => {
                    tracing::debug!(
                        target: "acquisition",
                        allocation_id = allocation_id,
                        attempt = attempt,
                        "release_succeeded"
                    );
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                tracing::error!(
                    target: "acquisition",
                    allocation_id = allocation_id,
                    attempts = attempt,
                    error = %err,
                    "release_retries_exhausted"
                );
                return Err(retry_exhausted(allocation_id, attempt, err));
            }

            tracing::warn!(
                target: "acquisition",
                allocation_id = allocation_id,
                attempt = attempt,
                max_attempts = self.max_attempts,
                delay_ms = self.delay.as_millis() as u64,
                error = %err,
                "release_attempt_failed"
            );
            sleep(self.delay).await;
        }
    }
}
