use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff with jitter for page-level retries
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Delay for the current attempt, capped at `max_delay_ms` plus up to 25% jitter.
    pub fn next_delay(&self) -> Duration {
        let exp = self
            .initial_delay_ms
            .saturating_mul(1u64.checked_shl(self.current_attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::random::<u64>() % (capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(100, 500, 10);

        assert!(backoff.next_delay().as_millis() >= 100);
        backoff.current_attempt = 1;
        assert!(backoff.next_delay().as_millis() >= 200);
        backoff.current_attempt = 40;
        // cap + cap/4 jitter
        assert!(backoff.next_delay().as_millis() <= 625);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let mut backoff = ExponentialBackoff::new(1, 2, 2);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
    }
}
