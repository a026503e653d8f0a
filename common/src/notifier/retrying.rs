// Retry layer around any notifier

use crate::errors::NotifyError;
use crate::models::QueuedMessage;
use crate::notifier::Notifier;
use crate::retry::RetryStrategy;
use async_trait::async_trait;
use tracing::{instrument, warn};

/// Retries failed deliveries of an inner notifier according to a strategy.
///
/// The scheduler still makes a single `deliver` call per fired timer; only
/// this wrapper loops.
pub struct RetryingNotifier<N, S> {
    inner: N,
    strategy: S,
}

impl<N, S> RetryingNotifier<N, S>
where
    N: Notifier,
    S: RetryStrategy,
{
    pub fn new(inner: N, strategy: S) -> Self {
        Self { inner, strategy }
    }
}

#[async_trait]
impl<N, S> Notifier for RetryingNotifier<N, S>
where
    N: Notifier,
    S: RetryStrategy,
{
    #[instrument(skip(self, message), fields(key = %message.key))]
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), NotifyError> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.deliver(message).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match self.strategy.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        error = %error,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None if attempt == 0 => return Err(error),
                None => {
                    return Err(NotifyError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: error.to_string(),
                    })
                }
            }
        }
    }
}
