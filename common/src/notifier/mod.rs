// Notifier capability: hands one due message to an outbound transport

pub mod http;
pub mod logging;
pub mod retrying;

pub use http::HttpNotifier;
pub use logging::LogNotifier;
pub use retrying::RetryingNotifier;

use crate::errors::NotifyError;
use crate::models::QueuedMessage;
use async_trait::async_trait;

/// Delivers one message. The scheduler calls this exactly once per fired
/// timer and never retries; failures are logged and the message is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), NotifyError>;
}
