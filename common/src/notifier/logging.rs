use crate::errors::NotifyError;
use crate::models::QueuedMessage;
use crate::notifier::Notifier;
use async_trait::async_trait;

/// Log-based notifier (default implementation)
///
/// Writes each delivery at INFO level. Useful for development and as a
/// stand-in until a push transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    #[tracing::instrument(skip(self, message), fields(key = %message.key))]
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), NotifyError> {
        tracing::info!(
            title = message.title.as_deref().unwrap_or(""),
            message = %message.message,
            due_at = %message.due_at,
            "NOTIFY: delivering message"
        );
        Ok(())
    }
}
