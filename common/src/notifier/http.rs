// HTTP push notifier

use crate::errors::NotifyError;
use crate::models::QueuedMessage;
use crate::notifier::Notifier;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Posts each message as a form to a push-notification API
/// (`token`, `user`, `message`, optional `title`, `timestamp` in seconds).
///
/// Any transport error or non-2xx response is a failed delivery.
pub struct HttpNotifier {
    client: Client,
    api_url: String,
    token: String,
    user: String,
}

impl HttpNotifier {
    /// Create a new HttpNotifier with the specified timeout
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        user: impl Into<String>,
        timeout_seconds: u64,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| {
                NotifyError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
            user: user.into(),
        })
    }

    fn form(&self, message: &QueuedMessage) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("token", self.token.clone()),
            ("user", self.user.clone()),
            ("message", message.message.clone()),
            ("timestamp", message.due_at.timestamp().to_string()),
        ];
        if let Some(title) = &message.title {
            form.push(("title", title.clone()));
        }
        form
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(skip(self, message), fields(key = %message.key, url = %self.api_url))]
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.api_url)
            .form(&self.form(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Notification endpoint rejected message");
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(status = status.as_u16(), "Notification accepted");
        Ok(())
    }
}
