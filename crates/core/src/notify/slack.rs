//! Slack webhook alert sender.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::NotificationError;

const SLACK_TIMEOUT_SECS: u64 = 10;

/// Slack incoming-webhook notifier.
pub struct SlackNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    /// Create a new Slack notifier targeting the given webhook URL.
    pub fn new(webhook_url: String) -> Result<Self, NotificationError> {
        info!("initializing Slack notifier");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SLACK_TIMEOUT_SECS))
            .build()?;
        Ok(Self { webhook_url, http })
    }

    /// Post `message` (Slack mrkdwn) to the webhook.
    pub async fn send_message(&self, message: &str) -> Result<(), NotificationError> {
        debug!(len = message.len(), "sending Slack message");

        let payload = serde_json::json!({
            "text": message,
            "unfurl_links": false,
            "unfurl_media": false,
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::HttpError)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned error");
            return Err(NotificationError::SlackError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        debug!("Slack message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_message_posts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"text": "hello"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.uri())).unwrap();
        notifier.send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_message_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid_token"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(server.uri()).unwrap();
        let err = notifier.send_message("hello").await.unwrap_err();
        assert!(matches!(err, NotificationError::SlackError(ref m) if m.contains("invalid_token")));
    }
}
