//! Outbound mail through an HTTP webhook.
//!
//! The mail service receives a JSON message per code or reset token and is
//! responsible for rendering and sending the actual e-mail.

use async_trait::async_trait;
use hr_auth::otp::{DispatchError, OtpDispatcher, OtpPurpose};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Timeout for a single webhook call
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body posted to the mail webhook
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailMessage<'a> {
    OneTimeCode {
        to: &'a str,
        purpose: OtpPurpose,
        code: &'a str,
        expires_in_secs: u64,
    },
    PasswordReset {
        to: &'a str,
        token: &'a str,
        expires_in_secs: u64,
    },
}

/// Posts every message to `url`
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: String,
}

impl WebhookDispatcher {
    /// Create a dispatcher with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("hr-server/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DispatchError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, message: &MailMessage<'_>) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| DispatchError(format!("Mail webhook unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Mail webhook rejected message");
            return Err(DispatchError(format!("Mail webhook returned {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl OtpDispatcher for WebhookDispatcher {
    async fn dispatch_code(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code: &str,
        expires_in: Duration,
    ) -> Result<(), DispatchError> {
        self.post(&MailMessage::OneTimeCode {
            to: email,
            purpose,
            code,
            expires_in_secs: expires_in.as_secs(),
        })
        .await
    }

    async fn dispatch_reset(
        &self,
        email: &str,
        token: &str,
        expires_in: Duration,
    ) -> Result<(), DispatchError> {
        self.post(&MailMessage::PasswordReset {
            to: email,
            token,
            expires_in_secs: expires_in.as_secs(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let json = serde_json::to_value(MailMessage::OneTimeCode {
            to: "a@example.com",
            purpose: OtpPurpose::TwoFactor,
            code: "123456",
            expires_in_secs: 300,
        })
        .unwrap();

        assert_eq!(json["kind"], "one_time_code");
        assert_eq!(json["purpose"], "two_factor");
        assert_eq!(json["expires_in_secs"], 300);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_reports_error() {
        let dispatcher = WebhookDispatcher::new("http://127.0.0.1:9/mail").unwrap();
        let result = dispatcher
            .dispatch_reset("a@example.com", "token", Duration::from_secs(60))
            .await;
        assert!(result.is_err());
    }
}
