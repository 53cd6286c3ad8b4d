use std::time::Duration;

use async_trait::async_trait;
use google_cloud_auth::credentials::{CacheableResource, Credentials};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::client::PushClient;
use crate::error::PushError;
use crate::message::PushMessage;

const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";

/// Configuration for the FCM HTTP v1 client.
#[derive(Debug, Clone)]
pub struct FcmConfig {
    /// Firebase project id.
    pub project_id: String,
    /// Service-account credentials: inline JSON, or a path to a key file.
    pub credentials: String,
    /// Per-send timeout. Timeouts count as failures.
    pub timeout: Duration,
    /// API endpoint override (tests).
    pub endpoint: Option<String>,
}

impl FcmConfig {
    /// Config with the default timeout and endpoint.
    #[must_use]
    pub fn new(project_id: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            credentials: credentials.into(),
            timeout: Duration::from_secs(5),
            endpoint: None,
        }
    }
}

/// FCM HTTP v1 push client.
///
/// Sends `messages:send` requests authenticated with service-account
/// credentials. The message carries the notification block, the string
/// data block, and the APNs/Android hints that mark it as a high-priority
/// alert with a per-send collapse id.
pub struct FcmClient {
    config: FcmConfig,
    credentials: Credentials,
    client: Client,
}

impl FcmClient {
    /// Build a client from inline-JSON or file-based credentials.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Credential`] if the key cannot be read or
    /// parsed, or [`PushError::Http`] if the HTTP client cannot be built.
    pub async fn new(config: FcmConfig) -> Result<Self, PushError> {
        let content = if config.credentials.trim_start().starts_with('{') {
            info!("loading FCM credentials from inline JSON");
            config.credentials.clone()
        } else {
            info!("loading FCM credentials from service account file");
            tokio::fs::read_to_string(&config.credentials)
                .await
                .map_err(|e| {
                    PushError::Credential(format!(
                        "failed to read credentials file '{}': {e}",
                        config.credentials
                    ))
                })?
        };

        let key_value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| PushError::Credential(format!("invalid credentials JSON: {e}")))?;
        let credentials = google_cloud_auth::credentials::service_account::Builder::new(key_value)
            .build()
            .map_err(|e| {
                PushError::Credential(format!("failed to build service account credentials: {e}"))
            })?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            config,
            credentials,
            client,
        })
    }

    fn send_url(&self) -> String {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT);
        format!(
            "{endpoint}/v1/projects/{}/messages:send",
            self.config.project_id
        )
    }

    async fn auth_headers(&self) -> Result<http::HeaderMap, PushError> {
        match self.credentials.headers(http::Extensions::new()).await {
            Ok(CacheableResource::New { data, .. }) => Ok(data),
            Ok(CacheableResource::NotModified) => Err(PushError::Credential(
                "credential provider returned no headers".into(),
            )),
            Err(e) => Err(PushError::Credential(e.to_string())),
        }
    }
}

/// Render the FCM v1 request body for a message.
fn build_body(message: &PushMessage) -> serde_json::Value {
    json!({
        "message": {
            "token": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": {
                "priority": "HIGH",
                "collapse_key": message.collapse_id,
            },
            "apns": {
                "headers": {
                    "apns-push-type": "alert",
                    "apns-priority": "10",
                    "apns-collapse-id": message.collapse_id,
                },
            },
        }
    })
}

#[async_trait]
impl PushClient for FcmClient {
    fn name(&self) -> &str {
        "fcm"
    }

    #[instrument(skip(self, message), fields(collapse_id = %message.collapse_id))]
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        let headers = self.auth_headers().await?;
        let body = build_body(message);

        debug!(project_id = %self.config.project_id, "sending FCM notification");

        let response = self
            .client
            .post(self.send_url())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout
                } else {
                    PushError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "FCM rejected the send");
            return Err(PushError::Provider {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_notification_data_and_hints() {
        let message = PushMessage::new("tok-1", Some("Take meds"), None, "n-42")
            .with_data("reminder_id", "r-1")
            .with_data("timestamp_utc", "2025-01-01T00:00:00+00:00");

        let body = build_body(&message);
        let msg = &body["message"];
        assert_eq!(msg["token"], "tok-1");
        assert_eq!(msg["notification"]["title"], "Take meds");
        assert_eq!(msg["notification"]["body"], "It's time!");
        assert_eq!(msg["data"]["reminder_id"], "r-1");
        assert_eq!(msg["android"]["priority"], "HIGH");
        assert_eq!(msg["android"]["collapse_key"], "n-42");
        assert_eq!(msg["apns"]["headers"]["apns-push-type"], "alert");
        assert_eq!(msg["apns"]["headers"]["apns-priority"], "10");
        assert_eq!(msg["apns"]["headers"]["apns-collapse-id"], "n-42");
    }

    #[test]
    fn send_url_uses_project_id() {
        let config = FcmConfig {
            project_id: "demo".into(),
            credentials: "{}".into(),
            timeout: Duration::from_secs(5),
            endpoint: Some("http://localhost:9099".into()),
        };
        // Only the pure URL construction is exercised here; building a full
        // client requires a valid service-account key.
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let url = format!("{endpoint}/v1/projects/{}/messages:send", config.project_id);
        assert_eq!(url, "http://localhost:9099/v1/projects/demo/messages:send");
    }
}
