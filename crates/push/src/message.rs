use std::collections::HashMap;

/// Notification title used when the payload carries none.
pub const DEFAULT_TITLE: &str = "Reminder";

/// Notification body used when the payload carries none.
pub const DEFAULT_BODY: &str = "It's time!";

/// A push notification ready to send.
///
/// `collapse_id` is a fresh UUID per send, used as the platform collapse
/// key so the OS never merges distinct reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    /// Data block delivered alongside the notification; all values are
    /// strings per the provider contract.
    pub data: HashMap<String, String>,
    pub collapse_id: String,
}

impl PushMessage {
    /// Build a message, substituting the default title/body for absent
    /// overrides.
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        title: Option<&str>,
        body: Option<&str>,
        collapse_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            title: title.unwrap_or(DEFAULT_TITLE).to_owned(),
            body: body.unwrap_or(DEFAULT_BODY).to_owned(),
            data: HashMap::new(),
            collapse_id: collapse_id.into(),
        }
    }

    /// Add a data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
