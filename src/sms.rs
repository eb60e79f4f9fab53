//! The `Sms` value type: a message in flight, either inbound or outbound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single SMS message, in flight between a modem and the rest of the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sms {
    pub id: String,
    pub recipient: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    /// Identifier of the modem that received this message, if inbound.
    pub receiving_modem: Option<String>,
    pub flash: bool,
    pub created_timestamp: DateTime<Utc>,
}

impl Sms {
    /// Build a new SMS. `id` defaults to a fresh UUID when `None` is given;
    /// `timestamp` defaults to now (UTC) when `None` is given.
    #[must_use]
    pub fn new(
        id: Option<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
        sender: Option<String>,
        receiving_modem: Option<String>,
        flash: bool,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            recipient: recipient.into(),
            text: text.into(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
            sender,
            receiving_modem,
            flash,
            created_timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn has_sender(&self) -> bool {
        self.sender.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Age since the message's logical timestamp (not its creation time).
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    /// Render as a human-readable block, used as the e-mail body.
    #[must_use]
    pub fn to_display_string(&self, content: bool) -> String {
        let fmt = "%Y-%m-%d %H:%M:%S  %z";
        let mut out = String::new();
        out.push_str(&format!("SMS ID            : {}\n", self.id));
        out.push_str(&format!(
            "Sender            : {}\n",
            self.sender.as_deref().unwrap_or("")
        ));
        out.push_str(&format!("Recipient         : {}\n", self.recipient));
        out.push_str(&format!(
            "Message timestamp : {}\n",
            self.timestamp.format(fmt)
        ));
        out.push_str(&format!(
            "Created timestamp : {}\n",
            self.created_timestamp.format(fmt)
        ));
        out.push_str(&format!("Flash message     : {}\n", self.flash));
        if let Some(ref modem) = self.receiving_modem {
            out.push_str(&format!("Receiving modem   : {modem}\n"));
        }
        if content {
            out.push_str("----------------------------------------\n");
            out.push_str(&self.text);
            out.push('\n');
            out.push_str("----------------------------------------\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_id_and_timestamp_when_absent() {
        let sms = Sms::new(None, "+15551234567", "hi", None, None, None, false);
        assert!(!sms.id.is_empty());
        assert!(sms.age().num_seconds() < 2);
    }

    #[test]
    fn has_sender_false_for_empty_string() {
        let sms = Sms::new(
            None,
            "+1",
            "hi",
            None,
            Some(String::new()),
            None,
            false,
        );
        assert!(!sms.has_sender());
    }

    #[test]
    fn display_string_includes_separators_only_when_content_requested() {
        let sms = Sms::new(None, "+1", "body text", None, Some("+2".into()), None, false);
        assert!(sms.to_display_string(true).contains("body text"));
        assert!(!sms.to_display_string(false).contains("body text"));
    }
}
