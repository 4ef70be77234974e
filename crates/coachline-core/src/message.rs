use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An incoming event from a channel: free text or a pressed button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Channel name (e.g. "telegram").
    pub channel: String,
    /// Platform-specific user ID.
    pub sender_id: String,
    /// Human-readable sender name.
    pub sender_name: Option<String>,
    /// Message text content. Empty for pure button presses.
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Token of the button that was pressed, if any.
    #[serde(default)]
    pub button: Option<String>,
    /// Platform-specific target for routing the response (e.g. Telegram chat_id).
    #[serde(default)]
    pub reply_target: Option<String>,
    /// Whether this message comes from a group chat.
    #[serde(default)]
    pub is_group: bool,
}

impl IncomingMessage {
    /// Build a plain text event. Used by channels without extra metadata and by tests.
    pub fn text(channel: &str, address: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            sender_id: address.to_string(),
            sender_name: None,
            text: text.to_string(),
            timestamp: Utc::now(),
            button: None,
            reply_target: Some(address.to_string()),
            is_group: false,
        }
    }

    /// Build a button press event.
    pub fn button(channel: &str, address: &str, token: &str) -> Self {
        Self {
            button: Some(token.to_string()),
            ..Self::text(channel, address, "")
        }
    }

    /// The channel address that identifies the account: the reply target
    /// when present, otherwise the sender.
    pub fn address(&self) -> &str {
        self.reply_target.as_deref().unwrap_or(&self.sender_id)
    }
}

/// A button rendered under an outgoing message. The token comes back verbatim
/// in [`IncomingMessage::button`] when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// An outgoing message to send back through a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub metadata: MessageMetadata,
    /// Platform-specific target for routing (e.g. Telegram chat_id).
    #[serde(default)]
    pub reply_target: Option<String>,
    /// Buttons to render under the text, one per row.
    #[serde(default)]
    pub buttons: Vec<Button>,
}

/// Metadata about how a message was generated.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageMetadata {
    /// Which provider produced this response.
    pub provider_used: String,
    /// Token count (if available from the provider).
    pub tokens_used: Option<u64>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// Model identifier (if applicable).
    pub model: Option<String>,
}
