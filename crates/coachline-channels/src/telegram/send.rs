//! Outbound Bot API calls: messages with inline keyboards, chat actions,
//! callback acknowledgements and the command menu.

use super::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use super::TelegramChannel;
use coachline_core::{error::CoachlineError, message::Button};
use tracing::{debug, info, warn};

/// Telegram's hard limit for a single message.
pub(crate) const MAX_MESSAGE_LEN: usize = 4096;

/// Telegram rejects callback data above 64 bytes.
pub(crate) const MAX_CALLBACK_DATA: usize = 64;

/// Commands shown in the Telegram menu.
const MENU_COMMANDS: &[(&str, &str)] = &[
    ("help", "Show what you can do here"),
    ("register", "Create a trainer or client profile"),
    ("switch_role", "Switch between your trainer and client profiles"),
    ("stop", "Stop the task in progress"),
    ("logout", "Log out of the current profile"),
];

impl TelegramChannel {
    /// Send a text message to a chat. Long texts are split; buttons go on
    /// the last chunk.
    pub(crate) async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), CoachlineError> {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if i == last {
                if let Some(markup) = keyboard(buttons) {
                    body["reply_markup"] = serde_json::to_value(markup)?;
                }
            }

            let resp = self
                .client
                .post(format!("{}/sendMessage", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| CoachlineError::Channel(format!("telegram send failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let error_text = resp.text().await.unwrap_or_default();
                warn!("telegram send got {status}: {error_text}");
                return Err(CoachlineError::Channel(format!(
                    "telegram sendMessage returned {status}"
                )));
            }
        }

        Ok(())
    }

    /// Send a chat action (e.g. "typing").
    pub(crate) async fn send_chat_action(
        &self,
        chat_id: i64,
        action: &str,
    ) -> Result<(), CoachlineError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": action,
        });

        self.client
            .post(format!("{}/sendChatAction", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CoachlineError::Channel(format!("telegram sendChatAction failed: {e}"))
            })?;

        Ok(())
    }

    /// Register the bot command menu.
    pub(crate) async fn register_commands(&self) {
        let commands: Vec<serde_json::Value> = MENU_COMMANDS
            .iter()
            .map(|(command, description)| {
                serde_json::json!({ "command": command, "description": description })
            })
            .collect();
        let body = serde_json::json!({ "commands": commands });

        let url = format!("{}/setMyCommands", self.base_url);
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("registered Telegram bot commands");
            }
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                warn!("failed to register Telegram bot commands: {body}");
            }
            Err(e) => {
                warn!("failed to register Telegram bot commands: {e}");
            }
        }
    }
}

/// Acknowledge a callback query so the client stops its spinner.
pub(crate) async fn answer_callback(client: &reqwest::Client, base_url: &str, query_id: &str) {
    let body = serde_json::json!({ "callback_query_id": query_id });
    if let Err(e) = client
        .post(format!("{base_url}/answerCallbackQuery"))
        .json(&body)
        .send()
        .await
    {
        debug!("telegram answerCallbackQuery failed: {e}");
    }
}

/// One button per row. Tokens too long for callback data are dropped.
pub(crate) fn keyboard(buttons: &[Button]) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .iter()
        .filter(|b| {
            let fits = b.token.len() <= MAX_CALLBACK_DATA;
            if !fits {
                warn!("telegram: dropping button '{}' with oversized token", b.label);
            }
            fits
        })
        .map(|b| {
            vec![InlineKeyboardButton {
                text: b.label.clone(),
                callback_data: b.token.clone(),
            }]
        })
        .collect();

    (!rows.is_empty()).then_some(InlineKeyboardMarkup {
        inline_keyboard: rows,
    })
}

/// Split a message into chunks of at most `max_len` bytes, preferring line
/// breaks and never cutting inside a UTF-8 character.
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
