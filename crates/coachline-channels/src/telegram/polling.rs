//! Long-polling update loop and Channel trait implementation.

use super::send::answer_callback;
use super::types::{TgResponse, TgUpdate};
use super::TelegramChannel;
use async_trait::async_trait;
use coachline_core::{
    error::CoachlineError,
    message::{IncomingMessage, OutgoingMessage},
    traits::Channel,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<mpsc::Receiver<IncomingMessage>, CoachlineError> {
        self.register_commands().await;

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let allowed_users = self.config.allowed_users.clone();
        let last_update_id = self.last_update_id.clone();

        info!("Telegram channel starting long polling...");

        tokio::spawn(async move {
            let mut backoff_secs: u64 = 1;

            loop {
                let last = last_update_id.lock().await;
                let offset = last.map(|id| id + 1);
                drop(last);

                let mut url = format!("{base_url}/getUpdates?timeout=30");
                if let Some(off) = offset {
                    url.push_str(&format!("&offset={off}"));
                }

                let resp = match client
                    .get(&url)
                    .timeout(Duration::from_secs(35))
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        error!("telegram poll error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(60);
                        continue;
                    }
                };

                let body: TgResponse<Vec<TgUpdate>> = match resp.json().await {
                    Ok(b) => b,
                    Err(e) => {
                        error!("telegram parse error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(60);
                        continue;
                    }
                };

                if !body.ok {
                    error!(
                        "telegram API error (retry in {backoff_secs}s): {}",
                        body.description.unwrap_or_default()
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(60);
                    continue;
                }

                // Successful poll -- reset backoff.
                backoff_secs = 1;

                let updates = body.result.unwrap_or_default();

                if let Some(last_update) = updates.last() {
                    *last_update_id.lock().await = Some(last_update.update_id);
                }

                for update in updates {
                    if let Some(ref query) = update.callback_query {
                        answer_callback(&client, &base_url, &query.id).await;
                    }

                    let Some(incoming) = to_incoming(update, &allowed_users) else {
                        continue;
                    };

                    if tx.send(incoming).await.is_err() {
                        info!("telegram channel receiver dropped, stopping poll");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send_typing(&self, target: &str) -> Result<(), CoachlineError> {
        let chat_id = parse_chat_id(target)?;
        self.send_chat_action(chat_id, "typing").await
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), CoachlineError> {
        let target = message.reply_target.as_deref().ok_or_else(|| {
            CoachlineError::Channel("no reply_target on outgoing message".into())
        })?;
        let chat_id = parse_chat_id(target)?;
        self.send_text(chat_id, &message.text, &message.buttons).await
    }

    async fn stop(&self) -> Result<(), CoachlineError> {
        info!("Telegram channel stopped");
        Ok(())
    }
}

fn parse_chat_id(target: &str) -> Result<i64, CoachlineError> {
    target
        .parse()
        .map_err(|e| CoachlineError::Channel(format!("invalid telegram chat_id '{target}': {e}")))
}

/// Convert an update into an inbound event. Returns `None` for updates the
/// bot ignores: non-text messages, group chats and unauthorized users.
pub(crate) fn to_incoming(update: TgUpdate, allowed_users: &[i64]) -> Option<IncomingMessage> {
    let (user, chat, text, button) = if let Some(query) = update.callback_query {
        let chat = query.message?.chat;
        let data = query.data?;
        (query.from, chat, String::new(), Some(data))
    } else {
        let msg = update.message?;
        let text = msg.text?;
        (msg.from?, msg.chat, text, None)
    };

    // Auth check.
    if !allowed_users.is_empty() && !allowed_users.contains(&user.id) {
        warn!("ignoring update from unauthorized user {}", user.id);
        return None;
    }

    // Coaching is one-to-one; group chats are dropped.
    if chat.is_group() {
        debug!("telegram: ignoring group update from chat {}", chat.id);
        return None;
    }

    Some(IncomingMessage {
        id: Uuid::new_v4(),
        channel: "telegram".to_string(),
        sender_id: user.id.to_string(),
        sender_name: Some(user.display_name()),
        text,
        timestamp: chrono::Utc::now(),
        button,
        reply_target: Some(chat.id.to_string()),
        is_group: false,
    })
}
