//! Conversation turns, kept per address and login role for classifier context.

use super::Store;
use coachline_core::{
    error::CoachlineError,
    model::{MessageTurn, Role, Speaker},
};

fn role_key(role: Option<Role>) -> &'static str {
    role.map(|r| r.as_str()).unwrap_or("none")
}

impl Store {
    /// Record one turn.
    pub async fn record_turn(
        &self,
        address: &str,
        role: Option<Role>,
        speaker: Speaker,
        text: &str,
    ) -> Result<(), CoachlineError> {
        sqlx::query("INSERT INTO messages (address, role, speaker, text) VALUES (?, ?, ?, ?)")
            .bind(address)
            .bind(role_key(role))
            .bind(speaker.as_str())
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(|e| CoachlineError::Store(format!("insert turn failed: {e}")))?;
        Ok(())
    }

    /// The last `limit` turns for an address and role, oldest first.
    pub async fn recent_turns(
        &self,
        address: &str,
        role: Option<Role>,
        limit: usize,
    ) -> Result<Vec<MessageTurn>, CoachlineError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT speaker, text, created_at FROM ( \
                 SELECT id, speaker, text, created_at FROM messages \
                 WHERE address = ? AND role = ? ORDER BY id DESC LIMIT ? \
             ) ORDER BY id ASC",
        )
        .bind(address)
        .bind(role_key(role))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("read turns failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(speaker, text, created_at)| MessageTurn {
                speaker,
                text,
                created_at,
            })
            .collect())
    }
}
