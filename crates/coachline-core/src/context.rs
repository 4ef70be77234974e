use serde::{Deserialize, Serialize};

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// "user" or "assistant".
    pub role: String,
    /// The message content.
    pub content: String,
}

/// Conversation context passed to an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// System prompt prepended to every request.
    pub system_prompt: String,
    /// Conversation history (oldest first).
    pub history: Vec<ContextEntry>,
    /// The current user message.
    pub current_message: String,
    /// Override the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Cap on response tokens. Providers fall back to their own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A structured message for API-based providers (OpenAI, Anthropic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    /// "user" or "assistant".
    pub role: String,
    /// The message content.
    pub content: String,
}

impl Context {
    /// Create a context with a system prompt and a current message.
    pub fn new(system_prompt: &str, message: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
            current_message: message.to_string(),
            model: None,
            max_tokens: None,
        }
    }

    /// Convert context to structured API messages.
    ///
    /// Returns `(system_prompt, messages)`; the system prompt is separated
    /// because Anthropic requires it outside the messages array.
    pub fn to_api_messages(&self) -> (String, Vec<ApiMessage>) {
        let mut messages = Vec::with_capacity(self.history.len() + 1);

        for entry in &self.history {
            messages.push(ApiMessage {
                role: entry.role.clone(),
                content: entry.content.clone(),
            });
        }

        messages.push(ApiMessage {
            role: "user".to_string(),
            content: self.current_message.clone(),
        });

        (self.system_prompt.clone(), messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_new_has_no_history() {
        let ctx = Context::new("Classify.", "log water");
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.system_prompt, "Classify.");
        assert!(ctx.model.is_none());
    }

    #[test]
    fn test_context_deserialize_without_overrides() {
        let json = r#"{"system_prompt":"test","history":[],"current_message":"hi"}"#;
        let ctx: Context = serde_json::from_str(json).unwrap();
        assert!(ctx.max_tokens.is_none());
        assert!(ctx.model.is_none());
    }

    #[test]
    fn test_to_api_messages_with_history() {
        let ctx = Context {
            system_prompt: "Be brief.".into(),
            history: vec![
                ContextEntry {
                    role: "user".into(),
                    content: "/log".into(),
                },
                ContextEntry {
                    role: "assistant".into(),
                    content: "Which habit?".into(),
                },
            ],
            current_message: "how am I doing".into(),
            model: None,
            max_tokens: Some(256),
        };
        let (system, messages) = ctx.to_api_messages();
        assert_eq!(system, "Be brief.");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "how am I doing");
    }
}
