use crate::{
    context::Context,
    error::CoachlineError,
    message::{IncomingMessage, OutgoingMessage},
};
use async_trait::async_trait;

/// LLM provider trait.
///
/// Every backend (Anthropic API, OpenAI-compatible endpoints) implements this
/// trait. Coachline uses it for free-text intent classification only.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether this provider requires an API key to function.
    fn requires_api_key(&self) -> bool;

    /// Send a context to the provider and get a response.
    async fn complete(&self, context: &Context) -> Result<OutgoingMessage, CoachlineError>;

    /// Check if the provider is available and ready.
    async fn is_available(&self) -> bool;
}

/// Messaging channel trait.
///
/// Every messaging platform implements this trait to receive events and
/// send replies, with optional buttons.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for incoming events.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<IncomingMessage>, CoachlineError>;

    /// Send a message through this channel.
    async fn send(&self, message: OutgoingMessage) -> Result<(), CoachlineError>;

    /// Send a typing indicator to show the bot is processing.
    async fn send_typing(&self, _target: &str) -> Result<(), CoachlineError> {
        Ok(())
    }

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), CoachlineError>;
}

/// Export collaborator: turns tabular data into a downloadable artifact.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Write `rows` under `headers` and return a reference to the artifact
    /// (a path or URL the user can fetch).
    async fn export(
        &self,
        name: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<String, CoachlineError>;
}
