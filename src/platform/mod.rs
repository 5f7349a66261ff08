pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Commands the relay understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Subscribe,
    Unsubscribe,
}

/// Who sent an inbound update. Only used for logging.
#[derive(Debug, Clone, Default)]
pub struct Sender {
    pub user_id: u64,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "username={} user_id={} is_bot={}",
            self.username.as_deref().unwrap_or("-"),
            self.user_id,
            self.is_bot
        )
    }
}

/// A chat update received from the platform
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub chat_id: i64,
    pub message_id: i32,
    pub command: Option<CommandKind>,
    /// The message text
    pub text: String,
    pub sender: Sender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

/// A message to deliver to one chat
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
    /// Message id this is threaded under, if any
    pub reply_to: Option<i32>,
    pub format: TextFormat,
}

impl OutboundMessage {
    pub fn reply(chat_id: i64, message_id: i32, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to: Some(message_id),
            format: TextFormat::Plain,
        }
    }

    pub fn notification(chat_id: i64, html: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: html.into(),
            reply_to: None,
            format: TextFormat::Html,
        }
    }
}

/// A chat platform session: inbound updates plus outbound sends.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Establish the session and start receiving updates in the background.
    /// The returned channel closes when the update stream ends.
    async fn start(&mut self) -> Result<mpsc::Receiver<InboundCommand>>;

    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Stop receiving updates and release the session.
    async fn shutdown(&mut self);
}
