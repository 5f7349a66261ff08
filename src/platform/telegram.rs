use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::adaptors::trace::{Settings, Trace};
use teloxide::dispatching::ShutdownToken;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::platform::{
    ChatTransport, CommandKind, InboundCommand, OutboundMessage, Sender, TextFormat,
};

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "subscribe to notifications")]
    Start,
    #[command(description = "stop receiving notifications")]
    Delete,
}

/// Username of the authorized bot, injected into the update handler
#[derive(Clone)]
struct BotName(Arc<str>);

struct RunningDispatcher {
    handle: JoinHandle<()>,
    shutdown: ShutdownToken,
}

/// Telegram session backed by a long-polling teloxide dispatcher
pub struct TelegramTransport {
    bot: Trace<Bot>,
    capacity: usize,
    running: Option<RunningDispatcher>,
}

impl TelegramTransport {
    /// With `trace_api` every Bot API request and response is logged at trace
    /// level under the `teloxide_core::adaptors::trace` target.
    pub fn new(bot_token: &str, capacity: usize, trace_api: bool) -> Self {
        Self {
            bot: Trace::new(Bot::new(bot_token), trace_settings(trace_api)),
            capacity,
            running: None,
        }
    }
}

fn trace_settings(trace_api: bool) -> Settings {
    if trace_api {
        Settings::TRACE_EVERYTHING
    } else {
        Settings::empty()
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn start(&mut self) -> Result<mpsc::Receiver<InboundCommand>> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to authorize Telegram bot")?;
        let username = me.username().to_string();
        info!("Authorized on account {}", username);

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to register bot commands: {}", e);
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let handler = Update::filter_message().endpoint(forward_message);

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![tx, BotName(Arc::from(username))])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        let shutdown = dispatcher.shutdown_token();
        // The dispatcher owns the only sender; the channel closes when it stops.
        let handle = tokio::spawn(async move {
            dispatcher.dispatch().await;
            info!("Telegram update stream ended");
        });

        self.running = Some(RunningDispatcher { handle, shutdown });
        Ok(rx)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut request = self
            .bot
            .send_message(ChatId(message.chat_id), message.text.clone());
        if let Some(message_id) = message.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(message_id)));
        }
        if message.format == TextFormat::Html {
            request = request.parse_mode(ParseMode::Html);
        }
        request
            .await
            .with_context(|| format!("Failed to send message to chat {}", message.chat_id))?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        match running.shutdown.shutdown() {
            Ok(stopped) => stopped.await,
            // Not dispatching yet, or already finished
            Err(_) => running.handle.abort(),
        }
        if let Err(e) = running.handle.await {
            if !e.is_cancelled() {
                warn!("Telegram dispatcher task failed: {}", e);
            }
        }
        info!("Telegram session closed");
    }
}

async fn forward_message(
    msg: Message,
    tx: mpsc::Sender<InboundCommand>,
    bot_name: BotName,
) -> ResponseResult<()> {
    let sender = msg
        .from
        .as_ref()
        .map(|user| Sender {
            user_id: user.id.0,
            username: user.username.clone(),
            is_bot: user.is_bot,
        })
        .unwrap_or_default();
    let text = msg.text().unwrap_or_default().to_string();

    let inbound = InboundCommand {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        command: parse_command(&text, &bot_name.0),
        text,
        sender,
    };

    if tx.send(inbound).await.is_err() {
        debug!("Relay loop stopped, dropping message {}", msg.id.0);
    }
    Ok(())
}

/// Recognize `/start` and `/delete` (optionally `@<bot_name>`); arguments are ignored.
fn parse_command(text: &str, bot_name: &str) -> Option<CommandKind> {
    let token = text.split_whitespace().next()?;
    match Command::parse(token, bot_name).ok()? {
        Command::Start => Some(CommandKind::Subscribe),
        Command::Delete => Some(CommandKind::Unsubscribe),
    }
}
