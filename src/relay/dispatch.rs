use tracing::{error, info};

use super::RelayContext;
use crate::platform::{CommandKind, InboundCommand, OutboundMessage};
use crate::registry::RegistryError;

pub const SUBSCRIBED: &str = "✅ You have been successfully subscribed";
pub const ALREADY_SUBSCRIBED: &str = "⚠️ You are already subscribed";
pub const UNSUBSCRIBED: &str = "✅ You have successfully unsubscribed";
pub const ALREADY_UNSUBSCRIBED: &str = "⚠️ You have already unsubscribed";
pub const INTERNAL_ERROR: &str = "internal error";
pub const NOT_ANSWERING: &str = "I don't answer messages, please don't text me";

/// Apply one chat update to the registry and reply to it. Exactly one reply
/// is attempted for every update, threaded under the original message.
pub async fn dispatch(ctx: &RelayContext<'_>, command: InboundCommand) {
    let reply = match command.command {
        Some(CommandKind::Subscribe) => subscribe(ctx, &command).await,
        Some(CommandKind::Unsubscribe) => unsubscribe(ctx, &command).await,
        None => {
            info!(
                "Received message from {} in chat {}: {}",
                command.sender, command.chat_id, command.text
            );
            NOT_ANSWERING
        }
    };

    ctx.deliver(OutboundMessage::reply(
        command.chat_id,
        command.message_id,
        reply,
    ))
    .await;
}

async fn subscribe(ctx: &RelayContext<'_>, command: &InboundCommand) -> &'static str {
    match ctx.registry.add(command.chat_id).await {
        Ok(()) => {
            info!("Subscribed chat {} ({})", command.chat_id, command.sender);
            SUBSCRIBED
        }
        Err(RegistryError::AlreadyExists(_)) => ALREADY_SUBSCRIBED,
        Err(e) => {
            error!("Failed to add subscriber {}: {:#}", command.chat_id, e);
            INTERNAL_ERROR
        }
    }
}

async fn unsubscribe(ctx: &RelayContext<'_>, command: &InboundCommand) -> &'static str {
    match ctx.registry.remove(command.chat_id).await {
        Ok(()) => {
            info!("Unsubscribed chat {} ({})", command.chat_id, command.sender);
            UNSUBSCRIBED
        }
        Err(RegistryError::NotFound(_)) => ALREADY_UNSUBSCRIBED,
        Err(e) => {
            error!("Failed to remove subscriber {}: {:#}", command.chat_id, e);
            INTERNAL_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TextFormat;
    use crate::registry::{SqliteRegistry, SubscriberRegistry};
    use crate::testing::{inbound, sent, FailingRegistry, MockChat};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_subscribe_twice_keeps_one_entry() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let (chat, _tx) = MockChat::new();
        let log = chat.sent_log();
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(333, 1, Some(CommandKind::Subscribe), "/start")).await;
        dispatch(&ctx, inbound(333, 2, Some(CommandKind::Subscribe), "/start")).await;

        let replies = sent(&log);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], OutboundMessage::reply(333, 1, SUBSCRIBED));
        assert_eq!(replies[1], OutboundMessage::reply(333, 2, ALREADY_SUBSCRIBED));
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_existing() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry.add(10).await.unwrap();
        let (chat, _tx) = MockChat::new();
        let log = chat.sent_log();
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(10, 5, Some(CommandKind::Unsubscribe), "/delete")).await;

        assert_eq!(sent(&log), vec![OutboundMessage::reply(10, 5, UNSUBSCRIBED)]);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_leaves_registry_untouched() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry.add(1).await.unwrap();
        let (chat, _tx) = MockChat::new();
        let log = chat.sent_log();
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(2, 9, Some(CommandKind::Unsubscribe), "/delete")).await;

        assert_eq!(sent(&log), vec![OutboundMessage::reply(2, 9, ALREADY_UNSUBSCRIBED)]);
        let remaining: Vec<i64> = registry
            .list()
            .await
            .unwrap()
            .iter()
            .map(|s| s.chat_id)
            .collect();
        assert_eq!(remaining, vec![1]);
    }

    #[tokio::test]
    async fn test_unrecognized_text_gets_notice() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let (chat, _tx) = MockChat::new();
        let log = chat.sent_log();
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(7, 3, None, "hello?")).await;

        let replies = sent(&log);
        assert_eq!(replies, vec![OutboundMessage::reply(7, 3, NOT_ANSWERING)]);
        assert_eq!(replies[0].format, TextFormat::Plain);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_replies_generic_error() {
        let registry = FailingRegistry;
        let (chat, _tx) = MockChat::new();
        let log = chat.sent_log();
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(4, 1, Some(CommandKind::Subscribe), "/start")).await;
        dispatch(&ctx, inbound(4, 2, Some(CommandKind::Unsubscribe), "/delete")).await;

        let replies = sent(&log);
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.text == INTERNAL_ERROR));
        assert!(!replies[0].text.contains("locked"));
    }

    #[tokio::test]
    async fn test_reply_failure_is_absorbed() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let (chat, _tx) = MockChat::new();
        let chat = chat.failing_for(55);
        let cancel = CancellationToken::new();
        let ctx = RelayContext::new(&registry, &chat, &cancel);

        dispatch(&ctx, inbound(55, 1, Some(CommandKind::Subscribe), "/start")).await;

        // The registration stands even though the reply could not be delivered
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }
}
