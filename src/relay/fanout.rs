use tracing::{error, info, warn};

use super::RelayContext;
use crate::event::BrokerEvent;
use crate::format::render_notification;
use crate::platform::OutboundMessage;

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSummary {
    pub delivered: usize,
    pub failed: usize,
    /// Cancellation stopped the broadcast before every subscriber was tried
    pub interrupted: bool,
}

/// Send `event` to every current subscriber. A failed send only affects its
/// own recipient; cancellation stops the remaining sends.
pub async fn fanout(ctx: &RelayContext<'_>, event: &BrokerEvent) -> FanoutSummary {
    let mut summary = FanoutSummary::default();

    let subscribers = match ctx.registry.list().await {
        Ok(subscribers) => subscribers,
        Err(e) => {
            error!("Failed to load subscribers, dropping event: {:#}", e);
            return summary;
        }
    };

    let text = render_notification(event);
    for subscriber in &subscribers {
        if ctx.cancel.is_cancelled() {
            summary.interrupted = true;
            break;
        }

        let message = OutboundMessage::notification(subscriber.chat_id, text.clone());
        if ctx.deliver(message).await {
            info!("Sent notification to chat {}", subscriber.chat_id);
            summary.delivered += 1;
        } else {
            summary.failed += 1;
        }
    }

    if summary.interrupted {
        warn!(
            "Broadcast interrupted after {} of {} subscribers",
            summary.delivered + summary.failed,
            subscribers.len()
        );
    } else {
        info!(
            "Broadcast finished: {} delivered, {} failed",
            summary.delivered, summary.failed
        );
    }
    summary
}
