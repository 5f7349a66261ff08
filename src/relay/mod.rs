//! The relay loop: merges chat updates and broker events into one sequence
//! of registry mutations and chat sends.
//!
//! Lifecycle is `Starting -> Running -> (Draining ->) Stopped`. Both input
//! streams are fed by background producers owned by the transports; the loop
//! itself handles one item per turn and never runs two items concurrently,
//! so registry mutations and sends need no locking here.

pub mod dispatch;
pub mod fanout;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::EventSource;
use crate::event::BrokerEvent;
use crate::platform::{ChatTransport, InboundCommand, OutboundMessage};
use crate::registry::SubscriberRegistry;

pub use dispatch::dispatch;
pub use fanout::fanout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Why the loop left `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    ChatClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to start chat session: {0:#}")]
    ChatStartup(anyhow::Error),
    #[error("failed to start broker event source: {0:#}")]
    BrokerStartup(anyhow::Error),
}

/// Capabilities handed to the dispatcher and fan-out for one loop lifetime
pub struct RelayContext<'a> {
    pub registry: &'a dyn SubscriberRegistry,
    pub chat: &'a dyn ChatTransport,
    pub cancel: &'a CancellationToken,
}

impl<'a> RelayContext<'a> {
    pub fn new(
        registry: &'a dyn SubscriberRegistry,
        chat: &'a dyn ChatTransport,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            registry,
            chat,
            cancel,
        }
    }

    /// Best-effort send. Failures are logged and reported as `false`.
    pub async fn deliver(&self, message: OutboundMessage) -> bool {
        match self.chat.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send message to chat {}: {:#}", message.chat_id, e);
                false
            }
        }
    }
}

enum Input {
    Chat(Option<InboundCommand>),
    Broker(Option<Vec<u8>>),
}

fn enter(state: RelayState) {
    debug!("Relay state: {:?}", state);
}

/// Run the relay until `cancel` fires or the chat stream ends.
///
/// Startup failures of either transport are fatal and returned as
/// [`RelayError`]; anything that was already started is released first.
/// On every other path both transports are shut down exactly once.
pub async fn run<C, E>(
    registry: Arc<dyn SubscriberRegistry>,
    mut chat: C,
    mut events: E,
    cancel: CancellationToken,
) -> Result<StopReason, RelayError>
where
    C: ChatTransport,
    E: EventSource,
{
    enter(RelayState::Starting);
    let mut chat_rx = chat.start().await.map_err(RelayError::ChatStartup)?;
    let mut broker_rx = match events.start().await {
        Ok(rx) => rx,
        Err(e) => {
            chat.shutdown().await;
            enter(RelayState::Stopped);
            return Err(RelayError::BrokerStartup(e));
        }
    };

    enter(RelayState::Running);
    info!("Relay is running");
    let reason = {
        let ctx = RelayContext::new(registry.as_ref(), &chat, &cancel);
        relay_loop(&ctx, &mut chat_rx, &mut broker_rx).await
    };

    if reason == StopReason::Cancelled {
        enter(RelayState::Draining);
        info!("Shutdown requested, draining relay");
        chat_rx.close();
        broker_rx.close();
    }

    chat.shutdown().await;
    events.shutdown().await;
    enter(RelayState::Stopped);
    info!("Relay stopped ({:?})", reason);
    Ok(reason)
}

async fn relay_loop(
    ctx: &RelayContext<'_>,
    chat_rx: &mut mpsc::Receiver<InboundCommand>,
    broker_rx: &mut mpsc::Receiver<Vec<u8>>,
) -> StopReason {
    let mut broker_open = true;

    loop {
        let input = tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => return StopReason::Cancelled,

            input = next_input(chat_rx, broker_rx, broker_open) => input,
        };

        match input {
            Input::Chat(Some(command)) => dispatch(ctx, command).await,
            Input::Chat(None) => {
                info!("Chat update stream closed");
                return StopReason::ChatClosed;
            }
            Input::Broker(Some(payload)) => handle_payload(ctx, &payload).await,
            Input::Broker(None) => {
                warn!("Broker event stream closed, serving chat updates only");
                broker_open = false;
            }
        }
    }
}

/// First ready of the two streams, with no preference between them.
async fn next_input(
    chat_rx: &mut mpsc::Receiver<InboundCommand>,
    broker_rx: &mut mpsc::Receiver<Vec<u8>>,
    broker_open: bool,
) -> Input {
    tokio::select! {
        update = chat_rx.recv() => Input::Chat(update),
        payload = broker_rx.recv(), if broker_open => Input::Broker(payload),
    }
}

/// Longest prefix of a rejected payload echoed into the log
const PAYLOAD_PREVIEW_BYTES: usize = 256;

async fn handle_payload(ctx: &RelayContext<'_>, payload: &[u8]) {
    let event = match BrokerEvent::decode(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(
                "Dropping malformed broker event ({}): {}",
                e,
                payload_preview(payload)
            );
            return;
        }
    };

    info!(
        "Received broker event: timestamp={} message={}",
        event.timestamp, event.message
    );
    fanout(ctx, &event).await;
}

fn payload_preview(payload: &[u8]) -> String {
    if payload.len() <= PAYLOAD_PREVIEW_BYTES {
        return String::from_utf8_lossy(payload).into_owned();
    }
    format!(
        "{}... ({} bytes total)",
        String::from_utf8_lossy(&payload[..PAYLOAD_PREVIEW_BYTES]),
        payload.len()
    )
}
