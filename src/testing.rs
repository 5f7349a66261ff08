//! In-process stand-ins for the chat platform, the broker and a broken registry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::EventSource;
use crate::platform::{ChatTransport, CommandKind, InboundCommand, OutboundMessage, Sender};
use crate::registry::{RegistryError, Subscriber, SubscriberRegistry};

pub type SentLog = Arc<Mutex<Vec<OutboundMessage>>>;

pub struct MockChat {
    inbound: Option<mpsc::Receiver<InboundCommand>>,
    sent: SentLog,
    failing: HashSet<i64>,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_start: bool,
    shutdowns: Arc<AtomicUsize>,
}

impl MockChat {
    pub fn new() -> (Self, mpsc::Sender<InboundCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let chat = Self {
            inbound: Some(rx),
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: HashSet::new(),
            cancel_after: None,
            fail_start: false,
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        (chat, tx)
    }

    /// Every send to `chat_id` fails
    pub fn failing_for(mut self, chat_id: i64) -> Self {
        self.failing.insert(chat_id);
        self
    }

    /// Cancel `token` once `sends` messages have been delivered
    pub fn cancel_after(mut self, sends: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((sends, token));
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn sent_log(&self) -> SentLog {
        Arc::clone(&self.sent)
    }

    pub fn shutdown_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shutdowns)
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    async fn start(&mut self) -> Result<mpsc::Receiver<InboundCommand>> {
        if self.fail_start {
            bail!("401 Unauthorized");
        }
        self.inbound
            .take()
            .ok_or_else(|| anyhow!("chat session already started"))
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.failing.contains(&message.chat_id) {
            bail!("chat {} is unreachable", message.chat_id);
        }
        let delivered = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            sent.len()
        };
        if let Some((limit, token)) = &self.cancel_after {
            if delivered >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockEvents {
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    fail_start: bool,
    starts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockEvents {
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(16);
        let events = Self {
            inbound: Some(rx),
            fail_start: false,
            starts: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        (events, tx)
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn start_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }

    pub fn shutdown_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shutdowns)
    }
}

#[async_trait]
impl EventSource for MockEvents {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            bail!("broker transport failure");
        }
        self.inbound
            .take()
            .ok_or_else(|| anyhow!("event source already started"))
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry whose storage is unavailable
pub struct FailingRegistry;

#[async_trait]
impl SubscriberRegistry for FailingRegistry {
    async fn add(&self, _chat_id: i64) -> Result<(), RegistryError> {
        Err(anyhow!("database is locked").into())
    }

    async fn list(&self) -> Result<Vec<Subscriber>, RegistryError> {
        Err(anyhow!("database is locked").into())
    }

    async fn remove(&self, _chat_id: i64) -> Result<(), RegistryError> {
        Err(anyhow!("database is locked").into())
    }
}

pub fn inbound(
    chat_id: i64,
    message_id: i32,
    command: Option<CommandKind>,
    text: &str,
) -> InboundCommand {
    InboundCommand {
        chat_id,
        message_id,
        command,
        text: text.to_string(),
        sender: Sender {
            user_id: chat_id as u64,
            username: Some("tester".to_string()),
            is_bot: false,
        },
    }
}

pub fn sent(log: &SentLog) -> Vec<OutboundMessage> {
    log.lock().unwrap().clone()
}

/// Poll until at least `count` messages have been sent, or give up after 2s.
pub async fn wait_for_sent(log: &SentLog, count: usize) -> Vec<OutboundMessage> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = sent(log);
        if current.len() >= count || tokio::time::Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
