use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;

/// A source of raw broker payloads.
#[async_trait]
pub trait EventSource: Send {
    /// Connect and start consuming in the background. The returned channel
    /// closes when the underlying stream ends.
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Stop consuming and release the consumer.
    async fn shutdown(&mut self);
}

struct RunningConsumer {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

/// Kafka topic consumer under a consumer group
pub struct KafkaEventSource {
    config: KafkaConfig,
    running: Option<RunningConsumer>,
}

impl KafkaEventSource {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[self.config.topic.as_str()])
            .with_context(|| format!("Failed to subscribe to topic {}", self.config.topic))?;

        info!(
            brokers = %self.config.brokers,
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            "Kafka consumer subscribed"
        );

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(consume(consumer, tx, stop.clone()));

        self.running = Some(RunningConsumer { handle, stop });
        Ok(rx)
    }

    async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.cancel();
        if let Err(e) = running.handle.await {
            warn!("Kafka consumer task failed: {}", e);
        }
        info!("Kafka consumer closed");
    }
}

async fn consume(consumer: StreamConsumer, tx: mpsc::Sender<Vec<u8>>, stop: CancellationToken) {
    let stream = consumer.stream();
    futures::pin_mut!(stream);

    loop {
        let payload = tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            next = stream.next() => {
                let Some(result) = next else {
                    warn!("Kafka message stream ended");
                    break;
                };
                match owned_payload(result) {
                    Some(payload) => payload,
                    None => continue,
                }
            }
        };

        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            sent = tx.send(payload) => {
                if sent.is_err() {
                    debug!("Relay loop stopped, Kafka consumer exiting");
                    break;
                }
            }
        }
    }
}

/// Copy the payload out so the borrowed message is released before the next await.
fn owned_payload(result: KafkaResult<BorrowedMessage<'_>>) -> Option<Vec<u8>> {
    match result {
        Ok(msg) => {
            debug!(
                topic = msg.topic(),
                partition = msg.partition(),
                offset = msg.offset(),
                "Received Kafka message"
            );
            Some(msg.payload().map(<[u8]>::to_vec).unwrap_or_default())
        }
        Err(e) => {
            error!("Error receiving Kafka message: {}", e);
            None
        }
    }
}
