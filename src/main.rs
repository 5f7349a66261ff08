mod broker;
mod config;
mod event;
mod format;
mod platform;
mod registry;
mod relay;
mod scheduler;
mod signals;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::broker::KafkaEventSource;
use crate::config::{Config, LogConfig, LogFormat};
use crate::platform::telegram::TelegramTransport;
use crate::registry::{SqliteRegistry, SubscriberRegistry};
use crate::scheduler::Scheduler;

const TELEGRAM_API_TRACE: &str = "teloxide_core::adaptors::trace=trace";

fn init_logging(config: &LogConfig) -> Result<()> {
    let level = config.level_filter()?;
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .parse_lossy("")
    });
    if config.is_debug() {
        // Bot API tracing is emitted at trace level
        filter = filter.add_directive(
            TELEGRAM_API_TRACE
                .parse::<Directive>()
                .context("Invalid Telegram trace directive")?,
        );
    }

    let (json, text) = match config.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_logging(&config.log)?;

    info!("Starting {} v{}", config.app.name, config.app.version);
    info!("Configuration loaded from: {}", config_path.display());
    info!("  Log: level={} format={}", config.log.level, config.log.format);
    info!(
        "  Kafka: brokers={} topic={} group={}",
        config.kafka.brokers, config.kafka.topic, config.kafka.group_id
    );
    info!("  Registry: {}", config.registry.database_path.display());

    let registry: Arc<dyn SubscriberRegistry> =
        Arc::new(SqliteRegistry::connect(&config.registry).await?);

    let mut scheduler = Scheduler::new().await?;
    if config.heartbeat.enabled {
        scheduler::register_heartbeat(&scheduler, &config.heartbeat.cron, Arc::clone(&registry))
            .await?;
    }
    scheduler.start().await?;

    let cancel = CancellationToken::new();
    let signals = signals::cancel_on_shutdown_signal(cancel.clone());

    let chat = TelegramTransport::new(
        &config.telegram.bot_token,
        config.kafka.channel_capacity,
        config.log.is_debug(),
    );
    let events = KafkaEventSource::new(config.kafka.clone());

    let outcome = relay::run(registry, chat, events, cancel.clone()).await;

    // Stop the signal listener whichever way the relay ended
    cancel.cancel();
    signals.await.ok();
    scheduler.shutdown().await?;

    let reason = outcome?;
    info!("{} stopped ({:?})", config.app.name, reason);
    Ok(())
}
