use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::registry::SubscriberRegistry;

/// Wrapper around tokio-cron-scheduler for background jobs
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Add a recurring cron job
    pub async fn add_cron_job<F>(&self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let job = Job::new_async(cron_expr, move |_uuid, _lock| task())
            .with_context(|| format!("Failed to create cron job: {}", name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

/// Log that the relay is alive, with the current subscriber count
pub async fn register_heartbeat(
    scheduler: &Scheduler,
    cron_expr: &str,
    registry: Arc<dyn SubscriberRegistry>,
) -> Result<()> {
    scheduler
        .add_cron_job(cron_expr, "heartbeat", move || {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                match registry.list().await {
                    Ok(subscribers) => {
                        info!("Heartbeat: relay is alive, {} subscribers", subscribers.len())
                    }
                    Err(e) => warn!("Heartbeat: relay is alive, registry unavailable: {:#}", e),
                }
            })
        })
        .await
}
