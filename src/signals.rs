//! Process termination signals mapped onto the relay's cancellation token.
//!
//! On Unix SIGINT, SIGTERM and SIGQUIT are handled; elsewhere only Ctrl-C.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

/// Cancel `cancel` on the first termination signal. The listener also exits
/// quietly if the token is cancelled for another reason.
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            received = wait_for_shutdown_signal() => {
                match received {
                    Ok(name) => {
                        info!("Received {}, shutting down", name);
                        cancel.cancel();
                    }
                    Err(e) => error!("Failed to listen for shutdown signals: {}", e),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let cancel = CancellationToken::new();
        let listener = cancel_on_shutdown_signal(cancel.clone());
        cancel.cancel();
        listener.await.unwrap();
    }
}
