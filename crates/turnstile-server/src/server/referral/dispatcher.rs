//! Referral dispatcher tasks.
//!
//! - [`accept_loop`] answers every client with exactly one frame naming a
//!   worker (or the `"occupied"` sentinel) and then closes the connection.
//! - [`monitor`] folds the workers' status reports into the registry.

use super::registry::WorkerRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use turnstile_core::{Bus, OCCUPIED_SENTINEL, Result, StatusUpdate, Tag, frame::write_frame};

/// Accepts clients on the dispatcher socket and refers each to a free worker.
///
/// A failed reply only affects that client. Returns if `accept` fails.
pub async fn accept_loop(listener: TcpListener, registry: Arc<WorkerRegistry>) -> Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;

        let reply = match registry.select_free_worker() {
            Some(selected) => {
                tracing::info!(
                    %peer,
                    worker = selected.index,
                    "referring client to {}",
                    selected.endpoint
                );
                selected.endpoint.to_string()
            }
            None => {
                tracing::info!(%peer, "all workers occupied");
                OCCUPIED_SENTINEL.to_owned()
            }
        };

        if let Err(e) = write_frame(&mut stream, reply.as_bytes()).await {
            tracing::warn!(%peer, "failed to send referral: {e}");
        }
    }
}

/// Applies status reports addressed to `tag` until the bus is closed.
///
/// # Errors
///
/// Returns [`Error::Bus`](turnstile_core::Error::Bus) once the bus is closed.
pub async fn monitor(
    bus: Bus<StatusUpdate>,
    tag: Tag,
    registry: Arc<WorkerRegistry>,
) -> Result<()> {
    loop {
        let update = bus.consume(tag).await?;
        match registry.apply(update) {
            Some(index) => tracing::debug!("Worker {index} reported {}", update.status),
            None => tracing::warn!(port = update.worker_port, "status report from unknown worker"),
        }
    }
}
