//! Broker implementations and their runtime plumbing.
//!
//! ## Structure
//!
//! - [`config`] - CLI/environment configuration (`ServerConfig`).
//! - [`telemetry`] - `tracing` subscriber set-up.
//! - [`referral`] - dispatcher that refers clients to worker addresses.
//! - [`relay`] - dispatcher that relays client payloads to workers.

pub mod config;
pub mod referral;
pub mod relay;
pub mod telemetry;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Waits for `shutdown` or for the first broker task to finish, whichever
/// comes first.
///
/// Broker tasks only finish on a fatal error, so a task that returns `Ok` is
/// logged and treated as the end of the broker.
pub(crate) async fn supervise(
    tasks: &mut JoinSet<turnstile_core::Result<()>>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, stopping {} tasks", tasks.len());
            Ok(())
        }
        Some(joined) = tasks.join_next() => match joined {
            Ok(Ok(())) => {
                tracing::warn!("A broker task exited");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Broker task failed: {e}");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        },
    }
}
