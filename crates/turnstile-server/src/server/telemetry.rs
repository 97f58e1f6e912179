//! # Telemetry
//!
//! Console logging through `tracing-subscriber`. Verbosity is read from
//! `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=turnstile_server=debug,turnstile_core=trace cargo run
//! ```
//!
//! Connect/disconnect, referral, status-change, and relay events are logged at
//! `info`/`debug`; per-frame events at `trace`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. Call once, before any broker is bound.
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;
    Ok(())
}
