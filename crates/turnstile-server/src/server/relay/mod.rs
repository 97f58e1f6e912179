//! Relay broker.
//!
//! The dispatcher keeps every client connection. When a client sends a
//! complete frame, the dispatcher stops watching that client and publishes the
//! session together with the payload on the bus. The first idle worker takes
//! it, writes the transformed reply straight to the client, and sends the
//! session back to the dispatcher, which starts watching it again.
//!
//! ```text
//!            ┌────────── Released::Returned(session) ◀─────────┐
//!            ▼                                                  │
//! client ─▶ dispatcher ─ RelayRequest{session, payload} ─▶ bus ─▶ worker ─▶ client
//! ```
//!
//! A session is therefore always in exactly one place: with the dispatcher's
//! [`Readiness`] strategy, on the bus, or inside one worker.

pub mod dispatcher;
pub mod readiness;
pub mod registry;
pub mod worker;

pub use dispatcher::RelayDispatcher;
pub use readiness::{EventReadiness, Inbound, Readiness, ScanReadiness};
pub use registry::{ClientRegistry, ClientState};
pub use worker::{RelayWorker, Released};

use crate::server::config::{ReadinessKind, ServerConfig};
use anyhow::Context;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use turnstile_core::{Bus, Endpoint, PrefixTransform, Transform, frame::FrameCodec};

pub struct RelayBroker {
    listener: TcpListener,
    endpoint: Endpoint,
    config: ServerConfig,
    transform: Arc<dyn Transform>,
}

impl RelayBroker {
    /// Binds the dispatcher socket using the default `"Server "` prefix
    /// transform.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        Self::bind_with(config, Arc::new(PrefixTransform::default())).await
    }

    /// Same as [`RelayBroker::bind`] with a custom reply transform shared by
    /// all workers.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound.
    pub async fn bind_with(
        config: &ServerConfig,
        transform: Arc<dyn Transform>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.server_addr.as_socket_addr())
            .await
            .with_context(|| format!("failed to bind dispatcher on {}", config.server_addr))?;
        let endpoint = Endpoint::try_from(listener.local_addr()?)?;
        Ok(Self {
            listener,
            endpoint,
            config: config.clone(),
            transform,
        })
    }

    pub const fn local_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Runs the broker until `shutdown` is cancelled or a task fails.
    ///
    /// Remaining tasks are aborted and the bus is closed before returning.
    /// Requests already on the bus are discarded.
    ///
    /// # Errors
    ///
    /// Returns the first fatal task error.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let config = self.config;
        tracing::info!(
            "Relay dispatcher on {} with {} workers ({:?} readiness, {} client slots)",
            self.endpoint,
            config.num_workers,
            config.readiness,
            config.client_capacity
        );

        let bus = Bus::new(config.bus_capacity);
        let (released_tx, released_rx) = mpsc::unbounded_channel();

        let mut tasks = JoinSet::new();
        for id in 0..config.num_workers {
            let worker = RelayWorker::new(
                id,
                bus.clone(),
                Arc::clone(&self.transform),
                released_tx.clone(),
            );
            tasks.spawn(worker.serve());
        }
        drop(released_tx);

        let codec = FrameCodec::new(config.max_frame_len);
        let token = shutdown.child_token();
        match config.readiness {
            ReadinessKind::Event => tasks.spawn(
                RelayDispatcher::new(
                    self.listener,
                    EventReadiness::new(),
                    config.client_capacity,
                    bus.clone(),
                    released_rx,
                    codec,
                )
                .poll_loop(token),
            ),
            ReadinessKind::Scan => tasks.spawn(
                RelayDispatcher::new(
                    self.listener,
                    ScanReadiness::new(),
                    config.client_capacity,
                    bus.clone(),
                    released_rx,
                    codec,
                )
                .poll_loop(token),
            ),
        };

        let result = crate::server::supervise(&mut tasks, &shutdown).await;

        tasks.shutdown().await;
        bus.close();
        tracing::info!("Relay broker stopped");
        result
    }
}
