//! Referral broker.
//!
//! The dispatcher never carries client traffic. It answers each connection
//! with the address of a free worker and closes; the client then reconnects
//! to that worker for the whole conversation.
//!
//! ```text
//! client ──connect──▶ dispatcher ──"127.0.0.1:8081"──▶ client
//! client ──connect──▶ worker 0 ── StatusUpdate{8081, Occupied} ──▶ bus ──▶ monitor
//!        ◀─ frames ─▶
//! client ──close────▶ worker 0 ── StatusUpdate{8081, Free} ──────▶ bus ──▶ monitor
//! ```
//!
//! ## Tasks
//!
//! - one [`ReferralWorker::serve`] per worker,
//! - one [`dispatcher::monitor`] consuming status reports tagged with the
//!   dispatcher's port,
//! - one [`dispatcher::accept_loop`].
//!
//! ## Placement
//!
//! Worker `i` listens on the dispatcher's IP at port `port + i + 1`. When the
//! dispatcher port is 0, every worker gets its own ephemeral port instead.
//! All sockets are bound in [`ReferralBroker::bind`], before any task runs,
//! so a referral never names a socket that is not listening yet.

pub mod dispatcher;
pub mod registry;
pub mod worker;

pub use registry::{CachedStatus, WorkerRegistry};
pub use worker::ReferralWorker;

use crate::server::config::ServerConfig;
use anyhow::Context;
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use turnstile_core::{
    Bus, Endpoint, PrefixTransform, StatusUpdate, Tag, Transform, frame::FrameCodec,
};

pub struct ReferralBroker {
    listener: TcpListener,
    endpoint: Endpoint,
    workers: Vec<ReferralWorker>,
    registry: Arc<WorkerRegistry>,
    bus: Bus<StatusUpdate>,
}

impl ReferralBroker {
    /// Binds the dispatcher and every worker socket using the default
    /// `"Server "` prefix transform.
    ///
    /// # Errors
    ///
    /// Fails if any socket cannot be bound.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        Self::bind_with(config, Arc::new(PrefixTransform::default())).await
    }

    /// Same as [`ReferralBroker::bind`] with a custom reply transform shared by
    /// all workers.
    ///
    /// # Errors
    ///
    /// Fails if any socket cannot be bound.
    pub async fn bind_with(
        config: &ServerConfig,
        transform: Arc<dyn Transform>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.server_addr.as_socket_addr())
            .await
            .with_context(|| format!("failed to bind dispatcher on {}", config.server_addr))?;
        let endpoint = Endpoint::try_from(listener.local_addr()?)?;

        let bus = Bus::new(config.bus_capacity);
        let tag = Tag::from(endpoint.port());
        let codec = FrameCodec::new(config.max_frame_len);

        let mut workers = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers {
            let placement = worker_endpoint(config.server_addr, id)?;
            let worker =
                ReferralWorker::bind(id, placement, tag, bus.clone(), transform.clone(), codec)
                    .await
                    .with_context(|| format!("failed to bind worker {id} on {placement}"))?;
            workers.push(worker);
        }

        let registry = Arc::new(WorkerRegistry::new(
            workers.iter().map(ReferralWorker::endpoint),
            config.selection,
        ));

        Ok(Self {
            listener,
            endpoint,
            workers,
            registry,
            bus,
        })
    }

    /// The dispatcher's bound address, with any ephemeral port resolved.
    pub const fn local_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the broker until `shutdown` is cancelled or a task fails.
    ///
    /// Remaining tasks are aborted and the bus is closed before returning.
    /// In-flight conversations are not drained.
    ///
    /// # Errors
    ///
    /// Returns the first fatal task error.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let tag = Tag::from(self.endpoint.port());
        tracing::info!(
            "Referral dispatcher on {} with {} workers",
            self.endpoint,
            self.workers.len()
        );

        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(worker.serve());
        }
        tasks.spawn(dispatcher::monitor(
            self.bus.clone(),
            tag,
            Arc::clone(&self.registry),
        ));
        tasks.spawn(dispatcher::accept_loop(self.listener, self.registry));

        let result = crate::server::supervise(&mut tasks, &shutdown).await;

        tasks.shutdown().await;
        self.bus.close();
        tracing::info!("Referral broker stopped");
        result
    }
}

fn worker_endpoint(dispatcher: Endpoint, id: usize) -> anyhow::Result<Endpoint> {
    if dispatcher.port() == 0 {
        return Ok(dispatcher);
    }
    let port = usize::from(dispatcher.port()) + id + 1;
    let port = u16::try_from(port)
        .with_context(|| format!("worker {id} would need port {port}, above 65535"))?;
    Ok(dispatcher.with_port(port))
}
