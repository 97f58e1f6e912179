//! Relay dispatcher loop.
//!
//! A single task owns the listening socket, the [`ClientRegistry`], and every
//! session that is not currently with a worker. Each iteration waits for the
//! first of:
//!
//! - shutdown,
//! - a new connection,
//! - a session released by a worker,
//! - events from the readiness strategy,
//!
//! and handles it before waiting again. Nothing in the loop spins: with no
//! clients and no traffic it sleeps in the reactor.

use super::{
    readiness::{Inbound, Readiness},
    registry::ClientRegistry,
    worker::Released,
};
use bytes::Bytes;
use std::{io, net::SocketAddr};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use turnstile_core::{
    Bus, ClientSession, Endpoint, RELAY_REQUEST_TAG, RelayRequest, Result, frame::FrameCodec,
};

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Released(Released),
    Ready(Vec<Inbound>),
}

pub struct RelayDispatcher<R> {
    listener: TcpListener,
    readiness: R,
    clients: ClientRegistry,
    bus: Bus<RelayRequest>,
    released: mpsc::UnboundedReceiver<Released>,
    codec: FrameCodec,
}

impl<R: Readiness> RelayDispatcher<R> {
    pub fn new(
        listener: TcpListener,
        readiness: R,
        client_capacity: usize,
        bus: Bus<RelayRequest>,
        released: mpsc::UnboundedReceiver<Released>,
        codec: FrameCodec,
    ) -> Self {
        Self {
            listener,
            readiness,
            clients: ClientRegistry::new(client_capacity),
            bus,
            released,
            codec,
        }
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](turnstile_core::Error::Transport) if
    /// accepting a connection fails.
    pub async fn poll_loop(mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => Event::Shutdown,
                accepted = self.listener.accept() => Event::Accepted(accepted),
                Some(released) = self.released.recv() => Event::Released(released),
                ready = self.readiness.wait() => Event::Ready(ready),
            };

            match event {
                Event::Shutdown => {
                    tracing::debug!(
                        clients = self.clients.len(),
                        in_flight = self.clients.in_flight(),
                        "dispatcher stopping"
                    );
                    return Ok(());
                }
                Event::Accepted(accepted) => {
                    let (stream, addr) = accepted?;
                    self.admit(stream, addr);
                }
                Event::Released(released) => self.on_released(released),
                Event::Ready(events) => {
                    for inbound in events {
                        self.on_inbound(inbound);
                    }
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        let peer = match Endpoint::try_from(addr) {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(%addr, "dropping client: {e}");
                return;
            }
        };

        let Some(id) = self.clients.admit(peer) else {
            tracing::info!(
                %peer,
                capacity = self.clients.capacity(),
                "client registry full, dropping connection"
            );
            return;
        };

        tracing::info!(%peer, session = id, "client connected");
        self.readiness
            .register(ClientSession::new(id, peer, stream, self.codec));
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame { session, payload } => self.relay(session, payload),
            Inbound::Closed(session) => {
                self.clients.remove(session.id());
                tracing::info!(
                    peer = %session.peer(),
                    session = session.id(),
                    "client disconnected"
                );
            }
            Inbound::Failed { session, error } => {
                self.clients.remove(session.id());
                tracing::warn!(
                    peer = %session.peer(),
                    session = session.id(),
                    "dropping client: {error}"
                );
            }
        }
    }

    /// Hands `session` and its request to whichever worker is idle. If the bus
    /// refuses, the request is lost but the client is kept.
    fn relay(&mut self, session: ClientSession, payload: Bytes) {
        let id = session.id();
        tracing::trace!(session = id, len = payload.len(), "publishing request");

        self.clients.hand_off(id);
        if let Err(e) = self
            .bus
            .publish(RELAY_REQUEST_TAG, RelayRequest { session, payload })
        {
            tracing::warn!(session = id, "request dropped: {}", e.kind());
            let RelayRequest { session, .. } = e.into_inner();
            self.clients.restore(id);
            self.readiness.register(session);
        }
    }

    fn on_released(&mut self, released: Released) {
        match released {
            Released::Returned(session) => {
                self.clients.restore(session.id());
                self.readiness.register(session);
            }
            Released::Dropped(id) => {
                if let Some(peer) = self.clients.remove(id) {
                    tracing::info!(%peer, session = id, "client dropped after failed reply");
                }
            }
        }
    }
}
