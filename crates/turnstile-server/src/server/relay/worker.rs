use std::sync::Arc;
use tokio::sync::mpsc;
use turnstile_core::{Bus, ClientSession, RelayRequest, Result, SessionId, Transform};

/// How a worker gives a session back to the dispatcher.
#[derive(Debug)]
pub enum Released {
    /// The reply was sent; the dispatcher resumes polling the session.
    Returned(ClientSession),
    /// The reply could not be sent; the connection is gone.
    Dropped(SessionId),
}

/// A relay-mode pool member.
///
/// Workers have no socket of their own. Each one blocks on a wildcard
/// consume, so whichever worker is idle first takes the next request.
pub struct RelayWorker {
    id: usize,
    bus: Bus<RelayRequest>,
    transform: Arc<dyn Transform>,
    released: mpsc::UnboundedSender<Released>,
}

impl RelayWorker {
    pub fn new(
        id: usize,
        bus: Bus<RelayRequest>,
        transform: Arc<dyn Transform>,
        released: mpsc::UnboundedSender<Released>,
    ) -> Self {
        Self {
            id,
            bus,
            transform,
            released,
        }
    }

    /// Answers requests until the bus is closed or the dispatcher is gone.
    ///
    /// A reply that cannot be written is logged and the session is reported
    /// as dropped; the worker carries on with the next request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bus`](turnstile_core::Error::Bus) once the bus is
    /// closed.
    pub async fn serve(self) -> Result<()> {
        tracing::trace!("Worker {} started", self.id);

        loop {
            let RelayRequest {
                mut session,
                payload,
            } = self.bus.consume_any().await?;
            tracing::debug!(
                worker = self.id,
                session = session.id(),
                len = payload.len(),
                "relaying request"
            );

            let reply = self.transform.apply(&payload);
            let released = match session.write_frame(&reply).await {
                Ok(()) => {
                    tracing::trace!(worker = self.id, session = session.id(), "reply sent");
                    Released::Returned(session)
                }
                Err(e) => {
                    tracing::warn!(
                        worker = self.id,
                        peer = %session.peer(),
                        "failed to reply: {e}"
                    );
                    Released::Dropped(session.id())
                }
            };

            if self.released.send(released).is_err() {
                tracing::debug!("Worker {} stopping: dispatcher is gone", self.id);
                return Ok(());
            }
        }
    }
}
