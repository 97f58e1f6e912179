use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use turnstile_core::{
    Bus, Endpoint, Result, StatusUpdate, Tag, Transform, WorkerStatus, frame::FrameCodec,
};

/// A referral-mode pool member.
///
/// Owns a listening socket at its own endpoint and serves one client
/// conversation at a time. Each `Free`/`Occupied` transition is published on
/// the bus under the dispatcher's tag.
pub struct ReferralWorker {
    id: usize,
    listener: TcpListener,
    endpoint: Endpoint,
    report_tag: Tag,
    bus: Bus<StatusUpdate>,
    transform: Arc<dyn Transform>,
    codec: FrameCodec,
}

impl ReferralWorker {
    /// Binds the worker's listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](turnstile_core::Error::Transport) if the
    /// socket cannot be bound, and [`Error::Format`](turnstile_core::Error)
    /// if it ends up on a non-IPv4 address.
    pub async fn bind(
        id: usize,
        endpoint: Endpoint,
        report_tag: Tag,
        bus: Bus<StatusUpdate>,
        transform: Arc<dyn Transform>,
        codec: FrameCodec,
    ) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.as_socket_addr()).await?;
        let endpoint = Endpoint::try_from(listener.local_addr()?)?;
        Ok(Self {
            id,
            listener,
            endpoint,
            report_tag,
            bus,
            transform,
            codec,
        })
    }

    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Accepts and serves clients one after another.
    ///
    /// Only returns on a fatal error: an accept failure, or a status report
    /// the bus refused. A failure inside a conversation ends that conversation
    /// only.
    pub async fn serve(self) -> Result<()> {
        tracing::debug!("Worker {} listening on {}", self.id, self.endpoint);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            self.report(WorkerStatus::Occupied)?;
            tracing::info!(worker = self.id, %peer, "client connected");

            self.converse(stream).await;

            tracing::info!(worker = self.id, %peer, "client disconnected");
            self.report(WorkerStatus::Free)?;
        }
    }

    fn report(&self, status: WorkerStatus) -> Result<()> {
        tracing::debug!("Worker {} is now {status}", self.id);
        self.bus.publish(
            self.report_tag,
            StatusUpdate {
                worker_port: self.endpoint.port(),
                status,
            },
        )?;
        Ok(())
    }

    async fn converse(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, self.codec);

        while let Some(frame) = framed.next().await {
            let payload = match frame {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(worker = self.id, "dropping client: {e}");
                    return;
                }
            };
            tracing::trace!(worker = self.id, len = payload.len(), "request");

            let reply = self.transform.apply(&payload);
            if let Err(e) = framed.send(reply).await {
                tracing::warn!(worker = self.id, "failed to reply: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{BUFFER_SIZE, PrefixTransform, frame};

    async fn worker(bus: &Bus<StatusUpdate>) -> ReferralWorker {
        ReferralWorker::bind(
            0,
            Endpoint::localhost(0),
            7,
            bus.clone(),
            Arc::new(PrefixTransform::default()),
            FrameCodec::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reports_each_transition_once() {
        let bus = Bus::new(16);
        let worker = worker(&bus).await;
        let endpoint = worker.endpoint();
        tokio::spawn(worker.serve());

        let mut client = TcpStream::connect(endpoint.as_socket_addr()).await.unwrap();
        let occupied = bus.consume(7).await.unwrap();
        assert_eq!(occupied.worker_port, endpoint.port());
        assert_eq!(occupied.status, WorkerStatus::Occupied);

        frame::write_frame(&mut client, b"hello").await.unwrap();
        let reply = frame::read_frame(&mut client, BUFFER_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "Server hello");
        assert!(bus.is_empty());

        drop(client);
        let free = bus.consume(7).await.unwrap();
        assert_eq!(free.status, WorkerStatus::Free);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_ends_conversation() {
        let bus = Bus::new(16);
        let worker = worker(&bus).await;
        let endpoint = worker.endpoint();
        tokio::spawn(worker.serve());

        let mut client = TcpStream::connect(endpoint.as_socket_addr()).await.unwrap();
        assert_eq!(
            bus.consume(7).await.unwrap().status,
            WorkerStatus::Occupied
        );

        let len = u32::try_from(BUFFER_SIZE + 1).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len.to_be_bytes())
            .await
            .unwrap();

        assert_eq!(bus.consume(7).await.unwrap().status, WorkerStatus::Free);
        assert!(
            frame::read_frame(&mut client, BUFFER_SIZE)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn closed_bus_stops_worker() {
        let bus = Bus::new(16);
        let worker = worker(&bus).await;
        let endpoint = worker.endpoint();
        let handle = tokio::spawn(worker.serve());

        bus.close();
        let _client = TcpStream::connect(endpoint.as_socket_addr()).await.unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(turnstile_core::Error::Bus(_))));
    }
}
