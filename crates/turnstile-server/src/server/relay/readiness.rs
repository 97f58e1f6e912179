//! Readiness strategies for the relay dispatcher.
//!
//! A [`Readiness`] owns every session the dispatcher is currently polling and
//! reports which of them have something to say. The dispatcher only sees
//! [`Inbound`] events; how the strategy learns about them stays behind the
//! trait.
//!
//! Both strategies are cancel-safe: dropping a pending [`Readiness::wait`]
//! loses neither a session nor any bytes already read from it.
//!
//! - [`EventReadiness`] keeps one pending read per session and is woken by the
//!   reactor only for the sessions that became readable.
//! - [`ScanReadiness`] waits for any session to become readable, then sweeps
//!   all of them with non-blocking reads.

use bytes::Bytes;
use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::FuturesUnordered,
};
use turnstile_core::{ClientSession, Error, Result, frame::FrameRead};

/// Something a polled session produced. The session leaves the strategy with
/// the event.
#[derive(Debug)]
pub enum Inbound {
    /// A complete request frame.
    Frame {
        session: ClientSession,
        payload: Bytes,
    },
    /// The peer closed the connection between frames.
    Closed(ClientSession),
    /// The connection failed or sent a malformed frame.
    Failed {
        session: ClientSession,
        error: Error,
    },
}

impl Inbound {
    fn from_read(session: ClientSession, read: Result<Option<Bytes>>) -> Self {
        match read {
            Ok(Some(payload)) => Self::Frame { session, payload },
            Ok(None) => Self::Closed(session),
            Err(error) => Self::Failed { session, error },
        }
    }

    pub const fn session(&self) -> &ClientSession {
        match self {
            Self::Frame { session, .. } | Self::Closed(session) | Self::Failed { session, .. } => {
                session
            }
        }
    }
}

pub trait Readiness: Send {
    /// Starts watching `session`.
    fn register(&mut self, session: ClientSession);

    /// Waits until at least one session has an event, then returns every
    /// event that is ready. Never resolves while no session is registered.
    fn wait(&mut self) -> impl Future<Output = Vec<Inbound>> + Send;

    /// Number of sessions being watched.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type PendingRead = BoxFuture<'static, Inbound>;

#[derive(Default)]
pub struct EventReadiness {
    pending: FuturesUnordered<PendingRead>,
}

impl EventReadiness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Readiness for EventReadiness {
    fn register(&mut self, mut session: ClientSession) {
        self.pending.push(
            async move {
                let read = session.read_frame().await;
                Inbound::from_read(session, read)
            }
            .boxed(),
        );
    }

    async fn wait(&mut self) -> Vec<Inbound> {
        let Some(first) = self.pending.next().await else {
            return future::pending().await;
        };

        let mut ready = vec![first];
        while let Some(Some(next)) = self.pending.next().now_or_never() {
            ready.push(next);
        }
        ready
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Default)]
pub struct ScanReadiness {
    sessions: Vec<ClientSession>,
}

impl ScanReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries every session once without waiting.
    fn sweep(&mut self) -> Vec<Inbound> {
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.sessions.len() {
            let read = match self.sessions[i].try_read_frame() {
                Ok(FrameRead::WouldBlock) => {
                    i += 1;
                    continue;
                }
                Ok(FrameRead::Frame(payload)) => Ok(Some(payload)),
                Ok(FrameRead::Closed) => Ok(None),
                Err(e) => Err(e),
            };
            let session = self.sessions.swap_remove(i);
            ready.push(Inbound::from_read(session, read));
        }
        ready
    }
}

impl Readiness for ScanReadiness {
    fn register(&mut self, session: ClientSession) {
        self.sessions.push(session);
    }

    async fn wait(&mut self) -> Vec<Inbound> {
        loop {
            let ready = self.sweep();
            if !ready.is_empty() {
                return ready;
            }
            if self.sessions.is_empty() {
                return future::pending().await;
            }

            // Errors resurface from the next sweep's read.
            let readable = self.sessions.iter().map(|s| Box::pin(s.readable()));
            let _ = future::select_all(readable).await;
        }
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::{
        io::AsyncWriteExt,
        net::{TcpListener, TcpStream},
        time::timeout,
    };
    use turnstile_core::{Endpoint, frame};

    async fn pair(id: u64) -> (ClientSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let session = ClientSession::new(
            id,
            Endpoint::try_from(peer).unwrap(),
            server,
            frame::FrameCodec::default(),
        );
        (session, client)
    }

    async fn wait_one<R: Readiness>(readiness: &mut R) -> Inbound {
        let mut events = timeout(Duration::from_secs(5), readiness.wait())
            .await
            .unwrap();
        assert_eq!(events.len(), 1, "{events:?}");
        events.remove(0)
    }

    async fn reports_frames_from_the_right_session<R: Readiness>(mut readiness: R) {
        let (a, _client_a) = pair(1).await;
        let (b, mut client_b) = pair(2).await;
        readiness.register(a);
        readiness.register(b);

        frame::write_frame(&mut client_b, b"from b").await.unwrap();
        match wait_one(&mut readiness).await {
            Inbound::Frame { session, payload } => {
                assert_eq!(session.id(), 2);
                assert_eq!(payload, "from b");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(readiness.len(), 1);
    }

    async fn reports_close_and_garbage<R: Readiness>(mut readiness: R) {
        let (a, client_a) = pair(1).await;
        let (b, mut client_b) = pair(2).await;
        readiness.register(a);
        readiness.register(b);

        drop(client_a);
        match wait_one(&mut readiness).await {
            Inbound::Closed(session) => assert_eq!(session.id(), 1),
            other => panic!("unexpected {other:?}"),
        }

        client_b.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        match wait_one(&mut readiness).await {
            Inbound::Failed { session, error } => {
                assert_eq!(session.id(), 2);
                assert!(matches!(error, Error::Format { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(readiness.is_empty());
    }

    async fn survives_cancelled_wait<R: Readiness>(mut readiness: R) {
        let (a, mut client_a) = pair(1).await;
        readiness.register(a);

        // Half a frame, then give up waiting.
        client_a.write_all(&5_u32.to_be_bytes()).await.unwrap();
        client_a.write_all(b"he").await.unwrap();
        assert!(
            timeout(Duration::from_millis(50), readiness.wait())
                .await
                .is_err()
        );
        assert_eq!(readiness.len(), 1);

        client_a.write_all(b"llo").await.unwrap();
        match wait_one(&mut readiness).await {
            Inbound::Frame { payload, .. } => assert_eq!(payload, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn idle_wait_never_resolves<R: Readiness>(mut readiness: R) {
        assert!(
            timeout(Duration::from_millis(20), readiness.wait())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn event_reports_frames() {
        reports_frames_from_the_right_session(EventReadiness::new()).await;
    }

    #[tokio::test]
    async fn scan_reports_frames() {
        reports_frames_from_the_right_session(ScanReadiness::new()).await;
    }

    #[tokio::test]
    async fn event_reports_close_and_garbage() {
        reports_close_and_garbage(EventReadiness::new()).await;
    }

    #[tokio::test]
    async fn scan_reports_close_and_garbage() {
        reports_close_and_garbage(ScanReadiness::new()).await;
    }

    #[tokio::test]
    async fn event_survives_cancelled_wait() {
        survives_cancelled_wait(EventReadiness::new()).await;
    }

    #[tokio::test]
    async fn scan_survives_cancelled_wait() {
        survives_cancelled_wait(ScanReadiness::new()).await;
    }

    #[tokio::test]
    async fn event_idle_wait_never_resolves() {
        idle_wait_never_resolves(EventReadiness::new()).await;
    }

    #[tokio::test]
    async fn scan_idle_wait_never_resolves() {
        idle_wait_never_resolves(ScanReadiness::new()).await;
    }

    #[tokio::test]
    async fn pipelined_frames_survive_reregistration() {
        let mut readiness = EventReadiness::new();
        let (a, mut client_a) = pair(1).await;
        readiness.register(a);

        let mut wire = Vec::new();
        for msg in [b"one".as_slice(), b"two"] {
            wire.extend_from_slice(&u32::try_from(msg.len()).unwrap().to_be_bytes());
            wire.extend_from_slice(msg);
        }
        client_a.write_all(&wire).await.unwrap();

        let Inbound::Frame { session, payload } = wait_one(&mut readiness).await else {
            panic!("expected a frame");
        };
        assert_eq!(payload, "one");

        let mut scan = ScanReadiness::new();
        scan.register(session);
        match wait_one(&mut scan).await {
            Inbound::Frame { payload, .. } => assert_eq!(payload, "two"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
