//! Relay-mode client sessions.
//!
//! A [`ClientSession`] owns one accepted TCP connection together with the
//! bytes that have been read from it but do not yet form a complete frame.
//! Ownership is the hand-off protocol: whoever holds the session is the only
//! party reading from or writing to the socket.

use crate::{
    Endpoint, Result, SessionId,
    frame::{FrameCodec, FrameRead},
};
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::codec::{Decoder, Encoder};

pub struct ClientSession {
    id: SessionId,
    peer: Endpoint,
    stream: TcpStream,
    inbound: BytesMut,
    codec: FrameCodec,
}

impl ClientSession {
    pub fn new(id: SessionId, peer: Endpoint, stream: TcpStream, codec: FrameCodec) -> Self {
        Self {
            id,
            peer,
            stream,
            inbound: BytesMut::new(),
            codec,
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn peer(&self) -> Endpoint {
        self.peer
    }

    /// Returns `true` if the buffered bytes already settle the next read
    /// (a complete frame, or a length prefix that will be rejected).
    pub fn has_buffered_frame(&self) -> bool {
        self.codec.is_decidable(&self.inbound)
    }

    /// Attempts to take one frame without waiting.
    ///
    /// Reads whatever the socket has ready, then decodes. Partial frames stay
    /// buffered in the session between calls.
    ///
    /// # Errors
    ///
    /// - [`Error::Format`](crate::Error::Format) if the frame is oversized.
    /// - [`Error::Transport`](crate::Error::Transport) on a read failure or a
    ///   close in the middle of a frame.
    pub fn try_read_frame(&mut self) -> Result<FrameRead> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.inbound)? {
                return Ok(FrameRead::Frame(frame));
            }

            self.inbound.reserve(crate::FRAME_HEADER_LEN);
            match self.stream.try_read_buf(&mut self.inbound) {
                Ok(0) => {
                    return match self.codec.decode_eof(&mut self.inbound)? {
                        Some(frame) => Ok(FrameRead::Frame(frame)),
                        None => Ok(FrameRead::Closed),
                    };
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FrameRead::WouldBlock);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Waits for one complete frame. `Ok(None)` means the peer closed the
    /// connection on a frame boundary.
    ///
    /// Cancel-safe: bytes read before cancellation stay buffered.
    ///
    /// # Errors
    ///
    /// Same as [`ClientSession::try_read_frame`].
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.inbound)? {
                return Ok(Some(frame));
            }

            self.inbound.reserve(crate::FRAME_HEADER_LEN);
            if self.stream.read_buf(&mut self.inbound).await? == 0 {
                return self.codec.decode_eof(&mut self.inbound);
            }
        }
    }

    /// Writes `payload` as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the frame could
    /// not be sent in full.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut out = BytesMut::new();
        self.codec.encode(payload, &mut out)?;
        self.stream.write_all(&out).await?;
        Ok(())
    }

    /// Waits until the socket may have bytes to read.
    ///
    /// # Errors
    ///
    /// Propagates the reactor's readiness error.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }
}

impl core::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered", &self.inbound.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BUFFER_SIZE, frame};
    use tokio::net::TcpListener;

    async fn pair() -> (ClientSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let session = ClientSession::new(
            1,
            Endpoint::try_from(peer).unwrap(),
            server,
            FrameCodec::new(BUFFER_SIZE),
        );
        (session, client)
    }

    #[tokio::test]
    async fn try_read_reports_would_block_then_frame() {
        let (mut session, mut client) = pair().await;
        assert_eq!(session.try_read_frame().unwrap(), FrameRead::WouldBlock);

        frame::write_frame(&mut client, b"ping").await.unwrap();
        loop {
            session.readable().await.unwrap();
            match session.try_read_frame().unwrap() {
                FrameRead::WouldBlock => continue,
                read => {
                    assert_eq!(read, FrameRead::Frame(Bytes::from_static(b"ping")));
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn read_and_reply() {
        let (mut session, mut client) = pair().await;
        frame::write_frame(&mut client, b"hello").await.unwrap();

        let payload = session.read_frame().await.unwrap().unwrap();
        assert_eq!(payload, "hello");
        session.write_frame(b"Server hello").await.unwrap();

        let reply = frame::read_frame(&mut client, BUFFER_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "Server hello");
    }

    #[tokio::test]
    async fn pipelined_frames_stay_buffered() {
        let (mut session, mut client) = pair().await;
        frame::write_frame(&mut client, b"one").await.unwrap();
        frame::write_frame(&mut client, b"two").await.unwrap();

        assert_eq!(session.read_frame().await.unwrap().unwrap(), "one");
        // Both frames may have arrived in one read.
        if session.has_buffered_frame() {
            assert_eq!(
                session.try_read_frame().unwrap(),
                FrameRead::Frame(Bytes::from_static(b"two"))
            );
        } else {
            assert_eq!(session.read_frame().await.unwrap().unwrap(), "two");
        }
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (mut session, client) = pair().await;
        drop(client);
        assert!(session.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_close_mid_frame_is_an_error() {
        let (mut session, mut client) = pair().await;
        client.write_all(&8_u32.to_be_bytes()).await.unwrap();
        client.write_all(b"half").await.unwrap();
        drop(client);

        assert!(session.read_frame().await.unwrap_err().is_truncated_frame());
    }
}
