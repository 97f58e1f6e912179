//! Length-prefixed framing.
//!
//! Every message on the wire is a `u32` big-endian length followed by exactly
//! that many raw bytes. There is no terminator, delimiter, or checksum.
//!
//! Two entry points share the same rules:
//!
//! - [`FrameCodec`] implements the `tokio-util` [`Decoder`]/[`Encoder`] pair,
//!   for use with [`Framed`](tokio_util::codec::Framed) or directly against a
//!   buffer that is filled by non-blocking reads.
//! - [`read_frame`]/[`write_frame`] are one-shot helpers over any async
//!   reader/writer.
//!
//! A peer that closes before the first byte of a frame ends the conversation
//! cleanly (`None`). A peer that closes after that point produces a
//! [`Error::Transport`] with kind `UnexpectedEof`, never a truncated frame.

use crate::{Error, FRAME_HEADER_LEN, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// Outcome of a non-blocking frame read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete frame payload.
    Frame(Bytes),
    /// Not enough bytes have arrived yet; try again once the socket is
    /// readable.
    WouldBlock,
    /// The peer closed the connection on a frame boundary.
    Closed,
}

/// Codec for `u32` big-endian length-prefixed frames.
///
/// Decoding rejects any length above `max_frame_len` before reserving space
/// for it. Encoding only requires the payload length to fit in a `u32`.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    #[must_use]
    pub const fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Returns `true` if decoding `buf` would produce a frame or an error
    /// rather than asking for more bytes.
    #[must_use]
    pub fn is_decidable(&self, buf: &[u8]) -> bool {
        let Some(header) = buf.first_chunk::<FRAME_HEADER_LEN>() else {
            return false;
        };
        let len = u32::from_be_bytes(*header) as usize;
        len > self.max_frame_len || buf.len() >= FRAME_HEADER_LEN + len
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_frame_len {
            return Err(Error::format(format!(
                "frame length {len} exceeds maximum ({})",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(crate::BUFFER_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0_u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&src[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        self.check_len(len)?;

        let total = FRAME_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated(src.len())),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = item.as_ref();
        let len = u32::try_from(payload.len()).map_err(|_| {
            Error::format(format!(
                "payload of {} bytes does not fit a u32 length prefix",
                payload.len()
            ))
        })?;

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u32(len);
        dst.put_slice(payload);
        Ok(())
    }
}

fn truncated(buffered: usize) -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("peer closed mid-frame with {buffered} bytes buffered"),
    ))
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` if the peer closed before sending any byte of the frame.
///
/// # Errors
///
/// - [`Error::Format`] if the announced length exceeds `max_frame_len`.
/// - [`Error::Transport`] on a read failure, or if the peer closed mid-frame.
pub async fn read_frame<R>(reader: &mut R, max_frame_len: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0_u8; FRAME_HEADER_LEN];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[first..]).await?;

    let len = u32::from_be_bytes(header) as usize;
    FrameCodec::new(max_frame_len).check_len(len)?;

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload.freeze()))
}

/// Writes `payload` as one frame and flushes `writer`.
///
/// # Errors
///
/// - [`Error::Format`] if the payload does not fit a `u32` length.
/// - [`Error::Transport`] if any part of the frame could not be sent.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    FrameCodec::default().encode(payload, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
