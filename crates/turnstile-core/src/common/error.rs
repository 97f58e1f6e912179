//! Error types shared by both broker modes.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a dispatcher, worker, or client can surface. Peer disconnects are not
//! errors: readers report them as `None` (or [`FrameRead::Closed`]) and callers
//! treat them as the normal end of a conversation.
//!
//! ## Error Cases
//! - `Transport`: a socket operation failed, or the peer closed the connection
//!   in the middle of a frame.
//! - `Format`: an endpoint string or a frame length prefix was malformed.
//! - `Bus`: the IPC bus was torn down or is full.
//!
//! [`FrameRead::Closed`]: crate::frame::FrameRead::Closed

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the broker core.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Socket create/bind/accept/send/receive failure, or a frame cut short
    /// by the peer.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed address string or out-of-range frame length.
    #[error("Format error: {reason}")]
    Format { reason: String },

    /// The bus rejected a publish or a consume.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl Error {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error was caused by the peer closing the
    /// connection part-way through a frame.
    pub fn is_truncated_frame(&self) -> bool {
        matches!(self, Self::Transport(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Failure modes of the [`Bus`](crate::bus::Bus).
#[derive(Clone, Copy, thiserror::Error, Debug, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been closed; no further messages will be delivered.
    #[error("bus is closed")]
    Closed,

    /// The bus is at capacity.
    #[error("bus is full")]
    Full,
}

/// A rejected publish. Carries the message back so the caller can recover
/// whatever it owned (for example a client session).
#[derive(thiserror::Error)]
pub enum PublishError<M> {
    #[error("bus is full")]
    Full(M),
    #[error("bus is closed")]
    Closed(M),
}

impl<M> PublishError<M> {
    /// Recovers the message that could not be published.
    pub fn into_inner(self) -> M {
        match self {
            Self::Full(m) | Self::Closed(m) => m,
        }
    }

    /// The message-free form of this error.
    pub const fn kind(&self) -> BusError {
        match self {
            Self::Full(_) => BusError::Full,
            Self::Closed(_) => BusError::Closed,
        }
    }
}

impl<M> core::fmt::Debug for PublishError<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<M> From<PublishError<M>> for Error {
    fn from(err: PublishError<M>) -> Self {
        Self::Bus(err.kind())
    }
}
