//! # Shared Protocol Types and Constants
//!
//! Definitions that both broker modes and their clients must agree on. They
//! form a compile-time contract for the wire protocol and the bus addressing
//! scheme.
//!
//! ## Constants
//!
//! - [`BUFFER_SIZE`] - Default maximum payload of a single frame
//! - [`FRAME_HEADER_LEN`] - Size of the big-endian length prefix
//! - [`OCCUPIED_SENTINEL`] - Referral reply meaning "every worker is busy"
//! - [`RELAY_REQUEST_TAG`] - Bus tag carried by relayed client requests
//!
//! ## Types
//!
//! - [`WorkerStatus`] - Occupancy of a referral worker
//! - [`SessionId`] - Identifier assigned to a relay client on admission
//! - [`Tag`] - Bus routing key

/// Default upper bound (in bytes) on a frame payload.
///
/// Frames announcing a longer payload are rejected before any buffer is
/// allocated for them.
pub const BUFFER_SIZE: usize = 1024;

/// Number of bytes in the frame length prefix (`u32`, network byte order).
pub const FRAME_HEADER_LEN: usize = core::mem::size_of::<u32>();

/// Literal sent by a referral dispatcher when no worker is free.
pub const OCCUPIED_SENTINEL: &str = "occupied";

/// Bus tag used for relayed requests. Workers consume with a wildcard, so the
/// value only has to be distinct from status-update tags.
pub const RELAY_REQUEST_TAG: Tag = 1;

/// Routing key for bus messages.
pub type Tag = u64;

/// Identifier assigned to a relay-mode client when it is admitted.
pub type SessionId = u64;

/// Occupancy of a referral-mode worker.
///
/// The worker owns the authoritative value; the dispatcher keeps a cached copy
/// that is refreshed from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    #[default]
    Free,
    Occupied,
}

impl core::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Occupied => f.write_str("occupied"),
        }
    }
}
