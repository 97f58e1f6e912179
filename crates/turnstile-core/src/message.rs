//! Messages carried on the [`Bus`](crate::bus::Bus).
//!
//! Each broker mode runs its own typed bus: referral brokers exchange
//! [`StatusUpdate`]s, relay brokers exchange [`RelayRequest`]s.

use crate::{ClientSession, WorkerStatus};
use bytes::Bytes;

/// Occupancy report from a referral worker, tagged with the dispatcher's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub worker_port: u16,
    pub status: WorkerStatus,
}

/// A client request travelling from a relay dispatcher to a worker.
///
/// The session moves with the request: while it sits on the bus or inside a
/// worker, the dispatcher has no handle to it.
#[derive(Debug)]
pub struct RelayRequest {
    pub session: ClientSession,
    pub payload: Bytes,
}
