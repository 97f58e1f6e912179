//! Request handlers applied by workers.
//!
//! Workers do not know what a payload means. They call a [`Transform`] to turn
//! a request into a reply; the default [`PrefixTransform`] just prepends a
//! marker token.

use bytes::{BufMut, Bytes, BytesMut};

/// Turns one request payload into one reply payload.
///
/// Any `Fn(&[u8]) -> Bytes` closure that is `Send + Sync` is a `Transform`.
pub trait Transform: Send + Sync + 'static {
    fn apply(&self, payload: &[u8]) -> Bytes;
}

impl<F> Transform for F
where
    F: Fn(&[u8]) -> Bytes + Send + Sync + 'static,
{
    fn apply(&self, payload: &[u8]) -> Bytes {
        self(payload)
    }
}

/// Prepends `prefix` and a single space to every payload.
#[derive(Debug, Clone)]
pub struct PrefixTransform {
    prefix: Bytes,
}

impl PrefixTransform {
    pub const DEFAULT_PREFIX: &'static str = "Server";

    pub fn new(prefix: impl Into<Bytes>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixTransform {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl Transform for PrefixTransform {
    fn apply(&self, payload: &[u8]) -> Bytes {
        let mut reply = BytesMut::with_capacity(self.prefix.len() + 1 + payload.len());
        reply.put_slice(&self.prefix);
        reply.put_u8(b' ');
        reply.put_slice(payload);
        reply.freeze()
    }
}
