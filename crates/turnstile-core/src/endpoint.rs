//! Network endpoint value type.
//!
//! An [`Endpoint`] is what a referral dispatcher hands to a client (as its
//! `"ip:port"` text form) and what every log line uses to name a peer.

use crate::{Error, Result};
use core::{fmt, str::FromStr};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// An IPv4 address and port, in host representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from its parts.
    #[must_use]
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Creates a loopback endpoint on the given port.
    #[must_use]
    pub const fn localhost(port: u16) -> Self {
        Self::new(Ipv4Addr::LOCALHOST, port)
    }

    #[must_use]
    pub const fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the same IP with a different port.
    #[must_use]
    pub const fn with_port(&self, port: u16) -> Self {
        Self::new(self.ip, port)
    }

    /// Returns the endpoint as a [`SocketAddr`] suitable for bind/connect.
    #[must_use]
    pub const fn as_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Parses the `"A.B.C.D:PORT"` form sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the separator or port is missing, the
    /// port is not a valid `u16`, or the address is not dotted IPv4.
    pub fn parse(text: &str) -> Result<Self> {
        let (ip, port) = text
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::format(format!("missing ':' separator in {text:?}")))?;

        if port.is_empty() {
            return Err(Error::format(format!("missing port in {text:?}")));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| Error::format(format!("invalid port {port:?}: {e}")))?;
        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|e| Error::format(format!("invalid IPv4 address {ip:?}: {e}")))?;

        Ok(Self::new(ip, port))
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = Error;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => v6
                .ip()
                .to_ipv4_mapped()
                .map(|ip| Self::new(ip, v6.port()))
                .ok_or_else(|| Error::format(format!("{addr} is not an IPv4 address"))),
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        ep.as_socket_addr()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
