//! Client side of the referral handshake.

use crate::{BUFFER_SIZE, Endpoint, Error, OCCUPIED_SENTINEL, Result, frame::read_frame};
use tokio::net::TcpStream;

/// What a referral dispatcher told the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Referral {
    /// Reconnect to this worker for the actual conversation.
    Worker(Endpoint),
    /// Every worker is busy.
    Occupied,
}

impl Referral {
    /// Interprets the payload of a handshake frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the payload is neither the sentinel nor
    /// an `"ip:port"` string.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = core::str::from_utf8(payload)
            .map_err(|e| Error::format(format!("referral is not UTF-8: {e}")))?;
        if text == OCCUPIED_SENTINEL {
            return Ok(Self::Occupied);
        }
        Endpoint::parse(text).map(Self::Worker)
    }
}

/// Connects to a referral dispatcher and reads its single handshake frame.
///
/// # Errors
///
/// - [`Error::Transport`] if the connection fails or the dispatcher closes
///   without sending a frame.
/// - [`Error::Format`] if the reply is malformed.
pub async fn request_referral(dispatcher: Endpoint) -> Result<Referral> {
    let mut stream = TcpStream::connect(dispatcher.as_socket_addr()).await?;
    let Some(payload) = read_frame(&mut stream, BUFFER_SIZE).await? else {
        return Err(Error::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("dispatcher {dispatcher} closed without a referral"),
        )));
    };
    Referral::parse(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sentinel() {
        assert_eq!(Referral::parse(b"occupied").unwrap(), Referral::Occupied);
    }

    #[test]
    fn parses_worker_address() {
        assert_eq!(
            Referral::parse(b"127.0.0.1:8082").unwrap(),
            Referral::Worker(Endpoint::localhost(8082))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Referral::parse(b"busy").is_err());
        assert!(Referral::parse(&[0xff, 0xfe]).is_err());
    }
}
