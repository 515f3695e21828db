//! Datagram client helpers shared by the Seeder (REGISTER, KEEPALIVE) and the
//! Leecher (REQUEST, GET_COUNT) for talking to the Tracker. One-shot
//! request/response over a fresh ephemeral UDP socket; there is no
//! retransmission layer here — callers that need one retry at a higher
//! level, against a different peer or a refreshed tracker reply.

use crate::error::{ChunkSwarmError, Result};
use crate::protocol::{self, Message};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Sends `message` to `tracker_addr` and waits up to `timeout` for a single
/// reply datagram. Returns `None` on timeout (the caller decides whether
/// that's retryable or fatal).
pub fn request(
    tracker_addr: SocketAddr,
    message: &Message,
    timeout: Duration,
) -> Result<Option<Message>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(timeout))?;
    let bytes = protocol::encode(message)?;
    socket.send_to(&bytes, tracker_addr)?;

    let mut buf = vec![0u8; protocol::MAX_DATAGRAM_PAYLOAD];
    match socket.recv_from(&mut buf) {
        Ok((len, _)) => Ok(Some(protocol::decode(&buf[..len])?)),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Ok(None)
        }
        Err(err) => Err(ChunkSwarmError::Io(err)),
    }
}

/// Like [`request`], but fails with `ReadTimeout` instead of returning
/// `None` -- convenient for callers (REGISTER, KEEPALIVE) that don't have a
/// meaningful fallback on timeout.
pub fn request_expecting_reply(
    tracker_addr: SocketAddr,
    message: &Message,
    timeout: Duration,
) -> Result<Message> {
    request(tracker_addr, message, timeout)?.ok_or(ChunkSwarmError::ReadTimeout(tracker_addr))
}
