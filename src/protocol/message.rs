//! Tagged-record wire format: one Rust enum per (message_kind, command_kind |
//! control_kind) pair, so the variant itself selects the payload shape and
//! there's no opaque keyword-field bag that could forward an unknown field.
//! Encoding is `bincode` over the `serde`-derived enum, a well-defined binary
//! format with no embedded-code-execution surface.
//!
//! Stream frames are length-prefixed (4-byte big-endian `u32`) so a reader
//! can pull exactly one frame off a `TcpStream`. Datagram frames are
//! unprefixed: a UDP datagram is already one frame.

use crate::config::MAX_FRAME_BODY;
use crate::error::{ChunkSwarmError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Recommended ceiling for a single UDP payload.
pub const MAX_DATAGRAM_PAYLOAD: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Command,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Register,
    Keepalive,
    Request,
    Get,
    GetCount,
    GetHashes,
    BecomeSeeder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Ack,
    Error,
    PeerList,
    ChunkCount,
    ChunkHashes,
    ChunkData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Command(Command),
    Control(Control),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Register {
        file_name: String,
        peer_port: u16,
        chunk_count: u32,
        /// Whole-file SHA-256, stored by the tracker alongside chunk_count
        /// and echoed back on GET_COUNT. Only the first REGISTER for a file
        /// fixes it.
        file_hash: Option<[u8; 32]>,
    },
    Keepalive {
        peer_port: u16,
    },
    Request {
        file_name: String,
    },
    Get {
        file_name: String,
        chunk_index: u32,
    },
    GetCount {
        file_name: String,
    },
    GetHashes {
        file_name: String,
    },
    /// Role-transition announcement. A tracker treats this identically to
    /// `Register`: the leecher-turned-seeder is upserted into the file's
    /// seeder set.
    BecomeSeeder {
        file_name: String,
        peer_port: u16,
        chunk_count: u32,
        file_hash: Option<[u8; 32]>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Control {
    Ack,
    Error {
        error_text: String,
    },
    PeerList {
        peers: Vec<PeerAddr>,
    },
    /// `file_hash` piggybacks the whole-file digest so a leecher can do the
    /// optional whole-file integrity check without a new round trip.
    ChunkCount {
        chunk_count: u32,
        file_hash: Option<[u8; 32]>,
    },
    /// The full per-chunk digest vector, fetched once via GET_HASHES before
    /// any chunk worker starts.
    ChunkHashes {
        hashes: Vec<[u8; 32]>,
    },
    ChunkData {
        bytes: Vec<u8>,
    },
}

impl Message {
    pub fn message_kind(&self) -> MessageKind {
        match self {
            Message::Command(_) => MessageKind::Command,
            Message::Control(_) => MessageKind::Control,
        }
    }

    pub fn command_kind(&self) -> Option<CommandKind> {
        match self {
            Message::Command(Command::Register { .. }) => Some(CommandKind::Register),
            Message::Command(Command::Keepalive { .. }) => Some(CommandKind::Keepalive),
            Message::Command(Command::Request { .. }) => Some(CommandKind::Request),
            Message::Command(Command::Get { .. }) => Some(CommandKind::Get),
            Message::Command(Command::GetCount { .. }) => Some(CommandKind::GetCount),
            Message::Command(Command::GetHashes { .. }) => Some(CommandKind::GetHashes),
            Message::Command(Command::BecomeSeeder { .. }) => Some(CommandKind::BecomeSeeder),
            Message::Control(_) => None,
        }
    }

    pub fn control_kind(&self) -> Option<ControlKind> {
        match self {
            Message::Control(Control::Ack) => Some(ControlKind::Ack),
            Message::Control(Control::Error { .. }) => Some(ControlKind::Error),
            Message::Control(Control::PeerList { .. }) => Some(ControlKind::PeerList),
            Message::Control(Control::ChunkCount { .. }) => Some(ControlKind::ChunkCount),
            Message::Control(Control::ChunkHashes { .. }) => Some(ControlKind::ChunkHashes),
            Message::Control(Control::ChunkData { .. }) => Some(ControlKind::ChunkData),
            Message::Command(_) => None,
        }
    }

    /// Non-empty body carried by this message, if any. `ChunkData` is the
    /// only variant that ever carries one.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Message::Control(Control::ChunkData { bytes }) => Some(bytes),
            _ => None,
        }
    }
}

/// Encodes a message for datagram transport. Errors with `SizeExceeded` if
/// the result wouldn't fit in a single recommended-size UDP payload.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(message)
        .map_err(|err| ChunkSwarmError::ParseError(err.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(ChunkSwarmError::SizeExceeded(
            bytes.len(),
            MAX_DATAGRAM_PAYLOAD,
        ));
    }
    Ok(bytes)
}

/// Decodes a datagram payload produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() > MAX_FRAME_BODY {
        return Err(ChunkSwarmError::SizeExceeded(bytes.len(), MAX_FRAME_BODY));
    }
    bincode::deserialize(bytes).map_err(|err| ChunkSwarmError::ParseError(err.to_string()))
}

/// Writes one length-prefixed frame to a stream transport.
pub fn write_stream_frame<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let bytes = bincode::serialize(message)
        .map_err(|err| ChunkSwarmError::ParseError(err.to_string()))?;
    if bytes.len() > MAX_FRAME_BODY {
        return Err(ChunkSwarmError::SizeExceeded(bytes.len(), MAX_FRAME_BODY));
    }
    writer.write_u32::<BigEndian>(bytes.len() as u32)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Reads exactly one length-prefixed frame from a stream transport.
pub fn read_stream_frame<R: Read>(reader: &mut R) -> Result<Message> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ChunkSwarmError::ParseError(
                "truncated frame: missing length prefix".into(),
            ))
        }
        Err(err) => return Err(err.into()),
    };

    if len > MAX_FRAME_BODY {
        return Err(ChunkSwarmError::SizeExceeded(len, MAX_FRAME_BODY));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ChunkSwarmError::ParseError("truncated frame: short body".into())
        } else {
            ChunkSwarmError::Io(err)
        }
    })?;

    bincode::deserialize(&buf).map_err(|err| ChunkSwarmError::ParseError(err.to_string()))
}
