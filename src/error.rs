//! Domain error taxonomy grouping protocol, registry, transport, integrity,
//! resource, and cancellation failures into one enum. Transient protocol and
//! transport errors are handled by callers (retry, drop); registry, integrity,
//! and resource errors are surfaced upward to whoever initiated the request.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkSwarmError {
    #[error("malformed frame: {0}")]
    ParseError(String),

    #[error("frame body of {0} bytes exceeds the {1} byte limit")]
    SizeExceeded(usize, usize),

    #[error("chunk_count conflict for {file_name:?}: registered as {existing}, got {attempted}")]
    ChunkCountConflict {
        file_name: String,
        existing: u32,
        attempted: u32,
    },

    #[error("file {0:?} is not known to this tracker")]
    UnknownFile(String),

    #[error("remote peer returned an error: {0}")]
    Remote(String),

    #[error("failed to connect to {0}: {1}")]
    ConnectFailed(SocketAddr, std::io::Error),

    #[error("timed out waiting for a response from {0}")]
    ReadTimeout(SocketAddr),

    #[error("short read from {0}: expected {1} bytes, got {2}")]
    ShortRead(SocketAddr, usize, usize),

    #[error("connection to {0} was reset: {1}")]
    Reset(SocketAddr, std::io::Error),

    #[error("chunk {index} hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("whole-file hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },

    #[error("no seeders are registered for {0:?}")]
    NoSeeders(String),

    #[error("chunk {0} exceeded its retry budget")]
    FailedChunk(u32),

    #[error("download of {0:?} failed integrity verification")]
    FailedFile(String),

    #[error("download was cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChunkSwarmError>;
