//! Wire protocol: self-describing messages built from a tagged header plus
//! an optional opaque body. Shared by the Tracker, Seeder, and Leecher
//! roles.

mod message;

pub use message::{
    decode, encode, read_stream_frame, write_stream_frame, Command, CommandKind, Control,
    ControlKind, Message, MessageKind, PeerAddr, MAX_DATAGRAM_PAYLOAD,
};
