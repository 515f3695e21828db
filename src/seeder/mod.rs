//! The Seeder role: ingests local files, announces them to the Tracker, and
//! serves chunk requests from leechers.

mod chunking;
mod server;

pub use chunking::ChunkStore;
pub use server::SeederServer;
