//! The Tracker: a connectionless registry of live seeders plus a background
//! reaper.

mod registry;
mod server;

pub use registry::{FileRegistry, SeederEntry};
pub use server::TrackerServer;
