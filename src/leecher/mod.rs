//! The Leecher role: discovers seeders, downloads a file in parallel across
//! them, and reassembles and verifies the result.

mod download;
mod reassembly;

pub use download::{download, CancellationToken, DownloadOutcome, Progress};
