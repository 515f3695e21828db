//! The Tracker's shared mutable state: mutated only inside a single critical
//! section, snapshotted into immutable values before being encoded onto the
//! wire outside the lock.

use crate::error::{ChunkSwarmError, Result};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A live seeder, identified by (address, port) — `last_seen` is mutable
/// metadata and deliberately excluded from equality/hashing.
#[derive(Debug, Clone)]
pub struct SeederEntry {
    pub address: IpAddr,
    pub port: u16,
    pub last_seen: Instant,
}

impl PartialEq for SeederEntry {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}
impl Eq for SeederEntry {}

impl std::hash::Hash for SeederEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

struct FileEntry {
    chunk_count: u32,
    file_hash: Option<[u8; 32]>,
    seeders: HashMap<(IpAddr, u16), SeederEntry>,
}

/// `file_name -> { chunk_count, seeders }`. A single `Mutex` guards the
/// whole map; the reaper takes the same lock as request handlers, so there
/// is one critical section for the entire registry.
#[derive(Default)]
pub struct FileRegistry {
    files: Mutex<HashMap<String, FileEntry>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        FileRegistry {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts a seeder for `file_name`. The first REGISTER for a file fixes
    /// `chunk_count` (and `file_hash`, if given); a later REGISTER with a
    /// different `chunk_count` is rejected without mutating anything.
    pub fn register(
        &self,
        file_name: &str,
        address: IpAddr,
        port: u16,
        chunk_count: u32,
        file_hash: Option<[u8; 32]>,
        now: Instant,
    ) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(file_name.to_string()).or_insert_with(|| FileEntry {
            chunk_count,
            file_hash,
            seeders: HashMap::new(),
        });

        if entry.chunk_count != chunk_count {
            return Err(ChunkSwarmError::ChunkCountConflict {
                file_name: file_name.to_string(),
                existing: entry.chunk_count,
                attempted: chunk_count,
            });
        }
        if entry.file_hash.is_none() {
            entry.file_hash = file_hash;
        }

        entry.seeders.insert(
            (address, port),
            SeederEntry {
                address,
                port,
                last_seen: now,
            },
        );
        Ok(())
    }

    /// Refreshes `last_seen` for (address, port) across every file it
    /// serves. Silently a no-op if the seeder is unknown.
    pub fn keepalive(&self, address: IpAddr, port: u16, now: Instant) {
        let mut files = self.files.lock().unwrap();
        for entry in files.values_mut() {
            if let Some(seeder) = entry.seeders.get_mut(&(address, port)) {
                seeder.last_seen = now;
            }
        }
    }

    /// Snapshots the current live seeder set for `file_name` (possibly
    /// empty if the file is unknown). Copied under the lock, before the
    /// caller encodes it onto the wire.
    pub fn peer_list(&self, file_name: &str) -> Vec<SeederEntry> {
        let files = self.files.lock().unwrap();
        match files.get(file_name) {
            Some(entry) => {
                let mut peers: Vec<SeederEntry> = entry.seeders.values().cloned().collect();
                peers.sort_by_key(|s| (s.address, s.port));
                peers
            }
            None => Vec::new(),
        }
    }

    pub fn chunk_count(&self, file_name: &str) -> Option<(u32, Option<[u8; 32]>)> {
        let files = self.files.lock().unwrap();
        files.get(file_name).map(|e| (e.chunk_count, e.file_hash))
    }

    /// Removes every `SeederEntry` whose `last_seen` is older than
    /// `liveness_timeout`; a file whose seeder set becomes empty is removed
    /// entirely.
    pub fn reap(&self, liveness_timeout: Duration, now: Instant) {
        let mut files = self.files.lock().unwrap();
        files.retain(|_, entry| {
            entry
                .seeders
                .retain(|_, seeder| now.duration_since(seeder.last_seen) < liveness_timeout);
            !entry.seeders.is_empty()
        });
    }

    #[cfg(test)]
    fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}
