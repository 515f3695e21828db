//! Splits a local file into fixed-size chunks and computes the per-chunk and
//! whole-file SHA-256 digests a seeder needs to answer GET, GET_HASHES, and
//! (via the tracker) GET_COUNT.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// A file's immutable, already-verified chunk set. Built once at ingest and
/// read by any number of concurrent GET handlers without locking: chunk
/// bytes never change after ingest, so reads are lock-free.
pub struct ChunkStore {
    chunk_size: usize,
    chunks: Vec<Vec<u8>>,
    hashes: Vec<[u8; 32]>,
    file_hash: [u8; 32],
}

impl ChunkStore {
    /// Reads `path` and splits it into `chunk_size`-byte chunks (the final
    /// chunk short if necessary, but never empty for a non-empty file).
    pub fn ingest(path: &Path, chunk_size: usize) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, chunk_size)
    }

    pub fn from_bytes(bytes: &[u8], chunk_size: usize) -> Result<Self> {
        let chunks: Vec<Vec<u8>> = if bytes.is_empty() {
            Vec::new()
        } else {
            bytes.chunks(chunk_size).map(|c| c.to_vec()).collect()
        };

        let hashes = chunks
            .iter()
            .map(|chunk| {
                let mut hasher = Sha256::new();
                hasher.update(chunk);
                hasher.finalize().into()
            })
            .collect();

        let file_hash = {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hasher.finalize().into()
        };

        Ok(ChunkStore {
            chunk_size,
            chunks,
            hashes,
            file_hash,
        })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        self.chunks.get(index as usize).map(|c| c.as_slice())
    }

    pub fn hashes(&self) -> &[[u8; 32]] {
        &self.hashes
    }

    pub fn file_hash(&self) -> [u8; 32] {
        self.file_hash
    }

    /// Builds a store from chunks a leecher has already fetched and verified,
    /// skipping a redundant re-read and re-hash of the reassembled file when
    /// a completed download is promoted to seeding the same file.
    pub fn from_parts(
        chunk_size: usize,
        chunks: Vec<Vec<u8>>,
        hashes: Vec<[u8; 32]>,
        file_hash: [u8; 32],
    ) -> Self {
        ChunkStore {
            chunk_size,
            chunks,
            hashes,
            file_hash,
        }
    }
}
