//! Positional reassembly and whole-file integrity check. Chunks are written
//! in index order to a `.part` file, which is then atomically renamed into
//! place -- a reader never observes a half-written final file.

use crate::error::{ChunkSwarmError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Concatenates `chunks` in index order into `<download_dir>/<file_name>`,
/// via a `.part` staging file, then renames it into place. If
/// `expected_file_hash` is given and doesn't match, the staging file is
/// deleted and the download is failed (`FileHashMismatch`).
pub fn reassemble(
    download_dir: &Path,
    file_name: &str,
    chunks: &[Vec<u8>],
    expected_file_hash: Option<[u8; 32]>,
) -> Result<(PathBuf, [u8; 32])> {
    fs::create_dir_all(download_dir)?;
    let part_path = download_dir.join(format!("{file_name}.part"));
    let final_path = download_dir.join(file_name);

    let mut hasher = Sha256::new();
    {
        let file = File::create(&part_path)?;
        let mut writer = BufWriter::new(file);
        for chunk in chunks {
            writer.write_all(chunk)?;
            hasher.update(chunk);
        }
        writer.flush()?;
    }
    let actual: [u8; 32] = hasher.finalize().into();

    if let Some(expected) = expected_file_hash {
        if expected != actual {
            let _ = fs::remove_file(&part_path);
            return Err(ChunkSwarmError::FileHashMismatch {
                expected: hex(&expected),
                actual: hex(&actual),
            });
        }
    }

    fs::rename(&part_path, &final_path)?;
    Ok((final_path, actual))
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![vec![1, 2, 3], vec![4, 5], vec![6]];
        let (path, _hash) = reassemble(dir.path(), "out.bin", &chunks, None).unwrap();
        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mismatched_file_hash_deletes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![vec![1, 2, 3]];
        let err = reassemble(dir.path(), "out.bin", &chunks, Some([0u8; 32])).unwrap_err();
        assert!(matches!(err, ChunkSwarmError::FileHashMismatch { .. }));
        assert!(!dir.path().join("out.bin.part").exists());
        assert!(!dir.path().join("out.bin").exists());
    }

    #[test]
    fn matching_file_hash_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![vec![9u8; 5]];
        let mut hasher = Sha256::new();
        hasher.update(&chunks[0]);
        let expected: [u8; 32] = hasher.finalize().into();

        let (path, actual) = reassemble(dir.path(), "out.bin", &chunks, Some(expected)).unwrap();
        assert_eq!(actual, expected);
        assert!(path.exists());
        assert!(!dir.path().join("out.bin.part").exists());
    }
}
