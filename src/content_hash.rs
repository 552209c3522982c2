//! Streaming content hashing.

use crate::job::CancelToken;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Content digest used for duplicate grouping and copy verification.
pub type ContentHash = blake3::Hash;

/// Why a hash could not be produced.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read file for hashing")]
    Io(#[from] io::Error),

    #[error("hashing cancelled")]
    Cancelled,
}

/// Hash a file in `chunk_size` reads, checking `cancel` between chunks.
pub fn hash_file(
    path: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<ContentHash, HashError> {
    let mut file = File::open(path)?;
    hash_reader(&mut file, chunk_size, cancel)
}

pub fn hash_reader<R: Read>(
    reader: &mut R,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<ContentHash, HashError> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        if cancel.is_cancelled() {
            return Err(HashError::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::Io(e)),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_size_does_not_change_hash() {
        let data = vec![7u8; 10_000];
        let token = CancelToken::new();
        let small = hash_reader(&mut data.as_slice(), 7, &token).unwrap();
        let large = hash_reader(&mut data.as_slice(), 64 * 1024, &token).unwrap();
        assert_eq!(small, large);
        assert_eq!(small, blake3::hash(&data));
    }

    #[test]
    fn test_hash_file_matches_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("a.bin");
        fs::write(&path, b"hello world").expect("Failed to write file");

        let hash = hash_file(&path, 4, &CancelToken::new()).expect("Failed to hash");
        assert_eq!(hash, blake3::hash(b"hello world"));
    }

    #[test]
    fn test_cancelled_hash_stops() {
        let token = CancelToken::new();
        token.cancel();
        let data = vec![1u8; 100];
        let result = hash_reader(&mut data.as_slice(), 10, &token);
        assert!(matches!(result, Err(HashError::Cancelled)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = hash_file(Path::new("/non/existent/file"), 16, &CancelToken::new());
        match result {
            Err(err @ HashError::Io(_)) => {
                let source = std::error::Error::source(&err).expect("Missing io source");
                assert!(source.downcast_ref::<io::Error>().is_some());
                assert_eq!(err.to_string(), "failed to read file for hashing");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
