use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{LibraryError, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest; every media id has this shape.
pub const CONTENT_ID_LEN: usize = 64;

/// Digest capability used by the content store.
///
/// Implementations must consume the reader incrementally so memory stays
/// constant regardless of file size.
pub trait ContentHasher: Send + Sync {
    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

pub fn calculate_hash(hasher: &dyn ContentHasher, path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| LibraryError::io("failed to open file for hashing", path, e))?;
    let mut reader = BufReader::new(file);
    hasher
        .hash_reader(&mut reader)
        .map_err(|e| LibraryError::io("failed to read file for hashing", path, e))
}

/// True when `id` is a lowercase hex SHA-256 digest.
///
/// Anything else can never name a stored file, which is what keeps lookups
/// inside the content namespace.
pub fn is_content_id(id: &str) -> bool {
    id.len() == CONTENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
