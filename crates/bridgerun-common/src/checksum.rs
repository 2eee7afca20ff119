//! Checksum utilities for extracted files and collision-safe names

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Number of hex characters kept by [`short_hash`]
pub const SHORT_HASH_LEN: usize = 6;

/// Compute the SHA-256 checksum of a file
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Compute the SHA-256 checksum of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Short, stable hash of a piece of text (first six hex chars of SHA-256)
pub fn short_hash(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..SHORT_HASH_LEN].to_string()
}

/// Build `<stem>_<hash>.<extension>` where the hash is taken from `key`
///
/// Two items with the same file name in different folders get different
/// names because their keys (relative paths) differ.
pub fn hashed_file_name(stem: &str, key: &str, extension: &str) -> String {
    format!("{}_{}.{}", stem, short_hash(key), extension)
}
