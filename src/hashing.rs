//! SHA-256 content digests.
//!
//! Every identity in the corpus is derived from the same primitive:
//!
//! | Input | Used for |
//! |-------|----------|
//! | raw file bytes | utility only, never identity |
//! | normalized document text | `documents.file_hash` |
//! | chunk text | `chunks.chunk_hash` and the `chunk_id` suffix |
//! | chunk text + version tags | `chunks.content_hash` |
//!
//! Digests are lowercase hex, 64 characters.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::models::ChunkVersions;

/// Number of `chunk_hash` hex characters embedded in a `chunk_id`.
pub const CHUNK_ID_HASH_PREFIX: usize = 12;

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_text(text: &str) -> String {
    sha256_bytes(text.as_bytes())
}

/// Stream a reader through the hasher without buffering it whole.
pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    sha256_reader(std::fs::File::open(path)?)
}

/// Digest of the chunk text tagged with the tokenizer and segmenter versions.
///
/// Bumping either version changes this value while `sha256_text(text)`
/// stays the same.
pub fn versioned_content_hash(text: &str, versions: ChunkVersions) -> String {
    sha256_text(&format!(
        "{}|tok={}|seg={}",
        text, versions.tokenization, versions.segmentation
    ))
}

/// Content-addressed chunk identifier: `<doc_id>:<first 12 hex of chunk_hash>`.
pub fn chunk_id(doc_id: &str, chunk_hash: &str) -> String {
    let prefix = chunk_hash
        .get(..CHUNK_ID_HASH_PREFIX)
        .unwrap_or(chunk_hash);
    format!("{}:{}", doc_id, prefix)
}
