//! Core data models used throughout the ingestion pipeline.
//!
//! These types represent the documents, chunks, and embedding payloads that
//! flow from extraction into the change-detection store.

use serde::Serialize;

use crate::hashing::{chunk_id, sha256_text, versioned_content_hash};

/// Source formats accepted at the upload boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    /// Legacy binary word-processor format. Accepted by extension but has
    /// no text-extraction support.
    Doc,
    Docx,
}

impl DocumentFormat {
    /// Case-insensitive lookup by bare extension (`"pdf"`, `"DOCX"`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// Format from the text after the last `.` of a filename.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Format from leading magic bytes, used for stored uploads whose
    /// filename carries no extension.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(Self::Pdf)
        } else if bytes.starts_with(b"PK\x03\x04") {
            Some(Self::Docx)
        } else if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            Some(Self::Doc)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Doc => "doc",
            Self::Docx => "docx",
        }
    }

    pub fn supports_text_extraction(&self) -> bool {
        !matches!(self, Self::Doc)
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Document row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub doc_id: String,
    pub source_path: String,
    pub title: Option<String>,
    /// Digest of the normalized extracted text, not of the raw bytes.
    pub file_hash: String,
    /// Ingestion timestamp, seconds since epoch.
    pub modified_at: i64,
}

/// Input to [`IngestSession::upsert_document`](crate::store::IngestSession::upsert_document).
#[derive(Debug, Clone)]
pub struct DocumentUpsert<'a> {
    pub doc_id: &'a str,
    pub source_path: &'a str,
    pub title: Option<&'a str>,
    pub normalized_text: &'a str,
    pub modified_at: i64,
}

impl DocumentUpsert<'_> {
    pub fn file_hash(&self) -> String {
        sha256_text(self.normalized_text)
    }
}

/// Tokenization and segmentation version tags folded into every
/// `content_hash`.
///
/// Passed explicitly to the chunker so that two configurations (for
/// example a backfill on old versions next to live ingestion on new ones)
/// can run in the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkVersions {
    pub tokenization: u32,
    pub segmentation: u32,
}

impl ChunkVersions {
    pub const fn new(tokenization: u32, segmentation: u32) -> Self {
        Self {
            tokenization,
            segmentation,
        }
    }
}

impl Default for ChunkVersions {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// A slice of document text before identity is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub doc_id: String,
    pub text: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub section: Option<String>,
}

impl ChunkDraft {
    /// Assign content-addressed identity under the given versions.
    pub fn identify(self, index: usize, versions: ChunkVersions) -> Chunk {
        let chunk_hash = sha256_text(&self.text);
        let content_hash = versioned_content_hash(&self.text, versions);
        Chunk {
            chunk_id: chunk_id(&self.doc_id, &chunk_hash),
            doc_id: self.doc_id,
            index,
            page_start: self.page_start,
            page_end: self.page_end,
            section: self.section,
            text: self.text,
            chunk_hash,
            content_hash,
        }
    }
}

/// An addressable chunk of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    /// Position within the document's current chunk sequence.
    pub index: usize,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub section: Option<String>,
    pub text: String,
    pub chunk_hash: String,
    pub content_hash: String,
}

/// Identity returned by a chunk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub chunk_id: String,
    pub content_hash: String,
}

/// Stored vector payload, keyed by `(chunk_id, model)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub chunk_id: String,
    pub model: String,
    pub dim: usize,
    pub vector: Vec<u8>,
    /// `content_hash` of the chunk at the time the vector was computed.
    pub content_hash: String,
}
