//! Ingestion failure taxonomy.
//!
//! Failures that touch document identity or content abort the ingestion
//! attempt and carry the document id and stage so the caller can retry.
//! Title-resolution failures never appear here: they are absorbed in
//! [`crate::title`] and downgraded to "no title".

use thiserror::Error;

use crate::extract::ExtractError;
use crate::store::StoreError;

/// Pipeline step at which a storage failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    SaveUpload,
    ReadUpload,
    Lookup,
    Begin,
    UpsertDocument,
    PersistChunks,
    PruneChunks,
    Commit,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SaveUpload => "save-upload",
            Self::ReadUpload => "read-upload",
            Self::Lookup => "lookup",
            Self::Begin => "begin",
            Self::UpsertDocument => "upsert-document",
            Self::PersistChunks => "persist-chunks",
            Self::PruneChunks => "prune-chunks",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Extension outside the accepted set, or a format without text support.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed for document {doc_id}: {source}")]
    Extraction {
        doc_id: String,
        #[source]
        source: ExtractError,
    },

    #[error("storage write failed for document {doc_id} during {stage}: {source}")]
    Storage {
        doc_id: String,
        stage: IngestStage,
        #[source]
        source: StoreError,
    },

    #[error("raw file i/o failed for document {doc_id} during {stage}: {source}")]
    RawFile {
        doc_id: String,
        stage: IngestStage,
        #[source]
        source: std::io::Error,
    },

    #[error("document not found: {0}")]
    NotFound(String),
}

impl IngestError {
    pub(crate) fn storage(doc_id: &str, stage: IngestStage) -> impl FnOnce(StoreError) -> Self + '_ {
        move |source| Self::Storage {
            doc_id: doc_id.to_string(),
            stage,
            source,
        }
    }

    pub(crate) fn raw_file(doc_id: &str, stage: IngestStage) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::RawFile {
            doc_id: doc_id.to_string(),
            stage,
            source,
        }
    }

    pub(crate) fn extraction(doc_id: &str) -> impl FnOnce(ExtractError) -> Self + '_ {
        move |source| Self::Extraction {
            doc_id: doc_id.to_string(),
            source,
        }
    }
}
