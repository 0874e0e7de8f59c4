//! Upload boundary: extension gate and opaque-name storage of raw bytes.
//!
//! The original filename is only consulted for its extension. Stored files
//! are named by a freshly minted UUID v4, which doubles as the `doc_id`.

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::error::{IngestError, IngestStage};
use crate::models::DocumentFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub doc_id: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
}

/// Accept `pdf`, `doc` and `docx` (any case) by the text after the last `.`.
pub fn detect_format(filename: &str) -> Result<DocumentFormat, IngestError> {
    DocumentFormat::from_filename(filename)
        .ok_or_else(|| IngestError::UnsupportedFormat(format!("'{}'", filename)))
}

/// Write `bytes` to `<dir>/<doc_id>`, creating `dir` if needed.
pub async fn store_upload(
    dir: &Path,
    format: DocumentFormat,
    bytes: &[u8],
) -> Result<StoredUpload, IngestError> {
    let doc_id = Uuid::new_v4().to_string();
    let path = dir.join(&doc_id);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(IngestError::raw_file(&doc_id, IngestStage::SaveUpload))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(IngestError::raw_file(&doc_id, IngestStage::SaveUpload))?;

    info!(doc_id = %doc_id, format = %format, bytes = bytes.len(), "upload stored");
    Ok(StoredUpload {
        doc_id,
        path,
        format,
    })
}
