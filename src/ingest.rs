//! Ingestion pipeline orchestration.
//!
//! Coordinates one document's flow: upload gate → raw file storage →
//! extraction (on a blocking worker) → title resolution → one store
//! session holding the document upsert, chunk writes and pruning.
//!
//! Ingestions of the same `doc_id` are serialized through [`DocLocks`];
//! different documents proceed independently. Nothing reaches the store
//! before extraction succeeds, and every store write for a document
//! commits together or not at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::error::{IngestError, IngestStage};
use crate::extract::{ExtractError, Extractor};
use crate::hashing::sha256_text;
use crate::models::{DocumentFormat, DocumentUpsert};
use crate::store::{SqliteStore, Store};
use crate::title::{self, TitleResolver};
use crate::upload;

/// Outcome of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    /// `false` when the stored text hash already matched and nothing was written.
    pub changed: bool,
    /// Chunks written by this run.
    pub chunks: usize,
    /// Superseded chunks removed by this run.
    pub pruned: u64,
    pub title: Option<String>,
    /// Pages recovered through OCR.
    pub ocr_pages: Vec<u32>,
}

/// One in-flight ingestion per `doc_id`.
#[derive(Default)]
pub struct DocLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocLocks {
    pub async fn acquire(&self, doc_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // entries nobody holds or waits on
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(doc_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    extractor: Arc<Extractor>,
    chunker: Chunker,
    titles: Arc<dyn TitleResolver>,
    upload_dir: PathBuf,
    title_max_chars: usize,
    locks: DocLocks,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: Extractor,
        chunker: Chunker,
        titles: Arc<dyn TitleResolver>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            extractor: Arc::new(extractor),
            chunker,
            titles,
            upload_dir: upload_dir.into(),
            title_max_chars: crate::extract::TITLE_HINT_CHARS,
            locks: DocLocks::default(),
        }
    }

    pub fn with_title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars;
        self
    }

    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Self {
        Self::new(
            store,
            Extractor::from_config(&config.extraction),
            Chunker::from_config(&config.chunking),
            Arc::from(title::create_resolver(&config.title)),
            &config.uploads.dir,
        )
        .with_title_max_chars(config.title.max_chars)
    }

    /// Gate, store and ingest a new upload under a fresh `doc_id`.
    pub async fn ingest_upload(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<IngestReport, IngestError> {
        let format = upload::detect_format(filename)?;
        if !format.supports_text_extraction() {
            return Err(IngestError::UnsupportedFormat(format!(
                "'{}': {} files have no text extraction support",
                filename, format
            )));
        }

        let stored = upload::store_upload(&self.upload_dir, format, bytes).await?;
        let result = self
            .ingest_document(&stored.doc_id, &stored.path, bytes.to_vec(), format)
            .await;

        if result.is_err() {
            // no document row points at the file
            if let Err(e) = tokio::fs::remove_file(&stored.path).await {
                warn!(doc_id = %stored.doc_id, error = %e, "failed to remove raw upload");
            }
        }
        result
    }

    /// Re-extract the stored file of an existing document and re-run change
    /// detection against it.
    pub async fn reingest(&self, doc_id: &str) -> Result<IngestReport, IngestError> {
        let doc = self
            .store
            .get_document(doc_id)
            .await
            .map_err(IngestError::storage(doc_id, IngestStage::Lookup))?
            .ok_or_else(|| IngestError::NotFound(doc_id.to_string()))?;

        let path = PathBuf::from(&doc.source_path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(IngestError::raw_file(doc_id, IngestStage::ReadUpload))?;
        let format = DocumentFormat::sniff(&bytes)
            .filter(DocumentFormat::supports_text_extraction)
            .ok_or_else(|| {
                IngestError::UnsupportedFormat(format!("stored file {}", path.display()))
            })?;

        self.ingest_document(doc_id, &path, bytes, format).await
    }

    #[instrument(skip(self, path, bytes))]
    async fn ingest_document(
        &self,
        doc_id: &str,
        path: &Path,
        bytes: Vec<u8>,
        format: DocumentFormat,
    ) -> Result<IngestReport, IngestError> {
        let _guard = self.locks.acquire(doc_id).await;

        let extractor = self.extractor.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&bytes, format))
            .await
            .map_err(|e| ExtractError::Worker(e.to_string()))
            .and_then(|r| r)
            .map_err(IngestError::extraction(doc_id))?
            .ok_or_else(|| {
                IngestError::UnsupportedFormat(format!("{} files have no text extraction support", format))
            })?;

        let existing = self
            .store
            .get_document(doc_id)
            .await
            .map_err(IngestError::storage(doc_id, IngestStage::Lookup))?;
        let title = match existing {
            Some(doc) if doc.file_hash == sha256_text(&extraction.text) => doc.title,
            _ => {
                title::resolve_title(
                    self.titles.as_ref(),
                    extraction.title_hint.as_deref(),
                    self.title_max_chars,
                )
                .await
            }
        };

        let source_path = path.to_string_lossy();
        let upsert = DocumentUpsert {
            doc_id,
            source_path: &source_path,
            title: title.as_deref(),
            normalized_text: &extraction.text,
            modified_at: chrono::Utc::now().timestamp(),
        };

        let mut session = self
            .store
            .begin()
            .await
            .map_err(IngestError::storage(doc_id, IngestStage::Begin))?;
        let changed = session
            .upsert_document(&upsert)
            .await
            .map_err(IngestError::storage(doc_id, IngestStage::UpsertDocument))?;

        let mut written = 0;
        let mut pruned = 0;
        if changed {
            let chunks = self.chunker.chunk(doc_id, &extraction.text, extraction.layout);
            let mut keep = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let key = session
                    .persist_chunk(chunk)
                    .await
                    .map_err(IngestError::storage(doc_id, IngestStage::PersistChunks))?;
                keep.push(key.chunk_id);
            }
            written = chunks.len();
            pruned = session
                .prune_chunks(doc_id, &keep)
                .await
                .map_err(IngestError::storage(doc_id, IngestStage::PruneChunks))?;
        } else {
            info!("text unchanged, skipping chunking");
        }

        session
            .commit()
            .await
            .map_err(IngestError::storage(doc_id, IngestStage::Commit))?;

        info!(changed, chunks = written, pruned, ocr_pages = extraction.ocr_pages.len(), "ingested");
        Ok(IngestReport {
            doc_id: doc_id.to_string(),
            changed,
            chunks: written,
            pruned,
            title,
            ocr_pages: extraction.ocr_pages,
        })
    }
}

/// Open the configured database and build an ingestor over it.
async fn open_ingestor(config: &Config) -> anyhow::Result<(sqlx::SqlitePool, Ingestor)> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    Ok((pool, Ingestor::from_config(config, store)))
}

/// CLI entry point for `corpus add <file>`.
pub async fn run_add(config: &Config, path: &Path, json: bool) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    // reject before touching the file or the database
    upload::detect_format(&filename)?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let (pool, ingestor) = open_ingestor(config).await?;
    let result = ingestor.ingest_upload(&filename, &bytes).await;
    pool.close().await;

    print_report(&format!("add {}", filename), &result?, json)
}

/// CLI entry point for `corpus reingest <doc_id>`.
pub async fn run_reingest(config: &Config, doc_id: &str, json: bool) -> anyhow::Result<()> {
    let (pool, ingestor) = open_ingestor(config).await?;
    let result = ingestor.reingest(doc_id).await;
    pool.close().await;

    print_report(&format!("reingest {}", doc_id), &result?, json)
}

/// CLI entry point for `corpus extract <file>`: print normalized text, no writes.
pub async fn run_extract(config: &Config, path: &Path) -> anyhow::Result<()> {
    let filename = path.to_string_lossy();
    let format = upload::detect_format(&filename)?;
    let extractor = Extractor::from_config(&config.extraction);
    let path_buf = path.to_path_buf();

    let extraction = tokio::task::spawn_blocking(move || extractor.extract_file(&path_buf, format))
        .await??
        .ok_or_else(|| IngestError::UnsupportedFormat(format!("{} files have no text extraction support", format)))?;

    if !extraction.ocr_pages.is_empty() {
        info!(pages = ?extraction.ocr_pages, "pages recovered through OCR");
    }
    println!("{}", extraction.text);
    Ok(())
}

fn print_report(header: &str, report: &IngestReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}", header);
    println!("  doc_id: {}", report.doc_id);
    println!("  changed: {}", report.changed);
    println!("  chunks written: {}", report.chunks);
    println!("  chunks pruned: {}", report.pruned);
    println!("  title: {}", report.title.as_deref().unwrap_or("(untitled)"));
    if !report.ocr_pages.is_empty() {
        let pages: Vec<String> = report.ocr_pages.iter().map(u32::to_string).collect();
        println!("  ocr pages: {}", pages.join(", "));
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::extract::testing::{build_pdf, docx, fake_extractor, text_page, FakeRasterizer};
    use crate::models::{Chunk, ChunkKey, ChunkVersions, Document, Embedding};
    use crate::store::{IngestSession, MemoryStore, StoreError};
    use crate::title::TitleError;

    #[derive(Default)]
    struct CountingTitles {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TitleResolver for CountingTitles {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, snippet: &str) -> Result<String, TitleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TitleError::InvalidResponse("boom".into()));
            }
            Ok(format!("\"{}\"", snippet.lines().next().unwrap_or_default()))
        }
    }

    /// Memory store whose sessions can be told to fail chunk writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_chunks: AtomicBool,
    }

    struct FlakySession<'a> {
        inner: Box<dyn IngestSession + 'a>,
        fail_chunks: bool,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn begin<'a>(&'a self) -> Result<Box<dyn IngestSession + 'a>, StoreError> {
            Ok(Box::new(FlakySession {
                inner: self.inner.begin().await?,
                fail_chunks: self.fail_chunks.load(Ordering::SeqCst),
            }))
        }
        async fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StoreError> {
            self.inner.get_document(doc_id).await
        }
        async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>, StoreError> {
            self.inner.list_chunks(doc_id).await
        }
        async fn chunks_ready_to_embed(
            &self,
            model: &str,
            limit: Option<usize>,
        ) -> Result<Vec<Chunk>, StoreError> {
            self.inner.chunks_ready_to_embed(model, limit).await
        }
        async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
            self.inner.upsert_embedding(embedding).await
        }
    }

    #[async_trait]
    impl<'a> IngestSession for FlakySession<'a> {
        async fn upsert_document(&mut self, doc: &DocumentUpsert<'_>) -> Result<bool, StoreError> {
            self.inner.upsert_document(doc).await
        }
        async fn persist_chunk(&mut self, chunk: &Chunk) -> Result<ChunkKey, StoreError> {
            if self.fail_chunks {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.inner.persist_chunk(chunk).await
        }
        async fn prune_chunks(&mut self, doc_id: &str, keep: &[String]) -> Result<u64, StoreError> {
            self.inner.prune_chunks(doc_id, keep).await
        }
        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.commit().await
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        upload_dir: PathBuf,
        store: Arc<FlakyStore>,
        titles: Arc<CountingTitles>,
        rasterizer: Arc<FakeRasterizer>,
        ingestor: Ingestor,
    }

    fn harness_with(titles: CountingTitles) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("raw");
        let store = Arc::new(FlakyStore::default());
        let titles = Arc::new(titles);
        let (extractor, rasterizer) = fake_extractor();
        let ingestor = Ingestor::new(
            store.clone(),
            extractor,
            Chunker::new(700, ChunkVersions::default()),
            titles.clone(),
            &upload_dir,
        );
        Harness {
            _dir: dir,
            upload_dir,
            store,
            titles,
            rasterizer,
            ingestor,
        }
    }

    fn harness() -> Harness {
        harness_with(CountingTitles::default())
    }

    fn stored_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    fn two_page_pdf() -> Vec<u8> {
        build_pdf(&[&text_page("Site Survey"), &text_page("Findings follow here.")])
    }

    #[tokio::test]
    async fn new_pdf_is_stored_chunked_and_titled() {
        let h = harness();
        let report = h.ingestor.ingest_upload("survey.PDF", &two_page_pdf()).await.unwrap();

        assert!(report.changed);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.title.as_deref(), Some("Site Survey"));
        assert!(report.ocr_pages.is_empty());

        let doc = h.store.get_document(&report.doc_id).await.unwrap().unwrap();
        assert_eq!(doc.title.as_deref(), Some("Site Survey"));
        assert_eq!(doc.source_path, h.upload_dir.join(&report.doc_id).to_string_lossy());
        assert_eq!(doc.file_hash, sha256_text("Site Survey\n\n\u{000C}\n\nFindings follow here."));

        let chunks = h.store.list_chunks(&report.doc_id).await.unwrap();
        assert_eq!((chunks[0].page_start, chunks[0].page_end), (Some(1), Some(2)));
    }

    #[tokio::test]
    async fn missing_extension_rejected_before_anything() {
        let h = harness();
        let err = h.ingestor.ingest_upload("report", &two_page_pdf()).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert_eq!(stored_files(&h.upload_dir), 0);
        assert!(h.rasterizer.calls.lock().unwrap().is_empty());
        assert_eq!(h.titles.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn legacy_doc_rejected_without_writing() {
        let h = harness();
        let err = h
            .ingestor
            .ingest_upload("minutes.doc", &[0xD0, 0xCF, 0x11, 0xE0])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert_eq!(stored_files(&h.upload_dir), 0);
    }

    #[tokio::test]
    async fn corrupt_file_reports_extraction_and_leaves_no_trace() {
        let h = harness();
        let err = h.ingestor.ingest_upload("bad.pdf", b"%PDF-garbage").await.unwrap_err();
        let doc_id = match err {
            IngestError::Extraction { doc_id, .. } => doc_id,
            other => panic!("expected extraction error, got {other:?}"),
        };
        assert_eq!(h.store.get_document(&doc_id).await.unwrap(), None);
        assert_eq!(stored_files(&h.upload_dir), 0);
    }

    #[tokio::test]
    async fn unchanged_reingest_is_noop() {
        let h = harness();
        let first = h.ingestor.ingest_upload("a.pdf", &two_page_pdf()).await.unwrap();
        let before = h.store.list_chunks(&first.doc_id).await.unwrap();

        let again = h.ingestor.reingest(&first.doc_id).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.chunks, 0);
        assert_eq!(again.title.as_deref(), Some("Site Survey"));
        assert_eq!(h.titles.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.list_chunks(&first.doc_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn changed_file_rechunks_and_prunes() {
        let h = harness();
        let first = h.ingestor.ingest_upload("a.pdf", &two_page_pdf()).await.unwrap();
        let old = h.store.list_chunks(&first.doc_id).await.unwrap();

        let revised = build_pdf(&[&text_page("Site Survey"), &text_page("Revised findings.")]);
        std::fs::write(h.upload_dir.join(&first.doc_id), revised).unwrap();

        let report = h.ingestor.reingest(&first.doc_id).await.unwrap();
        assert!(report.changed);
        assert_eq!(report.pruned, 1);
        let new = h.store.list_chunks(&first.doc_id).await.unwrap();
        assert_eq!(new.len(), 1);
        assert_ne!(new[0].chunk_id, old[0].chunk_id);
        assert!(new[0].text.ends_with("Revised findings."));
    }

    #[tokio::test]
    async fn scanned_page_goes_through_ocr() {
        let h = harness();
        let pdf = build_pdf(&[&text_page("Cover"), "q Q"]);
        let report = h.ingestor.ingest_upload("scan.pdf", &pdf).await.unwrap();
        assert_eq!(report.ocr_pages, vec![2]);
        let chunks = h.store.list_chunks(&report.doc_id).await.unwrap();
        assert!(chunks[0].text.contains("scanned words from page 2"));
    }

    #[tokio::test]
    async fn same_bytes_twice_make_two_documents() {
        let h = harness();
        let a = h.ingestor.ingest_upload("a.pdf", &two_page_pdf()).await.unwrap();
        let b = h.ingestor.ingest_upload("a.pdf", &two_page_pdf()).await.unwrap();
        assert_ne!(a.doc_id, b.doc_id);
        assert!(b.changed);

        let da = h.store.get_document(&a.doc_id).await.unwrap().unwrap();
        let db = h.store.get_document(&b.doc_id).await.unwrap().unwrap();
        assert_eq!(da.file_hash, db.file_hash);

        let ca = h.store.list_chunks(&a.doc_id).await.unwrap();
        let cb = h.store.list_chunks(&b.doc_id).await.unwrap();
        assert_eq!(ca[0].text, cb[0].text);
        assert_ne!(ca[0].chunk_id, cb[0].chunk_id);
        assert_eq!(stored_files(&h.upload_dir), 2);
    }

    #[tokio::test]
    async fn title_failure_does_not_fail_ingestion() {
        let h = harness_with(CountingTitles {
            fail: true,
            ..CountingTitles::default()
        });
        let bytes = docx("<w:p><w:r><w:t>Memo body.</w:t></w:r></w:p>");
        let report = h.ingestor.ingest_upload("memo.docx", &bytes).await.unwrap();
        assert!(report.changed);
        assert_eq!(report.title, None);
        assert_eq!(h.titles.calls.load(Ordering::SeqCst), 1);
        let chunks = h.store.list_chunks(&report.doc_id).await.unwrap();
        assert_eq!(chunks[0].page_start, None);
    }

    #[tokio::test]
    async fn storage_failure_keeps_previous_state() {
        let h = harness();
        let first = h.ingestor.ingest_upload("a.pdf", &two_page_pdf()).await.unwrap();
        let doc_before = h.store.get_document(&first.doc_id).await.unwrap();
        let chunks_before = h.store.list_chunks(&first.doc_id).await.unwrap();

        let revised = build_pdf(&[&text_page("Site Survey"), &text_page("Revised findings.")]);
        std::fs::write(h.upload_dir.join(&first.doc_id), revised).unwrap();
        h.store.fail_chunks.store(true, Ordering::SeqCst);

        let err = h.ingestor.reingest(&first.doc_id).await.unwrap_err();
        let (doc_id, stage) = match err {
            IngestError::Storage { doc_id, stage, .. } => (doc_id, stage),
            other => panic!("expected storage error, got {other:?}"),
        };
        assert_eq!(doc_id, first.doc_id);
        assert_eq!(stage, IngestStage::PersistChunks);
        assert_eq!(h.store.get_document(&first.doc_id).await.unwrap(), doc_before);
        assert_eq!(h.store.list_chunks(&first.doc_id).await.unwrap(), chunks_before);
    }

    #[tokio::test]
    async fn reingest_unknown_document() {
        let h = harness();
        assert!(matches!(
            h.ingestor.reingest("missing").await,
            Err(IngestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn doc_locks_serialize_same_id_only() {
        let locks = Arc::new(DocLocks::default());
        let held = locks.acquire("a").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("a")).await;
        assert!(blocked.is_err());
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(other.is_ok());

        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire("a")).await;
        assert!(reacquired.is_ok());
    }
}
