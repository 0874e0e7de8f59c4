//! Change-detection storage.
//!
//! The [`Store`] trait is the read side plus the entry point for writes:
//! every write that belongs to one document's ingestion goes through an
//! [`IngestSession`] obtained from [`Store::begin`]. A session is one
//! transaction. Committing makes the document row, its chunks and any
//! pruning visible together; dropping a session without committing
//! discards all of it, on every exit path.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_document`](IngestSession::upsert_document) | Record a document's text hash; reports whether it changed |
//! | [`persist_chunk`](IngestSession::persist_chunk) | Replace-on-conflict chunk write keyed by `chunk_id` |
//! | [`prune_chunks`](IngestSession::prune_chunks) | Drop a document's chunks outside the current set |
//! | [`chunks_ready_to_embed`](Store::chunks_ready_to_embed) | Chunks missing an up-to-date vector for a model |
//! | [`upsert_embedding`](Store::upsert_embedding) | Store a vector keyed by `(chunk_id, model)` |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Chunk, ChunkKey, Document, DocumentUpsert, Embedding};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("chunk not found: {0}")]
    UnknownChunk(String),
    #[error("document not found: {0}")]
    UnknownDocument(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a write session. Sessions on one store are serialized: `begin`
    /// waits until any open session is committed or dropped.
    async fn begin<'a>(&'a self) -> Result<Box<dyn IngestSession + 'a>, StoreError>;

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StoreError>;

    /// Current chunks of a document, in index order.
    async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>, StoreError>;

    /// Chunks with no vector for `model`, or whose vector was computed from
    /// a different `content_hash`. Ordered by document, then index.
    async fn chunks_ready_to_embed(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>, StoreError>;

    /// Insert or replace the vector for `(chunk_id, model)`.
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StoreError>;
}

/// Transactional writes for one document's ingestion.
#[async_trait]
pub trait IngestSession: Send {
    /// Returns `false`, writing nothing, when the stored `file_hash` already
    /// equals the digest of `doc.normalized_text`. Otherwise inserts or
    /// replaces the row and returns `true`. A `None` title keeps any title
    /// already stored.
    async fn upsert_document(&mut self, doc: &DocumentUpsert<'_>) -> Result<bool, StoreError>;

    /// The owning document must already be written in this session or
    /// committed earlier.
    async fn persist_chunk(&mut self, chunk: &Chunk) -> Result<ChunkKey, StoreError>;

    /// Delete chunks of `doc_id` whose id is not in `keep`, together with
    /// their embeddings. Returns the number of chunks removed.
    async fn prune_chunks(&mut self, doc_id: &str, keep: &[String]) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    //! Behavior shared by every backend.

    use super::*;
    use crate::chunk::Chunker;
    use crate::extract::PageLayout;
    use crate::models::{ChunkDraft, ChunkVersions};

    fn upsert<'a>(doc_id: &'a str, text: &'a str) -> DocumentUpsert<'a> {
        DocumentUpsert {
            doc_id,
            source_path: "/uploads/raw",
            title: None,
            normalized_text: text,
            modified_at: 1_700_000_000,
        }
    }

    fn draft(doc_id: &str, text: &str) -> ChunkDraft {
        ChunkDraft {
            doc_id: doc_id.into(),
            text: text.into(),
            page_start: Some(1),
            page_end: Some(2),
            section: Some("Intro".into()),
        }
    }

    fn embedding(chunk: &Chunk, model: &str) -> Embedding {
        Embedding {
            chunk_id: chunk.chunk_id.clone(),
            model: model.into(),
            dim: 2,
            vector: vec![0, 0, 128, 63, 0, 0, 0, 64],
            content_hash: chunk.content_hash.clone(),
        }
    }

    /// Write a document and its chunks in one committed session.
    async fn ingest(store: &dyn Store, doc_id: &str, text: &str, versions: ChunkVersions) -> bool {
        let mut session = store.begin().await.unwrap();
        let changed = session.upsert_document(&upsert(doc_id, text)).await.unwrap();
        if changed {
            let chunks = Chunker::new(700, versions).chunk(doc_id, text, PageLayout::Unpaged);
            let mut keep = Vec::new();
            for chunk in &chunks {
                keep.push(session.persist_chunk(chunk).await.unwrap().chunk_id);
            }
            session.prune_chunks(doc_id, &keep).await.unwrap();
        }
        session.commit().await.unwrap();
        changed
    }

    async fn unchanged_text_is_noop(store: &dyn Store) {
        assert!(ingest(store, "d1", "Body text.", ChunkVersions::default()).await);
        let before = store.get_document("d1").await.unwrap().unwrap();

        let mut session = store.begin().await.unwrap();
        let mut again = upsert("d1", "Body text.");
        again.modified_at += 60;
        again.source_path = "/elsewhere";
        assert!(!session.upsert_document(&again).await.unwrap());
        session.commit().await.unwrap();

        let after = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    async fn one_char_changes_hash(store: &dyn Store) {
        assert!(ingest(store, "d1", "Body text.", ChunkVersions::default()).await);
        let before = store.get_document("d1").await.unwrap().unwrap();
        assert!(ingest(store, "d1", "Body text!", ChunkVersions::default()).await);
        let after = store.get_document("d1").await.unwrap().unwrap();
        assert_ne!(before.file_hash, after.file_hash);
    }

    async fn chunk_identity_stable(store: &dyn Store) {
        let mut session = store.begin().await.unwrap();
        session.upsert_document(&upsert("d1", "Same text.")).await.unwrap();
        let chunk = draft("d1", "Same text.").identify(0, ChunkVersions::default());
        let first = session.persist_chunk(&chunk).await.unwrap();
        let second = session.persist_chunk(&chunk).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(first, second);
        let stored = store.list_chunks("d1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], chunk);
    }

    async fn versions_change_content_hash(store: &dyn Store) {
        let mut session = store.begin().await.unwrap();
        session.upsert_document(&upsert("d1", "Same text.")).await.unwrap();
        let v1 = session
            .persist_chunk(&draft("d1", "Same text.").identify(0, ChunkVersions::new(1, 1)))
            .await
            .unwrap();
        let v2 = session
            .persist_chunk(&draft("d1", "Same text.").identify(0, ChunkVersions::new(2, 1)))
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(v1.chunk_id, v2.chunk_id);
        assert_ne!(v1.content_hash, v2.content_hash);
        let stored = store.list_chunks("d1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content_hash, v2.content_hash);
    }

    async fn superseded_chunks_pruned(store: &dyn Store) {
        let first = "Kept paragraph.\n\nSECTION\n\nDropped paragraph.";
        ingest(store, "d1", first, ChunkVersions::default()).await;
        let old = store.list_chunks("d1").await.unwrap();
        assert_eq!(old.len(), 2);
        store.upsert_embedding(&embedding(&old[0], "m")).await.unwrap();
        store.upsert_embedding(&embedding(&old[1], "m")).await.unwrap();

        ingest(store, "d1", "Kept paragraph.\n\nSECTION\n\nNew paragraph.", ChunkVersions::default()).await;
        let new = store.list_chunks("d1").await.unwrap();
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].chunk_id, old[0].chunk_id);
        assert_ne!(new[1].chunk_id, old[1].chunk_id);

        // the surviving chunk keeps its vector; only the new one is pending
        let ready = store.chunks_ready_to_embed("m", None).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].chunk_id, new[1].chunk_id);
    }

    async fn readiness_tracks_model_and_version(store: &dyn Store) {
        ingest(store, "d1", "One.\n\nTWO\n\nThree.", ChunkVersions::default()).await;
        let chunks = store.list_chunks("d1").await.unwrap();
        assert_eq!(store.chunks_ready_to_embed("m", None).await.unwrap().len(), 2);
        assert_eq!(store.chunks_ready_to_embed("m", Some(1)).await.unwrap().len(), 1);

        store.upsert_embedding(&embedding(&chunks[0], "m")).await.unwrap();
        let ready = store.chunks_ready_to_embed("m", None).await.unwrap();
        assert_eq!(ready, vec![chunks[1].clone()]);
        assert_eq!(store.chunks_ready_to_embed("other", None).await.unwrap().len(), 2);

        // same text under new versions: identity kept, vector now stale
        let mut session = store.begin().await.unwrap();
        let text = "One.\n\nTWO\n\nThree.";
        let changed_doc = DocumentUpsert {
            normalized_text: "One.\n\nTWO\n\nThree. ",
            ..upsert("d1", text)
        };
        assert!(session.upsert_document(&changed_doc).await.unwrap());
        for chunk in Chunker::new(700, ChunkVersions::new(1, 2)).chunk("d1", text, PageLayout::Unpaged) {
            session.persist_chunk(&chunk).await.unwrap();
        }
        session.commit().await.unwrap();
        assert_eq!(store.chunks_ready_to_embed("m", None).await.unwrap().len(), 2);
    }

    async fn embedding_requires_chunk(store: &dyn Store) {
        let orphan = Embedding {
            chunk_id: "nope:000000000000".into(),
            model: "m".into(),
            dim: 0,
            vector: Vec::new(),
            content_hash: "x".into(),
        };
        assert!(matches!(
            store.upsert_embedding(&orphan).await,
            Err(StoreError::UnknownChunk(_))
        ));
    }

    async fn dropped_session_rolls_back(store: &dyn Store) {
        ingest(store, "d1", "Original.", ChunkVersions::default()).await;
        let before = store.get_document("d1").await.unwrap().unwrap();
        {
            let mut session = store.begin().await.unwrap();
            assert!(session.upsert_document(&upsert("d1", "Replacement.")).await.unwrap());
            session
                .persist_chunk(&draft("d1", "Replacement.").identify(0, ChunkVersions::default()))
                .await
                .unwrap();
            session.prune_chunks("d1", &[]).await.unwrap();
        }
        assert_eq!(store.get_document("d1").await.unwrap().unwrap(), before);
        let chunks = store.list_chunks("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Original.");
    }

    async fn same_text_two_documents(store: &dyn Store) {
        let text = "Shared body.\n\nAPPENDIX\n\nMore shared text.";
        ingest(store, "a", text, ChunkVersions::default()).await;
        ingest(store, "b", text, ChunkVersions::default()).await;

        let a = store.get_document("a").await.unwrap().unwrap();
        let b = store.get_document("b").await.unwrap().unwrap();
        assert_eq!(a.file_hash, b.file_hash);

        let ca = store.list_chunks("a").await.unwrap();
        let cb = store.list_chunks("b").await.unwrap();
        let texts = |cs: &[Chunk]| cs.iter().map(|c| c.text.clone()).collect::<Vec<_>>();
        assert_eq!(texts(&ca), texts(&cb));
        for (x, y) in ca.iter().zip(&cb) {
            assert_ne!(x.chunk_id, y.chunk_id);
            assert_eq!(x.chunk_hash, y.chunk_hash);
        }
    }

    /// Like [`ingest`], but yields between the document write and the
    /// chunk writes so two of these interleave when polled together.
    async fn ingest_yielding(
        store: &dyn Store,
        doc_id: &str,
        text: &str,
    ) -> Result<bool, StoreError> {
        let mut session = store.begin().await?;
        let changed = session.upsert_document(&upsert(doc_id, text)).await?;
        tokio::task::yield_now().await;
        let chunks = Chunker::new(700, ChunkVersions::default()).chunk(doc_id, text, PageLayout::Unpaged);
        for chunk in &chunks {
            session.persist_chunk(chunk).await?;
        }
        session.commit().await?;
        Ok(changed)
    }

    async fn interleaved_sessions_both_commit(store: &dyn Store) {
        let (first, second) = tokio::join!(
            ingest_yielding(store, "d1", "First document body."),
            ingest_yielding(store, "d2", "Second document body."),
        );
        assert!(first.unwrap());
        assert!(second.unwrap());
        assert_eq!(store.list_chunks("d1").await.unwrap().len(), 1);
        assert_eq!(store.list_chunks("d2").await.unwrap().len(), 1);
    }

    async fn title_kept_when_absent(store: &dyn Store) {
        let mut session = store.begin().await.unwrap();
        let titled = DocumentUpsert {
            title: Some("Annual Report"),
            ..upsert("d1", "v1")
        };
        session.upsert_document(&titled).await.unwrap();
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        session.upsert_document(&upsert("d1", "v2")).await.unwrap();
        session.commit().await.unwrap();
        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.title.as_deref(), Some("Annual Report"));
        assert_eq!(store.get_document("missing").await.unwrap(), None);
    }

    macro_rules! backend_tests {
        ($backend:ident, $make:expr) => {
            mod $backend {
                use super::*;

                #[tokio::test]
                async fn unchanged_text_is_noop() {
                    super::unchanged_text_is_noop(&$make).await;
                }
                #[tokio::test]
                async fn one_char_changes_hash() {
                    super::one_char_changes_hash(&$make).await;
                }
                #[tokio::test]
                async fn chunk_identity_stable() {
                    super::chunk_identity_stable(&$make).await;
                }
                #[tokio::test]
                async fn versions_change_content_hash() {
                    super::versions_change_content_hash(&$make).await;
                }
                #[tokio::test]
                async fn superseded_chunks_pruned() {
                    super::superseded_chunks_pruned(&$make).await;
                }
                #[tokio::test]
                async fn readiness_tracks_model_and_version() {
                    super::readiness_tracks_model_and_version(&$make).await;
                }
                #[tokio::test]
                async fn embedding_requires_chunk() {
                    super::embedding_requires_chunk(&$make).await;
                }
                #[tokio::test]
                async fn dropped_session_rolls_back() {
                    super::dropped_session_rolls_back(&$make).await;
                }
                #[tokio::test]
                async fn same_text_two_documents() {
                    super::same_text_two_documents(&$make).await;
                }
                #[tokio::test]
                async fn title_kept_when_absent() {
                    super::title_kept_when_absent(&$make).await;
                }
                #[tokio::test]
                async fn interleaved_sessions_both_commit() {
                    super::interleaved_sessions_both_commit(&$make).await;
                }
            }
        };
    }

    backend_tests!(memory_backend, MemoryStore::new());
    backend_tests!(sqlite_backend, SqliteStore::new(crate::db::memory_pool().await));
}
