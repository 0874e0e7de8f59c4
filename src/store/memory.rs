//! In-memory [`Store`] implementation for tests and embedding callers.
//!
//! A session holds the store's lock for its whole lifetime and works on a
//! copy of the state; commit swaps the copy in. Dropping the session leaves
//! the shared state untouched.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::models::{Chunk, ChunkKey, Document, DocumentUpsert, Embedding};

use super::{IngestSession, Store, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    /// Keyed by `chunk_id`.
    chunks: HashMap<String, Chunk>,
    /// Keyed by `(chunk_id, model)`.
    embeddings: HashMap<(String, String), Embedding>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by(|a, b| a.doc_id.cmp(&b.doc_id).then(a.index.cmp(&b.index)));
    chunks
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn IngestSession + 'a>, StoreError> {
        let guard = self.state.lock().await;
        let working = guard.clone();
        Ok(Box::new(MemorySession { guard, working }))
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.state.lock().await.documents.get(doc_id).cloned())
    }

    async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted(
            state
                .chunks
                .values()
                .filter(|c| c.doc_id == doc_id)
                .cloned()
                .collect(),
        ))
    }

    async fn chunks_ready_to_embed(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.lock().await;
        let pending = state
            .chunks
            .values()
            .filter(|c| {
                state
                    .embeddings
                    .get(&(c.chunk_id.clone(), model.to_string()))
                    .map_or(true, |e| e.content_hash != c.content_hash)
            })
            .cloned()
            .collect();
        let mut pending = sorted(pending);
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.chunks.contains_key(&embedding.chunk_id) {
            return Err(StoreError::UnknownChunk(embedding.chunk_id.clone()));
        }
        state.embeddings.insert(
            (embedding.chunk_id.clone(), embedding.model.clone()),
            embedding.clone(),
        );
        Ok(())
    }
}

struct MemorySession<'a> {
    guard: MutexGuard<'a, MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl<'a> IngestSession for MemorySession<'a> {
    async fn upsert_document(&mut self, doc: &DocumentUpsert<'_>) -> Result<bool, StoreError> {
        let file_hash = doc.file_hash();
        let previous = self.working.documents.get(doc.doc_id);
        if previous.is_some_and(|d| d.file_hash == file_hash) {
            return Ok(false);
        }

        let title = doc
            .title
            .map(str::to_string)
            .or_else(|| previous.and_then(|d| d.title.clone()));
        self.working.documents.insert(
            doc.doc_id.to_string(),
            Document {
                doc_id: doc.doc_id.to_string(),
                source_path: doc.source_path.to_string(),
                title,
                file_hash,
                modified_at: doc.modified_at,
            },
        );
        Ok(true)
    }

    async fn persist_chunk(&mut self, chunk: &Chunk) -> Result<ChunkKey, StoreError> {
        if !self.working.documents.contains_key(&chunk.doc_id) {
            return Err(StoreError::UnknownDocument(chunk.doc_id.clone()));
        }
        self.working
            .chunks
            .insert(chunk.chunk_id.clone(), chunk.clone());
        Ok(ChunkKey {
            chunk_id: chunk.chunk_id.clone(),
            content_hash: chunk.content_hash.clone(),
        })
    }

    async fn prune_chunks(&mut self, doc_id: &str, keep: &[String]) -> Result<u64, StoreError> {
        let before = self.working.chunks.len();
        self.working
            .chunks
            .retain(|id, c| c.doc_id != doc_id || keep.contains(id));
        let chunks = &self.working.chunks;
        self.working
            .embeddings
            .retain(|(chunk_id, _), _| chunks.contains_key(chunk_id));
        Ok((before - self.working.chunks.len()) as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
