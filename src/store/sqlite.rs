//! SQLite-backed [`Store`] implementation.
//!
//! Each [`IngestSession`] owns one `sqlx` transaction opened with
//! `BEGIN IMMEDIATE`, so the write lock is taken up front instead of on the
//! first write. Sessions on one store also hold an async mutex for their
//! whole lifetime. Dropping the session without
//! [`commit`](IngestSession::commit) rolls the transaction back.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::models::{Chunk, ChunkKey, Document, DocumentUpsert, Embedding};

use super::{IngestSession, Store, StoreError};

const CHUNK_COLUMNS: &str =
    "c.chunk_id, c.doc_id, c.chunk_index, c.page_start, c.page_end, c.section, c.text, c.chunk_hash, c.content_hash";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, sqlx::Error> {
    let index: i64 = row.try_get("chunk_index")?;
    let page_start: Option<i64> = row.try_get("page_start")?;
    let page_end: Option<i64> = row.try_get("page_end")?;
    Ok(Chunk {
        chunk_id: row.try_get("chunk_id")?,
        doc_id: row.try_get("doc_id")?,
        index: index as usize,
        page_start: page_start.map(|p| p as u32),
        page_end: page_end.map(|p| p as u32),
        section: row.try_get("section")?,
        text: row.try_get("text")?,
        chunk_hash: row.try_get("chunk_hash")?,
        content_hash: row.try_get("content_hash")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn IngestSession + 'a>, StoreError> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteSession { tx, _guard: guard }))
    }

    async fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT doc_id, source_path, title, file_hash, modified_at FROM documents WHERE doc_id = ?",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Document {
            doc_id: row.try_get("doc_id")?,
            source_path: row.try_get("source_path")?,
            title: row.try_get("title")?,
            file_hash: row.try_get("file_hash")?,
            modified_at: row.try_get("modified_at")?,
        }))
    }

    async fn list_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks c WHERE c.doc_id = ? ORDER BY c.chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(chunk_from_row).collect::<Result<_, _>>()?)
    }

    async fn chunks_ready_to_embed(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>, StoreError> {
        // LIMIT -1 is unbounded in SQLite
        let limit = limit.map_or(-1, |l| l as i64);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.chunk_id AND e.model = ?
            WHERE e.chunk_id IS NULL OR e.content_hash != c.content_hash
            ORDER BY c.doc_id ASC, c.chunk_index ASC
            LIMIT ?
            "#,
            CHUNK_COLUMNS
        ))
        .bind(model)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(chunk_from_row).collect::<Result<_, _>>()?)
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE chunk_id = ?")
            .bind(&embedding.chunk_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(StoreError::UnknownChunk(embedding.chunk_id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dim, vector, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id, model) DO UPDATE SET
                dim = excluded.dim,
                vector = excluded.vector,
                content_hash = excluded.content_hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(&embedding.chunk_id)
        .bind(&embedding.model)
        .bind(embedding.dim as i64)
        .bind(&embedding.vector)
        .bind(&embedding.content_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

struct SqliteSession<'a> {
    tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

#[async_trait]
impl IngestSession for SqliteSession<'_> {
    async fn upsert_document(&mut self, doc: &DocumentUpsert<'_>) -> Result<bool, StoreError> {
        let file_hash = doc.file_hash();

        let existing: Option<String> =
            sqlx::query_scalar("SELECT file_hash FROM documents WHERE doc_id = ?")
                .bind(doc.doc_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        if existing.as_deref() == Some(file_hash.as_str()) {
            return Ok(false);
        }

        // ON CONFLICT keeps the row in place so foreign keys from chunks hold
        sqlx::query(
            r#"
            INSERT INTO documents (doc_id, source_path, title, file_hash, modified_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                source_path = excluded.source_path,
                title = COALESCE(excluded.title, documents.title),
                file_hash = excluded.file_hash,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(doc.doc_id)
        .bind(doc.source_path)
        .bind(doc.title)
        .bind(&file_hash)
        .bind(doc.modified_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(true)
    }

    async fn persist_chunk(&mut self, chunk: &Chunk) -> Result<ChunkKey, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, doc_id, chunk_index, page_start, page_end, section,
                                chunk_hash, content_hash, text)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                chunk_index = excluded.chunk_index,
                page_start = excluded.page_start,
                page_end = excluded.page_end,
                section = excluded.section,
                chunk_hash = excluded.chunk_hash,
                content_hash = excluded.content_hash,
                text = excluded.text
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.doc_id)
        .bind(chunk.index as i64)
        .bind(chunk.page_start.map(i64::from))
        .bind(chunk.page_end.map(i64::from))
        .bind(&chunk.section)
        .bind(&chunk.chunk_hash)
        .bind(&chunk.content_hash)
        .bind(&chunk.text)
        .execute(&mut *self.tx)
        .await?;

        Ok(ChunkKey {
            chunk_id: chunk.chunk_id.clone(),
            content_hash: chunk.content_hash.clone(),
        })
    }

    async fn prune_chunks(&mut self, doc_id: &str, keep: &[String]) -> Result<u64, StoreError> {
        let keep_clause = if keep.is_empty() {
            String::new()
        } else {
            format!(" AND chunk_id NOT IN ({})", vec!["?"; keep.len()].join(", "))
        };

        let sql = format!(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT chunk_id FROM chunks WHERE doc_id = ?{})",
            keep_clause
        );
        let mut query = sqlx::query(&sql).bind(doc_id);
        for id in keep {
            query = query.bind(id);
        }
        query.execute(&mut *self.tx).await?;

        let sql = format!("DELETE FROM chunks WHERE doc_id = ?{}", keep_clause);
        let mut query = sqlx::query(&sql).bind(doc_id);
        for id in keep {
            query = query.bind(id);
        }
        let result = query.execute(&mut *self.tx).await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
