//! Document retrieval by ID.
//!
//! Fetches a stored document and its current chunks. Used by `corpus get`.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::{Chunk, Document};
use crate::store::{SqliteStore, Store};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

pub async fn get_document(store: &dyn Store, doc_id: &str) -> Result<DocumentView> {
    let Some(document) = store.get_document(doc_id).await? else {
        bail!("document not found: {}", doc_id);
    };
    let chunks = store.list_chunks(doc_id).await?;
    Ok(DocumentView { document, chunks })
}

/// CLI entry point: fetch and print to stdout.
pub async fn run_get(config: &Config, doc_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let view = get_document(&store, doc_id).await;
    pool.close().await;
    let view = view?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let doc = &view.document;
    println!("--- Document ---");
    println!("doc_id:       {}", doc.doc_id);
    println!(
        "title:        {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("source_path:  {}", doc.source_path);
    println!("file_hash:    {}", doc.file_hash);
    println!("modified_at:  {}", format_ts_iso(doc.modified_at));
    println!();

    println!("--- Chunks ({}) ---", view.chunks.len());
    for chunk in &view.chunks {
        println!("[chunk {}] {}", chunk.index, chunk.chunk_id);
        if let (Some(start), Some(end)) = (chunk.page_start, chunk.page_end) {
            println!("pages: {}-{}", start, end);
        }
        if let Some(ref section) = chunk.section {
            println!("section: {}", section);
        }
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
