//! Corpus statistics and embedding backlog.
//!
//! `corpus stats` prints document, chunk and embedding counts, per-model
//! embedding coverage, and whether the OCR tools can be spawned.
//! `corpus pending` lists chunks that still need a vector for a model.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::ocr;
use crate::store::{SqliteStore, Store};

/// Per-model embedding coverage.
struct ModelStats {
    model: String,
    embedded: i64,
    stale: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let titled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE title IS NOT NULL")
        .fetch_one(&pool)
        .await?;

    let last_ingest: Option<i64> = sqlx::query_scalar("SELECT MAX(modified_at) FROM documents")
        .fetch_one(&pool)
        .await?;

    let model_rows = sqlx::query(
        r#"
        SELECT
            e.model,
            COUNT(*) AS embedded,
            SUM(CASE WHEN e.content_hash != c.content_hash THEN 1 ELSE 0 END) AS stale
        FROM embeddings e
        JOIN chunks c ON c.chunk_id = e.chunk_id
        GROUP BY e.model
        ORDER BY e.model
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut models = Vec::with_capacity(model_rows.len());
    for row in &model_rows {
        models.push(ModelStats {
            model: row.try_get("model")?,
            embedded: row.try_get("embedded")?,
            stale: row.try_get("stale")?,
        });
    }

    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Corpus — Database Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Uploads:     {}", config.uploads.dir.display());
    println!();
    println!("  Documents:   {} ({} titled)", total_docs, titled);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Last ingest: {}",
        last_ingest.map_or_else(|| "never".to_string(), format_ts_relative)
    );
    println!(
        "  Versions:    tok={} seg={}",
        config.chunking.tok_version, config.chunking.seg_version
    );

    if !models.is_empty() {
        println!();
        println!("  Embeddings by model:");
        println!("  {:<32} {:>10} {:>8} {:>10}", "MODEL", "EMBEDDED", "STALE", "COVERAGE");
        println!("  {}", "-".repeat(64));
        for m in &models {
            let fresh = m.embedded - m.stale;
            println!(
                "  {:<32} {:>10} {:>8} {:>9}%",
                m.model,
                m.embedded,
                m.stale,
                percent(fresh, total_chunks)
            );
        }
    }

    println!();
    println!("  OCR tools:");
    println!(
        "    {:<12} {}",
        config.extraction.pdftoppm_cmd,
        availability(ocr::tool_available(&config.extraction.pdftoppm_cmd, "-v"))
    );
    println!(
        "    {:<12} {}",
        config.extraction.tesseract_cmd,
        availability(ocr::tool_available(&config.extraction.tesseract_cmd, "--version"))
    );
    println!();

    Ok(())
}

/// Run the pending command: list chunks ready to embed for `model`.
pub async fn run_pending(config: &Config, model: &str, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let pending = store.chunks_ready_to_embed(model, limit).await;
    pool.close().await;
    let pending = pending?;

    println!("pending {} ({} chunks)", model, pending.len());
    for chunk in &pending {
        println!("  {}  {}", chunk.chunk_id, chunk.content_hash);
    }
    Ok(())
}

fn availability(ok: bool) -> &'static str {
    if ok {
        "available"
    } else {
        "not found"
    }
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
