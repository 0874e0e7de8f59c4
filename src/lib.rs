//! # Corpus Ingest
//!
//! Document ingestion with layout-aware text extraction, per-page OCR
//! fallback, and content-addressed change detection.
//!
//! Uploaded PDF and DOCX files are reduced to normalized text. The text's
//! digest decides whether anything downstream has to run at all; when it
//! does, the text is split into chunks whose identities are derived from
//! their content, so unchanged chunks keep their ids (and their
//! embeddings) across re-ingestion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │  Upload  │──▶│  Extract   │──▶│ Normalize │──▶│  Store   │
//! │   gate   │   │ text / OCR │   │  + hash   │   │ changed? │
//! └──────────┘   └────────────┘   └───────────┘   └────┬─────┘
//!                                                      │ yes
//!                                                      ▼
//!                                     ┌───────────────────────────┐
//!                                     │ Chunk + persist + prune   │
//!                                     │ (one transaction)         │
//!                                     └───────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpus init                      # create database
//! corpus add ./reports/q3.pdf      # ingest a document
//! corpus reingest <doc_id>         # re-run change detection
//! corpus pending --model m         # chunks ready to embed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hashing`] | SHA-256 digests and chunk identity |
//! | [`normalize`] | Text canonicalization |
//! | [`pdf`] | Text blocks from PDF content streams |
//! | [`ocr`] | Page rasterization and OCR capabilities |
//! | [`extract`] | Format dispatch and per-page extraction strategy |
//! | [`chunk`] | Versioned paragraph chunking |
//! | [`models`] | Core data types |
//! | [`store`] | Change-detection storage (SQLite, in-memory) |
//! | [`title`] | Title resolution |
//! | [`upload`] | Upload gate and raw file storage |
//! | [`ingest`] | Pipeline orchestration |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod get;
pub mod hashing;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod stats;
pub mod store;
pub mod title;
pub mod upload;
