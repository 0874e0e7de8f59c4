//! Paragraph-boundary text chunker with page and section tracking.
//!
//! Splits a document's normalized text into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Splitting occurs on paragraph
//! boundaries (`\n\n`); a paragraph longer than the limit is hard-split on
//! the last newline or space before the limit.
//!
//! Form-feed delimited text (PDF output) carries 1-based page numbers onto
//! each chunk. Short numbered or all-caps lines are treated as headings:
//! a heading starts a new chunk and labels the chunks that follow it.
//!
//! Identity comes from [`ChunkDraft::identify`] under the chunker's
//! [`ChunkVersions`]. Identical chunk text within a document is emitted
//! once, at its first position, and indices stay contiguous.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::extract::PageLayout;
use crate::models::{Chunk, ChunkDraft, ChunkVersions};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;
/// Longest line still considered a heading.
const MAX_HEADING_CHARS: usize = 80;

static NUMBERED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*\.?\s+\p{L}").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_tokens: usize,
    versions: ChunkVersions,
}

impl Chunker {
    pub fn new(max_tokens: usize, versions: ChunkVersions) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            versions,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.max_tokens, config.versions())
    }

    pub fn versions(&self) -> ChunkVersions {
        self.versions
    }

    /// Split `text` into chunks with contiguous indices starting at 0.
    /// Text with no non-whitespace content yields no chunks.
    pub fn chunk(&self, doc_id: &str, text: &str, layout: PageLayout) -> Vec<Chunk> {
        let mut acc = Accumulator::new(doc_id, self.max_tokens * CHARS_PER_TOKEN);

        for (page_idx, page_text) in pages(text, layout) {
            let page = page_idx.map(|i| i as u32 + 1);
            for para in page_text.split("\n\n") {
                let trimmed = para.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if is_heading(trimmed) {
                    acc.flush();
                    acc.section = Some(trimmed.to_string());
                }
                acc.push(trimmed, page);
            }
        }
        acc.flush();

        let mut seen = HashSet::new();
        acc.drafts
            .into_iter()
            .map(|draft| draft.identify(0, self.versions))
            .filter(|chunk| seen.insert(chunk.chunk_hash.clone()))
            .enumerate()
            .map(|(index, chunk)| Chunk { index, ..chunk })
            .collect()
    }
}

fn pages(text: &str, layout: PageLayout) -> Vec<(Option<usize>, &str)> {
    match layout {
        PageLayout::FormFeed => text.split('\u{000C}').enumerate().map(|(i, p)| (Some(i), p)).collect(),
        PageLayout::Unpaged => vec![(None, text)],
    }
}

/// Single short line, no terminal punctuation, and either a numbered
/// prefix (`2.1 Scope`) or no lowercase letters (`EXECUTIVE SUMMARY`).
fn is_heading(para: &str) -> bool {
    if para.contains('\n') || para.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    if para.ends_with(['.', ',', ';', ':', '!', '?']) {
        return false;
    }
    if NUMBERED_HEADING.is_match(para) {
        return true;
    }
    para.chars().any(char::is_alphabetic) && !para.chars().any(char::is_lowercase)
}

struct Accumulator<'a> {
    doc_id: &'a str,
    max_chars: usize,
    section: Option<String>,
    buf: String,
    page_start: Option<u32>,
    page_end: Option<u32>,
    drafts: Vec<ChunkDraft>,
}

impl<'a> Accumulator<'a> {
    fn new(doc_id: &'a str, max_chars: usize) -> Self {
        Self {
            doc_id,
            max_chars,
            section: None,
            buf: String::new(),
            page_start: None,
            page_end: None,
            drafts: Vec::new(),
        }
    }

    fn push(&mut self, para: &str, page: Option<u32>) {
        let would_be = if self.buf.is_empty() {
            para.len()
        } else {
            self.buf.len() + 2 + para.len()
        };
        if would_be > self.max_chars {
            self.flush();
        }

        if para.len() > self.max_chars {
            for piece in hard_split(para, self.max_chars) {
                self.emit(piece.to_string(), page, page);
            }
            return;
        }

        if self.buf.is_empty() {
            self.page_start = page;
        } else {
            self.buf.push_str("\n\n");
        }
        self.buf.push_str(para);
        self.page_end = page;
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buf);
        self.emit(text, self.page_start, self.page_end);
    }

    fn emit(&mut self, text: String, page_start: Option<u32>, page_end: Option<u32>) {
        self.drafts.push(ChunkDraft {
            doc_id: self.doc_id.to_string(),
            text,
            page_start,
            page_end,
            section: self.section.clone(),
        });
    }
}

/// Split at `max_chars` byte boundaries, preferring the last newline or
/// space and never cutting inside a UTF-8 sequence.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = if remaining.len() <= max_chars {
            remaining.len()
        } else {
            let mut at = max_chars;
            while !remaining.is_char_boundary(at) {
                at -= 1;
            }
            if at == 0 {
                // first character alone is wider than the budget
                remaining.chars().next().map_or(remaining.len(), char::len_utf8)
            } else {
                remaining[..at]
                    .rfind(['\n', ' '])
                    .map(|pos| pos + 1)
                    .unwrap_or(at)
            }
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[split_at..];
    }
    pieces
}
