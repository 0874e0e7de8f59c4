//! Text extraction for uploaded documents (PDF, DOCX).
//!
//! Produces normalized text in page order. PDF pages are read from the text
//! layer first; a page whose text layer is empty is rasterized and sent
//! through OCR. Pages are joined with [`PAGE_SEPARATOR`] so page boundaries
//! stay locatable, and the joined text is normalized exactly once.
//!
//! DOCX paragraphs are joined with single newlines. Page structure is not
//! carried into the text; the only page information kept is an optional
//! hint marking where the first explicit page break falls, which feeds
//! title resolution.
//!
//! Legacy `.doc` files have no extraction support and yield `Ok(None)`.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use lopdf::Document;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::models::DocumentFormat;
use crate::normalize::normalize_text;
use crate::ocr::{self, OcrEngine, PageRasterizer};
use crate::pdf;

/// Separator placed between page texts in PDF output.
pub const PAGE_SEPARATOR: &str = "\n\n\u{000C}\n\n";
/// Rasterization zoom for OCR (2.0 × 72 DPI = 144 DPI).
pub const DEFAULT_OCR_ZOOM: f32 = 2.0;
/// Upper bound on first-page text gathered as a title hint.
pub const TITLE_HINT_CHARS: usize = 8000;
/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("OCR fallback failed: {0}")]
    Ocr(String),
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction worker failed: {0}")]
    Worker(String),
}

/// How page boundaries are represented in [`Extraction::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    /// Pages separated by a form feed (PDF).
    FormFeed,
    /// No page structure (DOCX).
    Unpaged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub layout: PageLayout,
    /// Normalized first-page text, if any, for title resolution.
    pub title_hint: Option<String>,
    /// 1-based numbers of PDF pages recovered through OCR.
    pub ocr_pages: Vec<u32>,
}

pub struct Extractor {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<dyn OcrEngine>,
    zoom: f32,
}

impl Extractor {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            rasterizer,
            ocr,
            zoom: DEFAULT_OCR_ZOOM,
        }
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        let (rasterizer, ocr) = ocr::from_config(config);
        Self::new(Arc::new(rasterizer), Arc::new(ocr)).with_zoom(config.ocr_zoom)
    }

    /// Extract normalized text. Formats without text support return `Ok(None)`.
    pub fn extract(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<Option<Extraction>, ExtractError> {
        match format {
            DocumentFormat::Pdf => self.extract_pdf(bytes).map(Some),
            DocumentFormat::Docx => extract_docx(bytes).map(Some),
            DocumentFormat::Doc => Ok(None),
        }
    }

    pub fn extract_file(
        &self,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<Option<Extraction>, ExtractError> {
        let bytes = std::fs::read(path)?;
        self.extract(&bytes, format)
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let mut pages = Vec::new();
        let mut ocr_pages = Vec::new();

        for (page_number, page_id) in doc.get_pages() {
            let blocks = pdf::page_blocks(&doc, page_id)?;
            let mut text = pdf::join_blocks(blocks).trim().to_string();
            if text.is_empty() {
                debug!(page = page_number, "no text layer, using OCR");
                let image = self.rasterizer.rasterize(bytes, page_number, self.zoom)?;
                text = self.ocr.recognize(&image)?.trim().to_string();
                ocr_pages.push(page_number);
            }
            pages.push(text);
        }

        info!(
            pages = pages.len(),
            ocr_pages = ocr_pages.len(),
            "extracted pdf"
        );

        let title_hint = pages.first().and_then(|first| title_hint(first));
        Ok(Extraction {
            text: normalize_text(&pages.join(PAGE_SEPARATOR)),
            layout: PageLayout::FormFeed,
            title_hint,
            ocr_pages,
        })
    }
}

fn title_hint(text: &str) -> Option<String> {
    let hint: String = normalize_text(text).chars().take(TITLE_HINT_CHARS).collect();
    let hint = hint.trim();
    (!hint.is_empty()).then(|| hint.to_string())
}

/// Paragraphs of a DOCX body plus where its first explicit page break falls.
#[derive(Debug, Default, PartialEq)]
struct DocxBody {
    paragraphs: Vec<String>,
    /// Index of the paragraph holding the first `<w:br w:type="page"/>`,
    /// `None` when the document has no explicit page break.
    first_page_break: Option<usize>,
}

impl DocxBody {
    /// Paragraphs up to the first page break, or until the character budget
    /// is spent when no break is present.
    fn first_page(&self) -> String {
        let mut parts = Vec::new();
        let mut total = 0usize;
        for (idx, para) in self.paragraphs.iter().enumerate() {
            let trimmed = para.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
                total += trimmed.chars().count();
            }
            if self.first_page_break == Some(idx) || total >= TITLE_HINT_CHARS {
                break;
            }
        }
        parts.join("\n")
    }
}

fn extract_docx(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    let xml = read_document_xml(bytes)?;
    let body = parse_docx_body(&xml)?;
    debug!(
        paragraphs = body.paragraphs.len(),
        page_break = ?body.first_page_break,
        "extracted docx"
    );
    Ok(Extraction {
        text: normalize_text(&body.paragraphs.join("\n")),
        layout: PageLayout::Unpaged,
        title_hint: title_hint(&body.first_page()),
        ocr_pages: Vec::new(),
    })
}

fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    Ok(out)
}

fn is_page_break(e: &BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
    })
}

/// Paragraphs come out in the order they close, so a text box paragraph
/// nested inside `w:txbxContent` precedes the paragraph that anchors it.
fn parse_docx_body(xml: &[u8]) -> Result<DocxBody, ExtractError> {
    let mut body = DocxBody::default();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    // Open paragraphs, innermost last.
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => body.paragraphs.push(String::new()),
                b"tab" => {
                    if let Some(p) = open.last_mut() {
                        p.push('\t');
                    }
                }
                b"br" => {
                    if is_page_break(&e) {
                        if body.first_page_break.is_none() {
                            body.first_page_break = Some(body.paragraphs.len());
                        }
                    } else if let Some(p) = open.last_mut() {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = open.last_mut() {
                    let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    p.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(p) = open.pop() {
                        body.paragraphs.push(p);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(body)
}
