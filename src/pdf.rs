//! Layout-aware text blocks from PDF page content streams.
//!
//! Each `BT … ET` text object on a page becomes one [`TextBlock`], anchored
//! at the device-space origin of its first shown string (`Tm × CTM`). Line
//! moves inside a text object (`Td`, `TD`, `T*`, `'`, `"`, or a `Tm` that
//! changes the baseline) start a new line within the block.
//!
//! The graphics state follows `q`/`Q`/`cm`, and Form XObjects painted with
//! `Do` are walked with their `/Matrix` and `/Resources` applied.
//!
//! Shown strings are decoded through the current font's `/Encoding` or
//! `/ToUnicode` map. Composite (`Type0`) fonts that have no usable mapping
//! yield no text, so a page drawn only with them takes the OCR path in
//! [`crate::extract`]. Strings shown without a resolvable font are read as
//! UTF-16BE (with BOM) or Latin-1.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};
use tracing::debug;

use crate::extract::ExtractError;

/// `TJ` adjustments below this (thousandths of an em) are read as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -200.0;
/// Baseline shift, in device units, that counts as a new line.
const LINE_EPSILON: f64 = 0.5;
/// Forms painting forms deeper than this are skipped.
const MAX_FORM_DEPTH: usize = 8;

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `m × n` for PDF's row-vector matrices.
fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    let [a, b, c, d, e, f] = *m;
    let [na, nb, nc, nd, ne, nf] = *n;
    [
        a * na + b * nc,
        a * nb + b * nd,
        c * na + d * nc,
        c * nb + d * nd,
        e * na + f * nc + ne,
        e * nb + f * nd + nf,
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

/// Decode one page's content stream into text blocks, in stream order.
pub fn page_blocks(doc: &Document, page_id: ObjectId) -> Result<Vec<TextBlock>, ExtractError> {
    let raw = doc
        .get_page_content(page_id)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let content = Content::decode(&raw).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
    let scope = Scope {
        fonts: fonts
            .into_iter()
            .map(|(name, font)| (name, FontDecoder::new(doc, font)))
            .collect(),
        xobjects: page_xobjects(doc, page_id),
        parent: None,
    };

    let mut walker = Walker {
        doc,
        blocks: Vec::new(),
    };
    walker.run(&content.operations, &scope, GraphicsState::default(), 0);
    Ok(walker.blocks)
}

/// Join blocks in reading order: top to bottom, then left to right when
/// two blocks share the same rounded baseline. Empty blocks are dropped and
/// the rest are separated by a blank line.
///
/// Device space grows upward, so "top" is the larger `y`.
pub fn join_blocks(mut blocks: Vec<TextBlock>) -> String {
    blocks.sort_by_key(|b| (hundredths(-b.y), hundredths(b.x)));
    blocks
        .iter()
        .map(|b| b.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn hundredths(v: f64) -> i64 {
    (v * 100.0).round() as i64
}

// ─── Fonts and resources ────────────────────────────────────────────

struct FontDecoder<'a> {
    encoding: Option<Encoding<'a>>,
    composite: bool,
}

impl<'a> FontDecoder<'a> {
    fn new(doc: &Document, font: &'a Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|subtype| subtype == b"Type0");
        let encoding = match font.get_font_encoding(doc) {
            Ok(encoding) => Some(encoding),
            Err(e) => {
                debug!(error = %e, composite, "font has no usable encoding");
                None
            }
        };
        Self {
            encoding,
            composite,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let decoded = self
            .encoding
            .as_ref()
            .map(|encoding| Document::decode_text(encoding, bytes));
        match decoded {
            Some(Ok(text)) => clean(&text),
            _ if self.composite => String::new(),
            _ => decode_raw(bytes),
        }
    }
}

/// Fonts and XObjects visible to a content stream. Forms without their own
/// `/Resources` see their parent's.
struct Scope<'a, 's> {
    fonts: BTreeMap<Vec<u8>, FontDecoder<'a>>,
    xobjects: Vec<&'a Dictionary>,
    parent: Option<&'s Scope<'a, 's>>,
}

impl<'a> Scope<'a, '_> {
    fn font(&self, name: &[u8]) -> Option<&FontDecoder<'a>> {
        self.fonts
            .get(name)
            .or_else(|| self.parent.and_then(|parent| parent.font(name)))
    }

    fn form(&self, doc: &'a Document, name: &[u8]) -> Option<&'a Stream> {
        let own = self.xobjects.iter().copied().find_map(|xobjects| {
            let stream = doc
                .dereference(xobjects.get(name).ok()?)
                .ok()?
                .1
                .as_stream()
                .ok()?;
            let is_form = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|subtype| subtype == b"Form");
            is_form.then_some(stream)
        });
        own.or_else(|| self.parent.and_then(|parent| parent.form(doc, name)))
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    doc.dereference(obj).ok()?.1.as_dict().ok()
}

fn page_xobjects(doc: &Document, page_id: ObjectId) -> Vec<&Dictionary> {
    let Ok((inline, inherited)) = doc.get_page_resources(page_id) else {
        return Vec::new();
    };
    inline
        .into_iter()
        .chain(
            inherited
                .into_iter()
                .filter_map(|id| doc.get_dictionary(id).ok()),
        )
        .filter_map(|resources| resolve_dict(doc, resources.get(b"XObject").ok()?))
        .collect()
}

fn form_scope<'a, 's>(
    doc: &'a Document,
    form: &'a Stream,
    parent: &'s Scope<'a, 's>,
) -> Scope<'a, 's> {
    let Some(resources) = form
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|r| resolve_dict(doc, r))
    else {
        return Scope {
            fonts: BTreeMap::new(),
            xobjects: Vec::new(),
            parent: Some(parent),
        };
    };

    let fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))
        .map(|fonts| {
            fonts
                .iter()
                .filter_map(|(name, font)| {
                    let font = resolve_dict(doc, font)?;
                    Some((name.clone(), FontDecoder::new(doc, font)))
                })
                .collect()
        })
        .unwrap_or_default();
    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|x| resolve_dict(doc, x))
        .into_iter()
        .collect();

    Scope {
        fonts,
        xobjects,
        parent: Some(parent),
    }
}

// ─── Content walking ────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Vec<u8>>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            font: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    tm: Matrix,
    tlm: Matrix,
    leading: f64,
}

impl TextState {
    fn new() -> Self {
        Self {
            tm: IDENTITY,
            tlm: IDENTITY,
            leading: 0.0,
        }
    }

    fn begin(&mut self) {
        self.tm = IDENTITY;
        self.tlm = IDENTITY;
    }

    fn set_matrix(&mut self, m: Matrix) {
        self.tm = m;
        self.tlm = m;
    }

    /// `Tlm = [1 0 0 1 tx ty] × Tlm`, then `Tm = Tlm`.
    fn translate(&mut self, tx: f64, ty: f64) {
        self.tlm = multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.translate(0.0, -self.leading);
    }

    /// Text-space origin mapped into device space.
    fn origin(&self, ctm: &Matrix) -> (f64, f64) {
        let m = multiply(&self.tm, ctm);
        (m[4], m[5])
    }
}

#[derive(Debug, Default)]
struct BlockBuilder {
    origin: Option<(f64, f64)>,
    baseline: f64,
    text: String,
}

impl BlockBuilder {
    fn push(&mut self, (x, y): (f64, f64), fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        match self.origin {
            None => {
                self.origin = Some((x, y));
                self.baseline = y;
            }
            Some(_) if (y - self.baseline).abs() > LINE_EPSILON => {
                self.text.push('\n');
                self.baseline = y;
            }
            Some(_) => {}
        }
        self.text.push_str(fragment);
    }

    fn push_gap(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with([' ', '\n']) {
            self.text.push(' ');
        }
    }

    fn finish(self) -> Option<TextBlock> {
        let (x, y) = self.origin?;
        Some(TextBlock {
            x,
            y,
            text: self.text,
        })
    }
}

struct Walker<'a> {
    doc: &'a Document,
    blocks: Vec<TextBlock>,
}

impl<'a> Walker<'a> {
    fn run(
        &mut self,
        ops: &[Operation],
        scope: &Scope<'a, '_>,
        mut gs: GraphicsState,
        depth: usize,
    ) {
        let mut saved = Vec::new();
        let mut state = TextState::new();
        let mut current: Option<BlockBuilder> = None;

        for op in ops {
            let operands = &op.operands;
            match op.operator.as_str() {
                "q" => saved.push(gs.clone()),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        gs = previous;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix(operands) {
                        gs.ctm = multiply(&m, &gs.ctm);
                    }
                }
                "Do" => {
                    if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                        self.paint_form(name, scope, &gs, depth);
                    }
                }
                "BT" => {
                    state.begin();
                    current = Some(BlockBuilder::default());
                }
                "ET" => {
                    if let Some(block) = current.take().and_then(BlockBuilder::finish) {
                        self.blocks.push(block);
                    }
                }
                "Tf" => {
                    gs.font = operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .map(<[u8]>::to_vec);
                }
                "Tm" => {
                    if let Some(m) = matrix(operands) {
                        state.set_matrix(m);
                    }
                }
                "Td" => {
                    if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                        state.translate(tx, ty);
                    }
                }
                "TD" => {
                    if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                        state.leading = -ty;
                        state.translate(tx, ty);
                    }
                }
                "TL" => {
                    if let Some(leading) = number(operands, 0) {
                        state.leading = leading;
                    }
                }
                "T*" => state.next_line(),
                "Tj" | "'" | "\"" | "TJ" => {
                    if op.operator != "Tj" && op.operator != "TJ" {
                        state.next_line();
                    }
                    let operand = if op.operator == "\"" {
                        operands.get(2)
                    } else {
                        operands.first()
                    };
                    let (Some(block), Some(operand)) = (current.as_mut(), operand) else {
                        continue;
                    };
                    let font = gs.font.as_deref().and_then(|name| scope.font(name));
                    show(block, state.origin(&gs.ctm), font, operand);
                }
                _ => {}
            }
        }
    }

    fn paint_form(
        &mut self,
        name: &[u8],
        scope: &Scope<'a, '_>,
        gs: &GraphicsState,
        depth: usize,
    ) {
        if depth >= MAX_FORM_DEPTH {
            debug!(depth, "form nesting too deep, skipping");
            return;
        }
        let Some(form) = scope.form(self.doc, name) else {
            return;
        };
        let data = form
            .get_plain_content()
            .unwrap_or_else(|_| form.content.clone());
        let content = match Content::decode(&data) {
            Ok(content) => content,
            Err(e) => {
                debug!(error = %e, "unreadable form content, skipping");
                return;
            }
        };
        let form_matrix = form
            .dict
            .get(b"Matrix")
            .and_then(Object::as_array)
            .ok()
            .and_then(|m| matrix(m))
            .unwrap_or(IDENTITY);

        let child = form_scope(self.doc, form, scope);
        let inner = GraphicsState {
            ctm: multiply(&form_matrix, &gs.ctm),
            font: gs.font.clone(),
        };
        self.run(&content.operations, &child, inner, depth + 1);
    }
}

/// Append a `Tj`-style string or a `TJ` array to the block.
fn show(
    block: &mut BlockBuilder,
    origin: (f64, f64),
    font: Option<&FontDecoder<'_>>,
    operand: &Object,
) {
    let decode = |bytes: &[u8]| match font {
        Some(font) => font.decode(bytes),
        None => decode_raw(bytes),
    };
    match operand {
        Object::String(bytes, _) => block.push(origin, &decode(bytes)),
        Object::Array(items) => {
            for item in items {
                match item {
                    Object::String(bytes, _) => block.push(origin, &decode(bytes)),
                    other => {
                        if object_number(other).is_some_and(|n| n < TJ_SPACE_THRESHOLD) {
                            block.push_gap();
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn object_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn number(operands: &[Object], idx: usize) -> Option<f64> {
    operands.get(idx).and_then(object_number)
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    let mut m = [0.0; 6];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = number(operands, i)?;
    }
    Some(m)
}

/// Font-less decoding: UTF-16BE behind a BOM, Latin-1 otherwise.
fn decode_raw(bytes: &[u8]) -> String {
    let decoded = if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };
    clean(&decoded)
}

fn clean(text: &str) -> String {
    text.chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect()
}
