//! OCR fallback capabilities: page rasterization and text recognition.
//!
//! Both steps are traits so the extractor can be driven by in-process fakes
//! in tests. The default implementations shell out to poppler's `pdftoppm`
//! and to `tesseract`, staging files in a private temporary directory that
//! is removed on every exit path.

use std::fs;
use std::process::{Command, Output};

use tracing::debug;

use crate::config::ExtractionConfig;
use crate::extract::ExtractError;

/// Resolution that a zoom factor of 1.0 corresponds to.
pub const BASE_DPI: f32 = 72.0;

/// Renders a single PDF page to a PNG image.
pub trait PageRasterizer: Send + Sync {
    /// `page_number` is 1-based. `zoom` scales [`BASE_DPI`].
    fn rasterize(&self, pdf: &[u8], page_number: u32, zoom: f32) -> Result<Vec<u8>, ExtractError>;
}

/// Recognizes text in a PNG image.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, png: &[u8]) -> Result<String, ExtractError>;
}

/// [`PageRasterizer`] backed by the `pdftoppm` command.
pub struct PdftoppmRasterizer {
    cmd: String,
}

impl PdftoppmRasterizer {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf: &[u8], page_number: u32, zoom: f32) -> Result<Vec<u8>, ExtractError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.pdf");
        let prefix = dir.path().join("page");
        fs::write(&input, pdf)?;

        let dpi = (BASE_DPI * zoom).round() as u32;
        let page = page_number.to_string();
        debug!(page = page_number, dpi, "rasterizing page");
        run(
            Command::new(&self.cmd)
                .args(["-f", &page, "-l", &page])
                .args(["-r", &dpi.to_string()])
                .args(["-png", "-singlefile"])
                .arg(&input)
                .arg(&prefix),
            &self.cmd,
        )?;

        Ok(fs::read(prefix.with_extension("png"))?)
    }
}

/// [`OcrEngine`] backed by the `tesseract` command.
pub struct TesseractOcr {
    cmd: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(cmd: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            language: language.into(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, png: &[u8]) -> Result<String, ExtractError> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("page.png");
        fs::write(&image, png)?;

        let output = run(
            Command::new(&self.cmd)
                .arg(&image)
                .arg("stdout")
                .args(["-l", &self.language]),
            &self.cmd,
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build the subprocess-backed pair from configuration.
pub fn from_config(config: &ExtractionConfig) -> (PdftoppmRasterizer, TesseractOcr) {
    (
        PdftoppmRasterizer::new(&config.pdftoppm_cmd),
        TesseractOcr::new(&config.tesseract_cmd, &config.ocr_language),
    )
}

/// Whether `cmd` can be spawned at all (used by `corpus stats`).
pub fn tool_available(cmd: &str, version_flag: &str) -> bool {
    Command::new(cmd)
        .arg(version_flag)
        .output()
        .map(|o| o.status.success() || !o.stderr.is_empty())
        .unwrap_or(false)
}

fn run(cmd: &mut Command, tool: &str) -> Result<Output, ExtractError> {
    let output = cmd
        .output()
        .map_err(|e| ExtractError::Ocr(format!("{} is unavailable: {}", tool, e)))?;
    if !output.status.success() {
        return Err(ExtractError::Ocr(format!(
            "{} exited with {}: {}",
            tool,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}
