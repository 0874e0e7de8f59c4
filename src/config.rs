use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ChunkVersions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub title: TitleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/corpus_raw")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_version")]
    pub tok_version: u32,
    #[serde(default = "default_version")]
    pub seg_version: u32,
}

impl ChunkingConfig {
    pub fn versions(&self) -> ChunkVersions {
        ChunkVersions::new(self.tok_version, self.seg_version)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tok_version: default_version(),
            seg_version: default_version(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_ocr_zoom")]
    pub ocr_zoom: f32,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_cmd: String,
    #[serde(default = "default_tesseract")]
    pub tesseract_cmd: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_zoom: default_ocr_zoom(),
            pdftoppm_cmd: default_pdftoppm(),
            tesseract_cmd: default_tesseract(),
            ocr_language: default_ocr_language(),
        }
    }
}

fn default_ocr_zoom() -> f32 {
    crate::extract::DEFAULT_OCR_ZOOM
}
fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}
fn default_tesseract() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TitleConfig {
    #[serde(default = "default_title_provider")]
    pub provider: String,
    #[serde(default = "default_title_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            provider: default_title_provider(),
            model: default_title_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_chars: default_max_chars(),
        }
    }
}

impl TitleConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_title_provider() -> String {
    "openai".to_string()
}
fn default_title_model() -> String {
    "gpt-5".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_chars() -> usize {
    crate::extract::TITLE_HINT_CHARS
}

impl Config {
    /// Defaults for everything except the database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            uploads: UploadsConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            title: TitleConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if !(config.extraction.ocr_zoom > 0.0) {
        anyhow::bail!("extraction.ocr_zoom must be > 0");
    }

    if config.title.max_chars == 0 {
        anyhow::bail!("title.max_chars must be > 0");
    }

    match config.title.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown title provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
