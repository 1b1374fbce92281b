use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_storage_directory")]
    pub storage_directory: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            storage_directory: default_storage_directory(),
            database_path: default_database_path(),
            max_upload_bytes: default_max_upload_bytes(),
            worker_count: default_worker_count(),
            ocr: OcrConfig::default(),
            pdf: PdfConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }
}

impl Config {
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_directory)
    }

    pub fn database_file(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }
}

fn data_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".transparencia")
}

fn default_storage_directory() -> String {
    data_home().join("storage").to_string_lossy().to_string()
}

fn default_database_path() -> String {
    data_home()
        .join("data")
        .join("transparencia.db")
        .to_string_lossy()
        .to_string()
}

/// 20 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Text layers shorter than this (after trimming) are re-read with OCR.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["por".to_string()]
}

fn default_dpi() -> u32 {
    300
}

fn default_min_text_chars() -> usize {
    50
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: default_dpi(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Contracting party used when a PDF section has no `CONTRATANTE:` line.
    #[serde(default)]
    pub default_contratante: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_contracts_per_page")]
    pub contracts_per_page: u64,
    #[serde(default = "default_imports_per_page")]
    pub imports_per_page: u64,
}

fn default_contracts_per_page() -> u64 {
    50
}

fn default_imports_per_page() -> u64 {
    15
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            contracts_per_page: default_contracts_per_page(),
            imports_per_page: default_imports_per_page(),
        }
    }
}
