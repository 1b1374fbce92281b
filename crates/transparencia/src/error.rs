use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ImportStatus;

#[derive(Error, Debug)]
pub enum TransparenciaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Import job error: {0}")]
    JobState(#[from] JobStateError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Import '{0}' not found")]
    ImportNotFound(String),

    #[error("Contract {0} not found")]
    ContractNotFound(i64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Upload rejected before anything was stored. Messages are keyed by the
/// offending request field (`file`, `diretoria`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", summarize(.errors))]
pub struct ValidationError {
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut error = Self::new();
        error.add(field, message);
        error
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(errors: &BTreeMap<String, Vec<String>>) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Whole-file failures. Any of these marks the import job as failed.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Tipo de arquivo não suportado: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process CSV: {0}")]
    CsvProcessing(String),

    #[error("Failed to process Excel workbook: {0}")]
    ExcelProcessing(String),

    #[error("Failed to process XML: {0}")]
    XmlProcessing(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    #[error("Database error during processing: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Failure of a single row or PDF section. Counted and logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("missing contract number")]
    MissingContractNumber,

    #[error("invalid value for '{field}': '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("no contract fields found in section")]
    EmptySection,

    #[error("failed to persist record: {0}")]
    Persist(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid import status transition from '{from}' to '{to}'")]
pub struct JobStateError {
    pub from: ImportStatus,
    pub to: ImportStatus,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Import job failed: {0}")]
    JobFailed(String),
}

pub type Result<T> = std::result::Result<T, TransparenciaError>;
