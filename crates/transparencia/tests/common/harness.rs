//! Test harness for isolated test execution.
//!
//! The `TestHarness` owns a temporary directory holding the upload storage
//! root, an input directory for batch imports and an in-memory database, and
//! wires the upload and query services over them.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use transparencia::config::{Config, DEFAULT_MAX_UPLOAD_BYTES};
use transparencia::db::contract_repo;
use transparencia::processor::{OcrEngine, ProcessorRegistry, TextLayer};
use transparencia::{
    ContractRecord, Database, FileStorage, IngestionOrchestrator, QueryService, UploadOutcome,
    UploadRequest, UploadService,
};

pub struct TestHarness {
    /// Keeps the temp directory alive for the harness lifetime.
    temp_dir: TempDir,
    pub storage_dir: PathBuf,
    pub input_dir: PathBuf,
    pub config: Config,
    pub db: Database,
    pub orchestrator: IngestionOrchestrator,
}

impl TestHarness {
    /// A harness with OCR disabled and the lopdf text layer.
    pub fn new() -> Self {
        let config = Self::test_config();
        let registry = ProcessorRegistry::new(&config);
        Self::build(config, registry)
    }

    /// A harness whose PDF processing uses the given backends.
    pub fn with_pdf_backends(
        text_layer: Arc<dyn TextLayer>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        let config = Self::test_config();
        let registry = ProcessorRegistry::new(&config).with_pdf_backends(text_layer, ocr);
        Self::build(config, registry)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.ocr.enabled = false;
        config.worker_count = 2;
        config
    }

    fn build(mut config: Config, registry: ProcessorRegistry) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("storage");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input directory");
        config.storage_directory = storage_dir.to_string_lossy().to_string();

        let db = Database::open_in_memory().expect("Failed to open database");
        let orchestrator = IngestionOrchestrator::new(db.clone(), Arc::new(registry));

        Self {
            temp_dir,
            storage_dir,
            input_dir,
            config,
            db,
            orchestrator,
        }
    }

    pub fn uploads(&self) -> UploadService {
        UploadService::new(
            self.orchestrator.clone(),
            FileStorage::new(&self.storage_dir),
            DEFAULT_MAX_UPLOAD_BYTES,
        )
    }

    pub fn queries(&self) -> QueryService {
        QueryService::new(
            self.db.clone(),
            FileStorage::new(&self.storage_dir),
            self.config.pagination.clone(),
        )
    }

    /// Uploads and processes one file.
    pub fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        diretoria: Option<&str>,
    ) -> transparencia::Result<UploadOutcome> {
        self.uploads().upload(
            UploadRequest::new(filename, bytes).with_diretoria(diretoria.map(str::to_string)),
        )
    }

    /// Writes a file into the input directory.
    pub fn write_input(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.input_dir.join(name);
        std::fs::write(&path, bytes).expect("Failed to write input file");
        path
    }

    /// Every stored record of an import, in insertion order.
    pub fn records(&self, import_id: &str) -> Vec<ContractRecord> {
        contract_repo::list_by_import(&self.db, import_id, 1, 10_000)
            .expect("Failed to list records")
            .0
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
