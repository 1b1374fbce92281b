pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod processor;
pub mod reconcile;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, ProcessError, Result, RowError, StorageError, TransparenciaError, ValidationError,
    WorkerError,
};
pub use ingest::{
    determine_format, ApiResponse, ImportListFilter, IngestionOrchestrator, QueryService,
    UploadOutcome, UploadRequest, UploadService,
};
pub use model::{ContractRecord, ContractStatus, FileFormat, ImportJob, ImportStatus};
pub use processor::{FormatProcessor, ProcessorRegistry};
pub use reconcile::{backfill_contracts, reconcile, NormalizedKeyMap};
pub use storage::FileStorage;
