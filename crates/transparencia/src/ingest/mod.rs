//! Upload, processing and read surfaces of the import pipeline.

pub mod orchestrator;
pub mod query;
pub mod response;
pub mod upload;

pub use orchestrator::{determine_format, IngestionOrchestrator};
pub use query::{ImportListFilter, ImportStatusView, QueryService};
pub use response::{ApiResponse, Page};
pub use upload::{UploadOutcome, UploadRequest, UploadService};
