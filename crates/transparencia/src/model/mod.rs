pub mod contract;
pub mod import;

pub use contract::{ContractRecord, ContractStatus, ExtractionMethod};
pub use import::{FileFormat, ImportCounts, ImportJob, ImportMetadata, ImportStatus};
