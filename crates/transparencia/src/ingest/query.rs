use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PaginationConfig;
use crate::db::import_repo::ImportFilter;
use crate::db::{contract_repo, import_repo, Database};
use crate::error::{Result, TransparenciaError};
use crate::ingest::response::Page;
use crate::model::{ContractRecord, FileFormat, ImportCounts, ImportJob, ImportStatus};
use crate::reconcile::reconcile;
use crate::storage::FileStorage;

/// Current state of an import job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportStatusView {
    pub id: String,
    pub original_filename: String,
    pub format: FileFormat,
    pub status: ImportStatus,
    #[serde(flatten)]
    pub counts: ImportCounts,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ImportJob> for ImportStatusView {
    fn from(job: &ImportJob) -> Self {
        Self {
            id: job.id.clone(),
            original_filename: job.original_filename.clone(),
            format: job.format,
            status: job.status,
            counts: job.counts,
            success_rate: job.success_rate(),
            error_message: job.error_message.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportListFilter {
    pub status: Option<ImportStatus>,
    pub format: Option<FileFormat>,
    pub user_id: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Read side of the pipeline: job status, records and job housekeeping.
pub struct QueryService {
    db: Database,
    storage: FileStorage,
    pagination: PaginationConfig,
}

impl QueryService {
    pub fn new(db: Database, storage: FileStorage, pagination: PaginationConfig) -> Self {
        Self {
            db,
            storage,
            pagination,
        }
    }

    fn find_import(&self, id: &str) -> Result<ImportJob> {
        import_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| TransparenciaError::ImportNotFound(id.to_string()))
    }

    pub fn import_status(&self, id: &str) -> Result<ImportStatusView> {
        Ok(ImportStatusView::from(&self.find_import(id)?))
    }

    /// An import's records as stored, in insertion order.
    pub fn import_contracts(
        &self,
        id: &str,
        page: u64,
        per_page: Option<u64>,
    ) -> Result<Page<ContractRecord>> {
        self.find_import(id)?;
        let per_page = per_page.unwrap_or(self.pagination.contracts_per_page);
        let (records, total) = contract_repo::list_by_import(&self.db, id, page, per_page)?;
        Ok(Page::new(records, total, page, per_page))
    }

    /// Imports, newest first.
    pub fn list_imports(&self, filter: &ImportListFilter) -> Result<Page<ImportJob>> {
        let page = filter.page.unwrap_or(1).max(1);
        let per_page = filter
            .per_page
            .unwrap_or(self.pagination.imports_per_page)
            .max(1);

        let (jobs, total) = import_repo::query(
            &self.db,
            &ImportFilter {
                status: filter.status,
                format: filter.format,
                user_id: filter.user_id.clone(),
                limit: Some(per_page),
                offset: Some(page.saturating_sub(1).saturating_mul(per_page)),
            },
        )?;
        Ok(Page::new(jobs, total, page, per_page))
    }

    /// Deletes an import, its records and its stored source file.
    pub fn delete_import(&self, id: &str) -> Result<()> {
        let job = self.find_import(id)?;
        if !import_repo::delete(&self.db, id)? {
            return Err(TransparenciaError::ImportNotFound(id.to_string()));
        }
        self.storage.remove(&job.file_path)?;
        tracing::info!(import_id = id, file = %job.original_filename, "Import deleted");
        Ok(())
    }

    /// A stored contract with empty fields recovered from its raw data.
    pub fn contract_view(&self, contract_id: i64) -> Result<ContractRecord> {
        let record = contract_repo::find_by_id(&self.db, contract_id)?
            .ok_or(TransparenciaError::ContractNotFound(contract_id))?;
        Ok(reconcile(&record))
    }
}
