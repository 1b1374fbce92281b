use crate::model::{ImportCounts, ImportJob, ImportStatus};

/// A stored import job queued for processing.
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub import_id: String,
    /// Caller-supplied directorate, used after the row and upload values.
    pub fallback_directorate: Option<String>,
}

impl ImportTask {
    pub fn new(import_id: impl Into<String>) -> Self {
        Self {
            import_id: import_id.into(),
            fallback_directorate: None,
        }
    }

    pub fn with_fallback(mut self, directorate: Option<String>) -> Self {
        self.fallback_directorate = directorate;
        self
    }
}

/// Terminal state of a processed task.
#[derive(Debug, Clone)]
pub struct ImportTaskResult {
    pub import_id: String,
    pub status: ImportStatus,
    pub counts: ImportCounts,
    pub error: Option<String>,
}

impl ImportTaskResult {
    pub fn from_job(job: &ImportJob, error: Option<String>) -> Self {
        Self {
            import_id: job.id.clone(),
            status: job.status,
            counts: job.counts,
            error: error.or_else(|| job.error_message.clone()),
        }
    }

    /// The job could not be loaded or started at all.
    pub fn failure(task: &ImportTask, error: String) -> Self {
        Self {
            import_id: task.import_id.clone(),
            status: ImportStatus::Failed,
            counts: ImportCounts::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ImportStatus::Completed
    }
}
