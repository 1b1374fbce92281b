//! Import job: one uploaded file and its processing lifecycle.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Excel,
    Xml,
    Pdf,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xls" => Some(Self::Excel),
            "xml" => Some(Self::Xml),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::Xml => "xml",
            Self::Pdf => "pdf",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(Self::Csv),
            "excel" => Some(Self::Excel),
            "xml" => Some(Self::Xml),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal edges: pending -> processing -> {completed, failed}.
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record counters aggregated while a file is processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

impl ImportCounts {
    pub fn record_success(&mut self) {
        self.processed += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportMetadata {
    pub file_size: u64,
    pub mime_type: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diretoria: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: PathBuf,
    pub format: FileFormat,
    pub status: ImportStatus,
    pub counts: ImportCounts,
    pub error_message: Option<String>,
    pub metadata: ImportMetadata,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    /// A freshly uploaded job in `pending` state.
    pub fn new(
        original_filename: impl Into<String>,
        stored_path: &Path,
        format: FileFormat,
        metadata: ImportMetadata,
    ) -> Self {
        let now = Utc::now();
        let stored_filename = stored_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_filename: original_filename.into(),
            stored_filename,
            file_path: stored_path.to_path_buf(),
            format,
            status: ImportStatus::Pending,
            counts: ImportCounts::default(),
            error_message: None,
            metadata,
            user_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn mark_started(&mut self) -> Result<(), JobStateError> {
        self.transition(ImportStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), JobStateError> {
        self.transition(ImportStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), JobStateError> {
        self.transition(ImportStatus::Failed)?;
        let message = message.into();
        self.error_message = Some(if message.trim().is_empty() {
            "Erro desconhecido".to_string()
        } else {
            message
        });
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    fn transition(&mut self, next: ImportStatus) -> Result<(), JobStateError> {
        if !self.status.can_transition_to(next) {
            return Err(JobStateError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Percentage of records that were processed successfully.
    pub fn success_rate(&self) -> f64 {
        if self.counts.total == 0 {
            return 0.0;
        }
        (self.counts.successful as f64 / self.counts.total as f64 * 100.0 * 100.0).round() / 100.0
    }
}
