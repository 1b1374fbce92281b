use chrono::Utc;
use serde::Serialize;

use crate::db::{contract_repo, import_repo};
use crate::error::{Result, ValidationError};
use crate::ingest::orchestrator::{determine_format, IngestionOrchestrator};
use crate::model::{FileFormat, ImportJob, ImportMetadata};
use crate::storage::FileStorage;

const FIELD_FILE: &str = "file";
const FIELD_DIRETORIA: &str = "diretoria";

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub diretoria: Option<String>,
    pub user_id: Option<String>,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn with_diretoria(mut self, diretoria: Option<String>) -> Self {
        self.diretoria = diretoria;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    fn diretoria(&self) -> Option<&str> {
        self.diretoria
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// A processed upload and the directorates found in its records.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub import: ImportJob,
    /// Most frequent first.
    pub diretorias_encontradas: Vec<String>,
    pub total_diretorias: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diretoria_principal: Option<String>,
}

pub struct UploadService {
    orchestrator: IngestionOrchestrator,
    storage: FileStorage,
    max_upload_bytes: u64,
}

impl UploadService {
    pub fn new(
        orchestrator: IngestionOrchestrator,
        storage: FileStorage,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            max_upload_bytes,
        }
    }

    /// Checks the request without touching storage. Every problem is reported,
    /// keyed by the request field it concerns.
    pub fn validate(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<FileFormat, ValidationError> {
        let mut errors = ValidationError::new();

        let format = if request.filename.trim().is_empty() {
            errors.add(FIELD_FILE, "O arquivo é obrigatório");
            None
        } else {
            match determine_format(&request.filename) {
                Ok(format) => Some(format),
                Err(_) => {
                    errors.add(FIELD_FILE, "Tipos suportados: XML, Excel, CSV, PDF");
                    None
                }
            }
        };

        if request.bytes.is_empty() {
            errors.add(FIELD_FILE, "O arquivo está vazio");
        } else if request.bytes.len() as u64 > self.max_upload_bytes {
            errors.add(
                FIELD_FILE,
                format!("Tamanho máximo: {}MB", self.max_upload_bytes / (1024 * 1024)),
            );
        }

        if format == Some(FileFormat::Pdf) && request.diretoria().is_none() {
            errors.add(FIELD_DIRETORIA, "A diretoria é obrigatória para arquivos PDF");
        }

        match format {
            Some(format) if errors.is_empty() => Ok(format),
            _ => Err(errors),
        }
    }

    /// Validates, stores the bytes and records a pending import job.
    pub fn stage(&self, request: UploadRequest) -> Result<ImportJob> {
        let format = self.validate(&request)?;

        let extension = std::path::Path::new(&request.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        let stored_path = self.storage.store_upload(&request.bytes, &extension)?;

        let metadata = ImportMetadata {
            file_size: request.bytes.len() as u64,
            mime_type: mime_guess::from_path(&request.filename)
                .first_or_octet_stream()
                .to_string(),
            uploaded_at: Some(Utc::now()),
            diretoria: request.diretoria().map(str::to_string),
        };
        let job = ImportJob::new(&request.filename, &stored_path, format, metadata)
            .with_user(request.user_id);

        if let Err(e) = import_repo::insert(self.orchestrator.db(), &job) {
            if let Err(cleanup) = self.storage.remove(&stored_path) {
                tracing::warn!(error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }

        tracing::info!(
            import_id = %job.id,
            file = %job.original_filename,
            format = %format,
            size = job.metadata.file_size,
            "Upload stored"
        );
        Ok(job)
    }

    /// Stages the upload and processes it to completion.
    pub fn upload(&self, request: UploadRequest) -> Result<UploadOutcome> {
        let mut job = self.stage(request)?;
        let fallback = job.metadata.diretoria.clone();
        self.orchestrator.process_file(&mut job, fallback.as_deref())?;
        self.summarize(job)
    }

    /// Builds the directorate summary of a processed job.
    pub fn summarize(&self, job: ImportJob) -> Result<UploadOutcome> {
        let diretorias_encontradas: Vec<String> =
            contract_repo::distinct_directorates(self.orchestrator.db(), &job.id)?
                .into_iter()
                .map(|(diretoria, _)| diretoria)
                .collect();

        Ok(UploadOutcome {
            import: job,
            total_diretorias: diretorias_encontradas.len(),
            diretoria_principal: diretorias_encontradas.first().cloned(),
            diretorias_encontradas,
        })
    }
}
