use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::db::{contract_repo, import_repo, Database};
use crate::error::{ProcessError, Result, TransparenciaError};
use crate::model::{FileFormat, ImportJob};
use crate::processor::{DirectorateFallback, ImportContext, ProcessorRegistry};

/// Format of an upload, from its file extension (case-insensitive).
pub fn determine_format(filename: &str) -> std::result::Result<FileFormat, ProcessError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    FileFormat::from_extension(extension)
        .ok_or_else(|| ProcessError::UnsupportedFormat(extension.to_string()))
}

/// Runs import jobs through their format processor and drives the job
/// state machine: `pending -> processing -> completed | failed`.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    db: Database,
    registry: Arc<ProcessorRegistry>,
}

impl IngestionOrchestrator {
    pub fn new(db: Database, registry: Arc<ProcessorRegistry>) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Processes a stored pending job to a terminal state.
    ///
    /// The job row is updated on start and on finish. A whole-file failure, or
    /// one while finalising, marks the job failed, keeps the counts reached so
    /// far and is returned.
    pub fn process_file(
        &self,
        job: &mut ImportJob,
        fallback_directorate: Option<&str>,
    ) -> Result<()> {
        let _span = tracing::info_span!(
            "ingest",
            import_id = %job.id,
            format = %job.format,
            file = %job.original_filename
        )
        .entered();

        job.mark_started()?;
        import_repo::update(&self.db, job)?;
        tracing::info!("Import started");

        let processor = self
            .registry
            .processor_for(job.format, job.metadata.diretoria.as_deref());

        let (result, counts) = {
            let mut ctx = ImportContext::new(&self.db, job, fallback_directorate);
            let result = processor.process(&mut ctx);
            (result, ctx.counts)
        };
        job.counts = counts;

        if let Err(e) = result {
            tracing::error!(
                error = %e,
                total = counts.total,
                successful = counts.successful,
                "Import failed"
            );
            return Err(self.fail(job, e.into()));
        }

        if let Err(e) = self.complete(job, fallback_directorate) {
            tracing::error!(error = %e, "Import failed while finalising");
            return Err(self.fail(job, e));
        }
        tracing::info!(
            total = counts.total,
            successful = counts.successful,
            failed = counts.failed,
            "Import completed"
        );
        Ok(())
    }

    /// Applies post-processing and persists the completed job. `job` is only
    /// moved to completed once the row is written.
    fn complete(&self, job: &mut ImportJob, fallback_directorate: Option<&str>) -> Result<()> {
        if job.format == FileFormat::Pdf {
            self.backfill_pdf_directorate(job, fallback_directorate)?;
        }

        let mut completed = job.clone();
        completed.mark_completed()?;
        import_repo::update(&self.db, &completed)?;
        *job = completed;
        Ok(())
    }

    /// Marks the job failed with `error` and returns it. Persisting the
    /// failure is best effort.
    fn fail(&self, job: &mut ImportJob, error: TransparenciaError) -> TransparenciaError {
        let persisted = job
            .mark_failed(error.to_string())
            .map_err(TransparenciaError::from)
            .and_then(|()| import_repo::update(&self.db, job).map_err(TransparenciaError::from));
        if let Err(e) = persisted {
            tracing::warn!(error = %e, "Could not record import failure");
        }
        error
    }

    /// PDF sections rarely name their directorate; the one given at upload
    /// applies to every record left without one.
    fn backfill_pdf_directorate(&self, job: &ImportJob, fallback: Option<&str>) -> Result<()> {
        let directorate = DirectorateFallback::new(fallback.map(str::to_string))
            .resolve(None, job.metadata.diretoria.as_deref());
        let Some(directorate) = directorate else {
            return Ok(());
        };

        let updated = contract_repo::backfill_directorate(
            &self.db,
            &job.id,
            &directorate,
            &Utc::now().to_rfc3339(),
        )?;
        if updated > 0 {
            tracing::debug!(updated, diretoria = %directorate, "Backfilled PDF directorate");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{ImportMetadata, ImportStatus};
    use crate::processor::TextLayer;
    use std::io::Write;
    use tempfile::TempDir;

    struct FixedText(&'static str);

    impl TextLayer for FixedText {
        fn extract_text(&self, _: &[u8]) -> std::result::Result<String, ProcessError> {
            Ok(self.0.to_string())
        }
    }

    fn orchestrator(db: &Database, text: &'static str) -> IngestionOrchestrator {
        let mut config = Config::default();
        config.ocr.enabled = false;
        let registry = ProcessorRegistry::new(&config)
            .with_pdf_backends(Arc::new(FixedText(text)), None);
        IngestionOrchestrator::new(db.clone(), Arc::new(registry))
    }

    fn stored_job(
        db: &Database,
        dir: &TempDir,
        name: &str,
        content: &[u8],
        diretoria: Option<&str>,
    ) -> ImportJob {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        let metadata = ImportMetadata {
            file_size: content.len() as u64,
            diretoria: diretoria.map(str::to_string),
            ..Default::default()
        };
        let job = ImportJob::new(name, &path, determine_format(name).unwrap(), metadata);
        import_repo::insert(db, &job).unwrap();
        job
    }

    #[test]
    fn test_determine_format() {
        assert_eq!(determine_format("a.CSV").unwrap(), FileFormat::Csv);
        assert_eq!(determine_format("dir/b.xls").unwrap(), FileFormat::Excel);
        assert_eq!(determine_format("c.tar.xml").unwrap(), FileFormat::Xml);
        assert_eq!(determine_format("d.pdf").unwrap(), FileFormat::Pdf);
        match determine_format("e.docx") {
            Err(ProcessError::UnsupportedFormat(ext)) => assert_eq!(ext, "docx"),
            _ => panic!("Expected UnsupportedFormat"),
        }
        assert!(determine_format("no_extension").is_err());
    }

    #[test]
    fn test_csv_job_completes_with_counts() {
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let csv = "numero_contrato,diretoria,valor,status\n37,OPERAÇÕES,12535373.49,VIGENTE\n,,abc,X\n";
        let mut job = stored_job(&db, &dir, "contratos.csv", csv.as_bytes(), None);

        orchestrator(&db, "").process_file(&mut job, None).unwrap();

        assert_eq!(job.status, ImportStatus::Completed);
        assert_eq!(job.counts.total, 2);
        assert_eq!(job.counts.successful, 1);
        assert_eq!(job.counts.failed, 1);

        let stored = import_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Completed);
        assert_eq!(stored.counts, job.counts);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_whole_file_error_marks_job_failed() {
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let mut job = stored_job(&db, &dir, "lote.xml", b"<portal><item/></portal>", None);

        let err = orchestrator(&db, "").process_file(&mut job, None).unwrap_err();
        assert!(err.to_string().contains("<contrato>"));

        let stored = import_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Failed);
        assert!(stored.error_message.unwrap().contains("<contrato>"));
        assert_eq!(stored.counts.total, 0);
    }

    #[test]
    fn test_missing_source_file_fails_job() {
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let mut job = stored_job(&db, &dir, "contratos.csv", b"numero_contrato\n1\n", None);
        std::fs::remove_file(&job.file_path).unwrap();

        assert!(orchestrator(&db, "").process_file(&mut job, None).is_err());
        assert_eq!(job.status, ImportStatus::Failed);
    }

    #[test]
    fn test_finalising_error_marks_job_failed() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_completion BEFORE UPDATE ON import_jobs
                 WHEN NEW.status = 'completed'
                 BEGIN SELECT RAISE(ABORT, 'conclusao bloqueada'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let dir = TempDir::new().unwrap();
        let mut job = stored_job(&db, &dir, "contratos.csv", b"numero_contrato\n1\n", None);

        let err = orchestrator(&db, "").process_file(&mut job, None).unwrap_err();
        assert!(err.to_string().contains("conclusao bloqueada"));
        assert_eq!(job.status, ImportStatus::Failed);

        let stored = import_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Failed);
        assert!(stored.error_message.unwrap().contains("conclusao bloqueada"));
        assert_eq!(stored.counts.successful, 1);
    }

    #[test]
    fn test_job_is_processed_once() {
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let mut job = stored_job(&db, &dir, "contratos.csv", b"numero_contrato\n1\n", None);
        let orchestrator = orchestrator(&db, "");

        orchestrator.process_file(&mut job, None).unwrap();
        assert!(orchestrator.process_file(&mut job, None).is_err());
        assert_eq!(contract_repo::count_by_import(&db, &job.id).unwrap(), 1);
    }

    #[test]
    fn test_pdf_directorate_backfill() {
        let text = "CONTRATO Nº 001/2024\nCONTRATADA: Alfa Serviços Ltda\nOBJETO: Limpeza predial\n\
                    CONTRATO Nº 002/2024\nCONTRATADA: Beta Obras S.A.\nDIRETORIA: DJ\nOBJETO: Reforma";
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let mut job = stored_job(&db, &dir, "extrato.pdf", b"%PDF-1.5", Some("DAF"));

        orchestrator(&db, text)
            .process_file(&mut job, Some("DAF"))
            .unwrap();

        assert_eq!(job.counts.successful, 2);
        let directorates = contract_repo::distinct_directorates(&db, &job.id).unwrap();
        assert_eq!(
            directorates,
            vec![("DAF".to_string(), 1), ("DJ".to_string(), 1)]
        );
    }
}
