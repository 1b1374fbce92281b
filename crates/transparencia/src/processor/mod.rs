pub mod csv;
pub mod excel;
pub mod extraction;
pub mod fields;
pub mod ocr;
pub mod pdf;
pub mod tabular;
pub mod xml;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{contract_repo, Database};
use crate::error::{ProcessError, RowError};
use crate::model::{ContractRecord, FileFormat, ImportCounts, ImportJob};

pub use self::csv::CsvProcessor;
pub use self::excel::ExcelProcessor;
pub use self::fields::ContractField;
pub use self::ocr::{OcrEngine, TesseractOcr};
pub use self::pdf::{LopdfTextLayer, PdfProcessor, PdfSettings, TextLayer};
pub use self::xml::XmlProcessor;

/// Everything a processor needs while ingesting one import job.
///
/// Processors push each parsed row through [`ImportContext::record`], which
/// persists it and keeps the job counters in step.
pub struct ImportContext<'a> {
    pub db: &'a Database,
    pub import_id: &'a str,
    pub source_path: &'a Path,
    pub original_filename: &'a str,
    /// Directorate supplied by the caller of the import.
    pub fallback_directorate: Option<&'a str>,
    pub counts: ImportCounts,
}

impl<'a> ImportContext<'a> {
    pub fn new(db: &'a Database, job: &'a ImportJob, fallback_directorate: Option<&'a str>) -> Self {
        Self {
            db,
            import_id: &job.id,
            source_path: &job.file_path,
            original_filename: &job.original_filename,
            fallback_directorate,
            counts: ImportCounts::default(),
        }
    }

    pub fn read_source(&self) -> Result<Vec<u8>, ProcessError> {
        std::fs::read(self.source_path).map_err(|e| ProcessError::ReadDocument {
            path: self.source_path.to_path_buf(),
            source: e,
        })
    }

    /// Persists a parsed record or counts the row as failed.
    ///
    /// `position` is the 1-based row, element or section the outcome came from.
    pub fn record(&mut self, position: usize, outcome: Result<ContractRecord, RowError>) {
        self.counts.total += 1;

        let persisted = outcome.and_then(|record| {
            contract_repo::insert(self.db, &record).map_err(|e| RowError::Persist(e.to_string()))
        });

        match persisted {
            Ok(contract_id) => {
                self.counts.record_success();
                tracing::debug!(
                    import_id = self.import_id,
                    position,
                    contract_id,
                    "Record imported"
                );
            }
            Err(e) => {
                self.counts.record_failure();
                tracing::warn!(
                    import_id = self.import_id,
                    position,
                    error = %e,
                    "Record rejected"
                );
            }
        }
    }
}

/// Resolves a record's directorate: the record's own value, then the
/// processor preset, then the caller's fallback.
#[derive(Debug, Clone, Default)]
pub struct DirectorateFallback {
    preset: Option<String>,
}

impl DirectorateFallback {
    pub fn new(preset: Option<String>) -> Self {
        Self {
            preset: non_blank(preset.as_deref()),
        }
    }

    pub fn preset(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    pub fn resolve(&self, own: Option<&str>, caller: Option<&str>) -> Option<String> {
        non_blank(own)
            .or_else(|| self.preset.clone())
            .or_else(|| non_blank(caller))
    }

    pub fn apply(&self, record: &mut ContractRecord, caller: Option<&str>) {
        record.diretoria = self.resolve(record.diretoria.as_deref(), caller);
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub trait FormatProcessor: Send + Sync {
    fn format(&self) -> FileFormat;

    /// Ingests the whole source file.
    ///
    /// Row-level problems are recorded through the context and never returned;
    /// an `Err` means the file as a whole could not be read.
    fn process(&self, ctx: &mut ImportContext<'_>) -> Result<(), ProcessError>;
}

/// Builds the processor for each import, sharing the PDF text and OCR backends.
pub struct ProcessorRegistry {
    pdf_settings: PdfSettings,
    text_layer: Arc<dyn TextLayer>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl ProcessorRegistry {
    pub fn new(config: &Config) -> Self {
        let ocr: Option<Arc<dyn OcrEngine>> = if config.ocr.enabled {
            Some(Arc::new(TesseractOcr::new(
                &config.ocr.languages,
                config.ocr.dpi,
            )))
        } else {
            None
        };

        Self {
            pdf_settings: PdfSettings::from_config(config),
            text_layer: Arc::new(LopdfTextLayer),
            ocr,
        }
    }

    /// Replaces the PDF backends, e.g. to run without poppler or Tesseract.
    pub fn with_pdf_backends(
        mut self,
        text_layer: Arc<dyn TextLayer>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        self.text_layer = text_layer;
        self.ocr = ocr;
        self
    }

    pub fn ocr_available(&self) -> bool {
        self.ocr.is_some()
    }

    /// A processor for `format`, preset with the directorate recorded at upload.
    pub fn processor_for(
        &self,
        format: FileFormat,
        preset_directorate: Option<&str>,
    ) -> Box<dyn FormatProcessor> {
        let preset = preset_directorate.map(str::to_string);
        match format {
            FileFormat::Csv => Box::new(CsvProcessor::new().with_directorate(preset)),
            FileFormat::Excel => Box::new(ExcelProcessor::new().with_directorate(preset)),
            FileFormat::Xml => Box::new(XmlProcessor::new().with_directorate(preset)),
            FileFormat::Pdf => Box::new(
                PdfProcessor::new(
                    self.text_layer.clone(),
                    self.ocr.clone(),
                    self.pdf_settings.clone(),
                )
                .with_directorate(preset),
            ),
        }
    }
}
