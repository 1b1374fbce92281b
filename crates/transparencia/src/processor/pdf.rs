use std::sync::Arc;

use crate::config::Config;
use crate::error::ProcessError;
use crate::model::{ExtractionMethod, FileFormat};
use crate::processor::extraction::{extract_contract, normalize_text, split_sections};
use crate::processor::ocr::OcrEngine;
use crate::processor::{DirectorateFallback, FormatProcessor, ImportContext};

/// Reads the embedded text layer of a PDF.
pub trait TextLayer: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError>;
}

/// Text layer extraction with lopdf, page by page.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfTextLayer;

impl TextLayer for LopdfTextLayer {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError> {
        let doc = lopdf::Document::load_mem(pdf_bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        let mut text = String::new();
        for (page_num, _) in doc.get_pages() {
            if let Ok(page_text) = doc.extract_text(&[page_num]) {
                text.push_str(&page_text);
                text.push('\n');
            }
        }
        Ok(text)
    }
}

#[derive(Debug, Clone)]
pub struct PdfSettings {
    /// Text layers shorter than this (trimmed, in characters) go to OCR.
    pub min_text_chars: usize,
    pub default_contratante: Option<String>,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            min_text_chars: 50,
            default_contratante: None,
        }
    }
}

impl PdfSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_text_chars: config.ocr.min_text_chars,
            default_contratante: config.pdf.default_contratante.clone(),
        }
    }
}

pub struct PdfProcessor {
    text_layer: Arc<dyn TextLayer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    settings: PdfSettings,
    directorate: DirectorateFallback,
}

impl PdfProcessor {
    pub fn new(
        text_layer: Arc<dyn TextLayer>,
        ocr: Option<Arc<dyn OcrEngine>>,
        settings: PdfSettings,
    ) -> Self {
        Self {
            text_layer,
            ocr,
            settings,
            directorate: DirectorateFallback::default(),
        }
    }

    pub fn with_directorate(mut self, directorate: Option<String>) -> Self {
        self.directorate = DirectorateFallback::new(directorate);
        self
    }

    /// Text of the document and how it was obtained.
    pub fn acquire_text(&self, pdf_bytes: &[u8]) -> Result<(String, ExtractionMethod), ProcessError> {
        let text = match self.text_layer.extract_text(pdf_bytes) {
            Ok(text) => text,
            Err(e) => {
                // lopdf rejects some files poppler can still render
                let Some(ocr) = self.ocr.as_ref() else {
                    return Err(ProcessError::PdfProcessing(format!(
                        "{}. OCR fallback unavailable.",
                        e
                    )));
                };
                tracing::warn!(error = %e, "Text layer unreadable, falling back to OCR");
                let _ocr_span =
                    tracing::info_span!("processor.ocr_fallback", reason = "parse_failed").entered();
                return Ok((ocr.recognize_pdf(pdf_bytes)?, ExtractionMethod::Ocr));
            }
        };

        let reason = if text.trim().chars().count() < self.settings.min_text_chars {
            Some("too_short")
        } else if should_use_ocr(&text) {
            Some("text_quality")
        } else {
            None
        };

        match (reason, self.ocr.as_ref()) {
            (Some(reason), Some(ocr)) => {
                let _ocr_span = tracing::info_span!("processor.ocr_fallback", reason).entered();
                Ok((ocr.recognize_pdf(pdf_bytes)?, ExtractionMethod::Ocr))
            }
            (Some(reason), None) => {
                tracing::warn!(reason, "OCR disabled, using the text layer as is");
                Ok((text, ExtractionMethod::Texto))
            }
            (None, _) => Ok((text, ExtractionMethod::Texto)),
        }
    }
}

impl FormatProcessor for PdfProcessor {
    fn format(&self) -> FileFormat {
        FileFormat::Pdf
    }

    fn process(&self, ctx: &mut ImportContext<'_>) -> Result<(), ProcessError> {
        let _span = tracing::info_span!("processor.pdf").entered();

        let pdf_bytes = ctx.read_source()?;
        let (raw_text, method) = self.acquire_text(&pdf_bytes)?;
        let text = normalize_text(&raw_text);
        if text.is_empty() {
            return Err(ProcessError::TextExtraction(
                "No text could be extracted from the PDF".to_string(),
            ));
        }

        let sections = split_sections(&text);
        tracing::debug!(
            sections = sections.len(),
            method = method.as_str(),
            "Extracted PDF text"
        );

        let pdf_path = ctx.source_path.to_string_lossy().to_string();
        for (index, section) in sections.into_iter().enumerate() {
            let outcome = extract_contract(ctx.import_id, section).map(|mut record| {
                if record.contratante.is_none() {
                    record.contratante = self.settings.default_contratante.clone();
                }
                self.directorate.apply(&mut record, ctx.fallback_directorate);
                record.pdf_path = Some(pdf_path.clone());

                let original = &mut record.dados_originais;
                original.insert("tipo".to_string(), "pdf".to_string());
                original.insert("texto_extraido".to_string(), section.to_string());
                original.insert("metodo".to_string(), method.as_str().to_string());
                original.insert("arquivo".to_string(), ctx.original_filename.to_string());
                record
            });
            ctx.record(index + 1, outcome);
        }

        Ok(())
    }
}

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Minimum number of characters required before applying alphanumeric ratio check.
/// Text shorter than this is considered valid regardless of character composition.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum percentage of alphanumeric characters required for text to be considered valid.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Whether an extracted text layer is unusable and OCR should be tried:
/// empty, only font-encoding error markers, or mostly non-alphanumeric.
pub fn should_use_ocr(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}
