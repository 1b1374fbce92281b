use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::error::ProcessError;

/// Recognises the text of a whole PDF from rendered page images.
pub trait OcrEngine: Send + Sync {
    fn recognize_pdf(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError>;
}

/// Tesseract (through leptess) over pages rendered by poppler's `pdftoppm`.
#[derive(Clone)]
pub struct TesseractOcr {
    inner: Arc<TesseractOcrInner>,
}

struct TesseractOcrInner {
    languages: String,
    dpi: u32,
}

impl TesseractOcr {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let lang_str = if languages.is_empty() {
            "por".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(TesseractOcrInner {
                languages: lang_str,
                dpi,
            }),
        }
    }

    pub fn languages(&self) -> &str {
        &self.inner.languages
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    pub fn process_image_bytes(&self, image_data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // leptess only takes encoded images
        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize_pdf(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError> {
        let source = TempPdf::write(pdf_bytes)?;
        let page_count = match lopdf::Document::load_mem(pdf_bytes) {
            Ok(doc) => doc.get_pages().len(),
            Err(_) => count_pdf_pages(source.path())?,
        };

        let mut all_text = String::new();
        let mut failed_pages = 0usize;
        for page_num in 1..=page_count as u32 {
            let page_text = render_pdf_page_to_image(source.path(), page_num, self.dpi())
                .and_then(|image| self.process_image_bytes(&image));
            match page_text {
                Ok(text) => {
                    all_text.push_str(&text);
                    all_text.push('\n');
                }
                Err(e) => {
                    failed_pages += 1;
                    tracing::warn!(page = page_num, error = %e, "OCR failed for page");
                }
            }
        }

        if page_count > 0 && failed_pages == page_count {
            return Err(ProcessError::OcrFailed(format!(
                "OCR failed for all {} pages",
                page_count
            )));
        }

        Ok(all_text)
    }
}

/// PDF bytes written to a temp file for the poppler tools; removed on drop.
struct TempPdf {
    path: PathBuf,
}

impl TempPdf {
    fn write(pdf_bytes: &[u8]) -> Result<Self, ProcessError> {
        let path = std::env::temp_dir().join(format!("transparencia_{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, pdf_bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Page count via `pdfinfo`, for files lopdf cannot parse.
fn count_pdf_pages(pdf_path: &Path) -> Result<usize, ProcessError> {
    let output = Command::new("pdfinfo").arg(pdf_path).output().map_err(|e| {
        ProcessError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(parse_page_count(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_page_count(pdfinfo_output: &str) -> usize {
    pdfinfo_output
        .lines()
        .filter_map(|line| line.strip_prefix("Pages:"))
        .find_map(|count| count.trim().parse().ok())
        .unwrap_or(1)
}

fn render_pdf_page_to_image(pdf_path: &Path, page_num: u32, dpi: u32) -> Result<Vec<u8>, ProcessError> {
    let output_prefix = std::env::temp_dir().join(format!("transparencia_page_{}", uuid::Uuid::new_v4()));
    let page = page_num.to_string();

    let output = Command::new("pdftoppm")
        .arg("-png")
        .args(["-r", &dpi.to_string()])
        .args(["-f", &page, "-l", &page])
        .arg(pdf_path)
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm zero-pads the page suffix to the width of the page count
    let prefix = output_prefix.display();
    let candidates = [
        format!("{}-{}.png", prefix, page_num),
        format!("{}-{:02}.png", prefix, page_num),
        format!("{}-{:03}.png", prefix, page_num),
    ];
    let image_path = candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .ok_or_else(|| ProcessError::PdfProcessing("Failed to find rendered page image".to_string()))?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;
    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
