//! Spreadsheet ingestion.
//!
//! Reads the first worksheet of an Office Open XML workbook (`.xlsx`) or of a
//! SpreadsheetML 2003 document (XML saved with an `.xls` extension). The
//! first non-blank row is the header row.
//!
//! Numeric cells are rendered with a decimal comma (`1234,5`) so the shared
//! money parser cannot mistake a fraction such as `1.234` for thousands
//! grouping. Numeric cells under a date header hold serial day numbers and
//! are converted to dates here; text cells never are.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::model::FileFormat;
use crate::normalize::parse_excel_serial_date;
use crate::processor::tabular::{decode_text, disambiguate_headers, ingest_rows, SourceRow};
use crate::processor::xml::{resolve_reference, text_content};
use crate::processor::{ContractField, DirectorateFallback, FormatProcessor, ImportContext};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";
/// Worksheets end at column XFD.
const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkbookKind {
    OpenXml,
    SpreadsheetMl,
    LegacyBinary,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct ExcelProcessor {
    directorate: DirectorateFallback,
}

impl ExcelProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directorate(mut self, directorate: Option<String>) -> Self {
        self.directorate = DirectorateFallback::new(directorate);
        self
    }
}

impl FormatProcessor for ExcelProcessor {
    fn format(&self) -> FileFormat {
        FileFormat::Excel
    }

    fn process(&self, ctx: &mut ImportContext<'_>) -> Result<(), ProcessError> {
        let _span = tracing::info_span!("processor.excel").entered();

        let bytes = ctx.read_source()?;
        let grid = read_first_sheet(&bytes)?;
        let rows = grid_to_rows(grid)?;

        ingest_rows(ctx, &self.directorate, rows);
        Ok(())
    }
}

fn detect_kind(bytes: &[u8]) -> WorkbookKind {
    if bytes.starts_with(ZIP_MAGIC) {
        return WorkbookKind::OpenXml;
    }
    if bytes.starts_with(OLE2_MAGIC) {
        return WorkbookKind::LegacyBinary;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    if head.trim_start_matches('\u{feff}').trim_start().starts_with('<') && head.contains("Workbook")
    {
        WorkbookKind::SpreadsheetMl
    } else {
        WorkbookKind::Unknown
    }
}

/// One worksheet cell as rendered for ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetCell {
    pub text: String,
    /// Typed as a number in the workbook.
    pub numeric: bool,
}

impl SheetCell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            numeric: false,
        }
    }

    pub fn number(raw: &str) -> Self {
        Self {
            text: format_number(raw),
            numeric: true,
        }
    }

    /// The cell as a `dd/mm/yyyy` date when it holds a serial day number.
    fn serial_date(&self) -> Option<String> {
        if !self.numeric {
            return None;
        }
        let serial: f64 = self.text.replace(',', ".").parse().ok()?;
        parse_excel_serial_date(serial).map(|d| d.format("%d/%m/%Y").to_string())
    }
}

impl PartialEq<&str> for SheetCell {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// Sparse worksheet content: row number -> (column index -> cell).
type Grid = BTreeMap<usize, BTreeMap<usize, SheetCell>>;

/// Reads the first worksheet of a supported workbook.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<(usize, Vec<SheetCell>)>, ProcessError> {
    let grid = match detect_kind(bytes) {
        WorkbookKind::OpenXml => read_open_xml(bytes)?,
        WorkbookKind::SpreadsheetMl => parse_spreadsheet_ml(&decode_text(bytes))?,
        WorkbookKind::LegacyBinary => {
            return Err(ProcessError::ExcelProcessing(
                "Legacy binary .xls workbooks are not supported; save the file as .xlsx"
                    .to_string(),
            ))
        }
        WorkbookKind::Unknown => {
            return Err(ProcessError::ExcelProcessing(
                "File is not a recognised spreadsheet".to_string(),
            ))
        }
    };

    let mut sheet = Vec::with_capacity(grid.len());
    for (row, cells) in grid {
        let width = match cells.keys().next_back() {
            Some(&last) if last >= MAX_COLUMNS => {
                return Err(ProcessError::ExcelProcessing(format!(
                    "Row {} has a cell beyond the last worksheet column (XFD)",
                    row
                )))
            }
            Some(&last) => last + 1,
            None => 0,
        };
        let mut values = vec![SheetCell::default(); width];
        for (col, cell) in cells {
            values[col] = cell;
        }
        sheet.push((row, values));
    }
    Ok(sheet)
}

fn grid_to_rows(grid: Vec<(usize, Vec<SheetCell>)>) -> Result<Vec<SourceRow>, ProcessError> {
    let mut rows = grid.into_iter();
    let headers = loop {
        match rows.next() {
            Some((_, cells)) if cells.iter().any(|c| !c.text.trim().is_empty()) => {
                break disambiguate_headers(cells.into_iter().map(|c| c.text).collect())
            }
            Some(_) => continue,
            None => {
                return Err(ProcessError::ExcelProcessing(
                    "Worksheet has no header row".to_string(),
                ))
            }
        }
    };

    let date_columns: Vec<bool> = headers
        .iter()
        .map(|h| ContractField::lookup(h).is_some_and(|f| f.is_date()))
        .collect();

    Ok(rows
        .map(|(number, cells)| {
            let values = cells
                .into_iter()
                .enumerate()
                .map(|(i, cell)| match date_columns.get(i).copied() {
                    Some(true) => cell.serial_date().unwrap_or(cell.text),
                    _ => cell.text,
                })
                .collect();
            SourceRow::from_columns(number, &headers, values)
        })
        .collect())
}

fn read_open_xml(bytes: &[u8]) -> Result<Grid, ProcessError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProcessError::ExcelProcessing(format!("Failed to open workbook: {}", e)))?;

    let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_path = first_sheet_path(&mut archive)?;
    let sheet_xml = read_entry(&mut archive, &sheet_path)?.ok_or_else(|| {
        ProcessError::ExcelProcessing(format!("Worksheet {} not found in workbook", sheet_path))
    })?;

    parse_worksheet(&sheet_xml, &shared_strings)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ProcessError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(ProcessError::ExcelProcessing(format!(
                "Failed to read {}: {}",
                name, e
            )))
        }
    };

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| ProcessError::ExcelProcessing(format!("Failed to read {}: {}", name, e)))?;
    Ok(Some(content))
}

/// Resolves the part name of the first `<sheet>` listed in the workbook.
fn first_sheet_path<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, ProcessError> {
    let Some(workbook) = read_entry(archive, "xl/workbook.xml")? else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(rel_id) = first_attribute(&workbook, b"sheet", b"r:id")? else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(rels) = read_entry(archive, "xl/_rels/workbook.xml.rels")? else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let targets = relationship_targets(&rels)?;
    Ok(match targets.get(&rel_id) {
        Some(target) if target.starts_with('/') => target.trim_start_matches('/').to_string(),
        Some(target) => format!("xl/{}", target),
        None => DEFAULT_SHEET.to_string(),
    })
}

fn xml_error(e: impl std::fmt::Display) -> ProcessError {
    ProcessError::ExcelProcessing(format!("Invalid workbook XML: {}", e))
}

fn first_attribute(xml: &str, element: &[u8], attribute: &[u8]) -> Result<Option<String>, ProcessError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == element => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == attribute {
                        return Ok(Some(attr.unescape_value().map_err(xml_error)?.to_string()));
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn relationship_targets(xml: &str) -> Result<HashMap<String, String>, ProcessError> {
    let mut reader = Reader::from_str(xml);
    let mut targets = HashMap::new();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value().map_err(xml_error)?.to_string()),
                        b"Target" => {
                            target = Some(attr.unescape_value().map_err(xml_error)?.to_string())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => return Ok(targets),
            _ => {}
        }
    }
}

/// Shared string table; rich-text runs are concatenated, phonetic runs skipped.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ProcessError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(e) if in_text && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&text_content(&e));
                }
            }
            Event::GeneralRef(e) if in_text && !in_phonetic => {
                if let (Some(s), Some(c)) = (current.as_mut(), resolve_reference(&e)) {
                    s.push(c);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => return Ok(strings),
            _ => {}
        }
    }
}

/// Zero-based column index from a cell reference such as `AB12`.
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    // Overlong references saturate and are rejected with the rest of the row.
    let number = letters.iter().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
    });
    Some(number.map_or(usize::MAX, |n| n - 1))
}

/// Renders a numeric cell with a decimal comma and no exponent.
fn format_number(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{}", value as i64)
            } else {
                value.to_string().replace('.', ",")
            }
        }
        _ => raw.trim().to_string(),
    }
}

#[derive(Default)]
struct OpenCell {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
}

fn parse_worksheet(xml: &str, shared_strings: &[String]) -> Result<Grid, ProcessError> {
    let mut reader = Reader::from_str(xml);
    let mut grid = Grid::new();
    let mut row_number = 0usize;
    let mut next_column = 0usize;
    let mut cell: Option<OpenCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_number = attribute(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(row_number.saturating_add(1));
                    next_column = 0;
                }
                b"c" => {
                    cell = Some(OpenCell {
                        column: attribute(&e, b"r").and_then(|r| column_index(&r)),
                        kind: attribute(&e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_number = attribute(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(row_number.saturating_add(1));
                }
                b"c" => {
                    next_column = attribute(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_column)
                        .saturating_add(1);
                }
                _ => {}
            },
            Event::Text(e) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&text_content(&e));
                }
            }
            Event::GeneralRef(e) if in_value => {
                if let (Some(c), Some(ch)) = (cell.as_mut(), resolve_reference(&e)) {
                    c.value.push(ch);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(open) = cell.take() {
                        let column = open.column.unwrap_or(next_column);
                        next_column = column.saturating_add(1);
                        let value = cell_value(open, shared_strings);
                        if !value.text.is_empty() {
                            grid.entry(row_number).or_default().insert(column, value);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => return Ok(grid),
            _ => {}
        }
    }
}

fn cell_value(cell: OpenCell, shared_strings: &[String]) -> SheetCell {
    match cell.kind.as_deref() {
        Some("s") => SheetCell::text(
            cell.value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i).cloned())
                .unwrap_or_default(),
        ),
        Some("inlineStr") | Some("str") | Some("e") | Some("d") => SheetCell::text(cell.value),
        Some("b") => SheetCell::text(match cell.value.trim() {
            "1" => "VERDADEIRO",
            _ => "FALSO",
        }),
        _ => SheetCell::number(&cell.value),
    }
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

/// SpreadsheetML 2003: `<Worksheet><Table><Row><Cell><Data>`.
fn parse_spreadsheet_ml(xml: &str) -> Result<Grid, ProcessError> {
    let mut reader = Reader::from_str(xml);
    let mut grid = Grid::new();
    let mut in_first_sheet = false;
    let mut sheets_seen = 0usize;
    let mut row_number = 0usize;
    let mut column = 0usize;
    let mut data: Option<(bool, String)> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Worksheet" => {
                    sheets_seen += 1;
                    in_first_sheet = sheets_seen == 1;
                }
                b"Row" if in_first_sheet => {
                    row_number = attribute(&e, b"Index")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(row_number.saturating_add(1));
                    column = 0;
                }
                b"Cell" if in_first_sheet => {
                    if let Some(index) = attribute(&e, b"Index").and_then(|i| i.parse::<usize>().ok()) {
                        column = index.saturating_sub(1);
                    }
                }
                b"Data" if in_first_sheet => {
                    let numeric = attribute(&e, b"Type").as_deref() == Some("Number");
                    data = Some((numeric, String::new()));
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"Row" if in_first_sheet => {
                    row_number = attribute(&e, b"Index")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(row_number.saturating_add(1));
                }
                b"Cell" if in_first_sheet => {
                    column = attribute(&e, b"Index")
                        .and_then(|i| i.parse::<usize>().ok())
                        .map_or(column, |i| i.saturating_sub(1))
                        .saturating_add(1);
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some((_, value)) = data.as_mut() {
                    value.push_str(&text_content(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let (Some((_, value)), Some(c)) = (data.as_mut(), resolve_reference(&e)) {
                    value.push(c);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Worksheet" => in_first_sheet = false,
                b"Data" => {
                    if let Some((numeric, value)) = data.take() {
                        let value = if numeric {
                            SheetCell::number(&value)
                        } else {
                            SheetCell::text(value)
                        };
                        if !value.text.is_empty() {
                            grid.entry(row_number).or_default().insert(column, value);
                        }
                    }
                }
                b"Cell" if in_first_sheet => column = column.saturating_add(1),
                _ => {}
            },
            Event::Eof => return Ok(grid),
            _ => {}
        }
    }
}
