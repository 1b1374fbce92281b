//! Row handling shared by the CSV, spreadsheet and XML processors.

use std::collections::HashMap;

use crate::error::RowError;
use crate::model::ContractRecord;
use crate::processor::fields::map_fields;
use crate::processor::{DirectorateFallback, ImportContext};

/// One source row as `(original key, raw value)` pairs, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    /// 1-based line, row or element number used in logs.
    pub position: usize,
    pub cells: Vec<(String, String)>,
}

impl SourceRow {
    pub fn new(position: usize, cells: Vec<(String, String)>) -> Self {
        Self { position, cells }
    }

    /// Pairs a header row with a value row. Values past the last header get
    /// positional `coluna_N` keys.
    pub fn from_columns(position: usize, headers: &[String], values: Vec<String>) -> Self {
        let cells = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let key = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| positional_header(i));
                (key, value)
            })
            .collect();
        Self { position, cells }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decodes UTF-8 (BOM stripped), falling back to Latin-1 for legacy exports.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::debug!("Source is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn positional_header(index: usize) -> String {
    format!("coluna_{}", index + 1)
}

/// Makes header names unique and non-empty so no column is lost from
/// `dados_originais`: blanks become `coluna_N`, repeats get `_2`, `_3`...
pub fn disambiguate_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, header)| {
            let header = header.trim().to_string();
            let base = if header.is_empty() {
                positional_header(i)
            } else {
                header
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}

/// Maps one row onto a contract record and applies the directorate chain.
pub fn build_record(
    import_id: &str,
    row: &SourceRow,
    fallback: &DirectorateFallback,
    caller_directorate: Option<&str>,
) -> Result<ContractRecord, RowError> {
    let mut record = map_fields(
        import_id,
        row.cells.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    )?;

    if !record.has_identifier() {
        return Err(RowError::MissingContractNumber);
    }

    fallback.apply(&mut record, caller_directorate);
    Ok(record)
}

/// Feeds rows through the context. Fully blank rows are skipped without
/// touching the counters.
pub fn ingest_rows<I>(ctx: &mut ImportContext<'_>, fallback: &DirectorateFallback, rows: I)
where
    I: IntoIterator<Item = SourceRow>,
{
    let mut skipped = 0usize;
    for row in rows {
        if row.is_blank() {
            skipped += 1;
            continue;
        }
        let outcome = build_record(ctx.import_id, &row, fallback, ctx.fallback_directorate);
        ctx.record(row.position, outcome);
    }

    if skipped > 0 {
        tracing::debug!(import_id = ctx.import_id, skipped, "Skipped blank rows");
    }
}
