use crate::error::ProcessError;
use crate::model::FileFormat;
use crate::processor::tabular::{decode_text, disambiguate_headers, ingest_rows, SourceRow};
use crate::processor::{DirectorateFallback, FormatProcessor, ImportContext};

const CANDIDATE_DELIMITERS: &[u8] = &[b';', b',', b'\t'];

#[derive(Debug, Clone, Default)]
pub struct CsvProcessor {
    directorate: DirectorateFallback,
}

impl CsvProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directorate(mut self, directorate: Option<String>) -> Self {
        self.directorate = DirectorateFallback::new(directorate);
        self
    }
}

impl FormatProcessor for CsvProcessor {
    fn format(&self) -> FileFormat {
        FileFormat::Csv
    }

    fn process(&self, ctx: &mut ImportContext<'_>) -> Result<(), ProcessError> {
        let _span = tracing::info_span!("processor.csv").entered();

        let bytes = ctx.read_source()?;
        let content = decode_text(&bytes);
        let rows = parse_rows(&content)?;

        ingest_rows(ctx, &self.directorate, rows);
        Ok(())
    }
}

/// Picks the candidate delimiter that occurs most often outside quotes on the
/// header line. Ties and header lines without any candidate default to `,`.
pub fn sniff_delimiter(content: &str) -> u8 {
    let header = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let mut counts = [0usize; 3];
    let mut in_quotes = false;
    for byte in header.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| *d == byte) {
            counts[i] += 1;
        }
    }

    let (best, count) = CANDIDATE_DELIMITERS
        .iter()
        .zip(counts)
        .max_by_key(|(_, count)| *count)
        .map(|(d, c)| (*d, c))
        .unwrap_or((b',', 0));

    if count == 0 || counts.iter().filter(|c| **c == count).count() > 1 {
        b','
    } else {
        best
    }
}

fn parse_rows(content: &str) -> Result<Vec<SourceRow>, ProcessError> {
    let delimiter = sniff_delimiter(content);
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let raw_headers: Vec<String> = reader
        .headers()
        .map_err(|e| ProcessError::CsvProcessing(format!("Failed to read header row: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    if raw_headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ProcessError::CsvProcessing(
            "CSV file has no header row".to_string(),
        ));
    }
    let headers = disambiguate_headers(raw_headers);

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        // Header is line 1; fall back to the ordinal when the reader has no position.
        let fallback_line = index + 2;
        let record = result.map_err(|e| {
            ProcessError::CsvProcessing(format!("Failed to read line {}: {}", fallback_line, e))
        })?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);
        let values = record.iter().map(str::to_string).collect();
        rows.push(SourceRow::from_columns(line, &headers, values));
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(sniff_delimiter("a\tb\n1\t2"), b'\t');
        assert_eq!(sniff_delimiter("\n\n\"x;y\",b,c"), b',');
        assert_eq!(sniff_delimiter("single"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn test_parse_rows_semicolon_with_quotes() {
        let content = "Nº Contrato;Valor;Objeto\n001/2024;\"1.234,56\";\"Limpeza; conservação\"\n";
        let rows = parse_rows(content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position, 2);
        assert_eq!(
            rows[0].cells,
            vec![
                ("Nº Contrato".to_string(), "001/2024".to_string()),
                ("Valor".to_string(), "1.234,56".to_string()),
                ("Objeto".to_string(), "Limpeza; conservação".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_rows_keeps_duplicate_headers() {
        let content = "contrato,valor,valor\n1/2024,10,20\n";
        let rows = parse_rows(content).unwrap();
        let keys: Vec<&str> = rows[0].cells.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["contrato", "valor", "valor_2"]);
    }

    #[test]
    fn test_parse_rows_ragged_lines() {
        let content = "contrato,objeto\n1/2024\n2/2024,Obras,extra\n";
        let rows = parse_rows(content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells.len(), 1);
        assert_eq!(rows[1].cells[2].0, "coluna_3");
    }

    #[test]
    fn test_empty_file_is_rejected() {
        match parse_rows("") {
            Err(ProcessError::CsvProcessing(msg)) => assert!(msg.contains("no header row")),
            other => panic!("Expected CsvProcessing error, got {:?}", other.map(|r| r.len())),
        }
    }
}
