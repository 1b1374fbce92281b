//! Builder patterns for creating import fixtures programmatically.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

/// Builder for delimited text exports.
pub struct CsvBuilder {
    delimiter: char,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvBuilder {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            delimiter: ',',
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn row(mut self, values: &[&str]) -> Self {
        self.rows.push(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let separator = self.delimiter.to_string();
        let mut out = self.headers.join(&separator);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.join(&separator));
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// Builder for portal XML exports with one `<contrato>` element per record.
pub struct XmlBuilder {
    root: String,
    contracts: Vec<Vec<(String, String)>>,
}

impl XmlBuilder {
    pub fn new() -> Self {
        Self {
            root: "contratos".to_string(),
            contracts: Vec::new(),
        }
    }

    pub fn root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn contract(mut self, fields: &[(&str, &str)]) -> Self {
        self.contracts.push(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{}>\n", self.root);
        for fields in &self.contracts {
            out.push_str("  <contrato>\n");
            for (tag, value) in fields {
                out.push_str(&format!("    <{tag}>{}</{tag}>\n", escape(value)));
            }
            out.push_str("  </contrato>\n");
        }
        out.push_str(&format!("</{}>\n", self.root));
        out.into_bytes()
    }
}

impl Default for XmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One xlsx cell.
#[derive(Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

/// Builder for single-sheet xlsx workbooks using inline strings.
pub struct XlsxBuilder {
    sheet_name: String,
    rows: Vec<Vec<Cell>>,
}

impl XlsxBuilder {
    pub fn new() -> Self {
        Self {
            sheet_name: "Contratos".to_string(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: Vec<Cell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn text_row(self, values: &[&str]) -> Self {
        let cells = values.iter().map(|v| Cell::from(*v)).collect();
        self.row(cells)
    }

    fn sheet_xml(&self) -> String {
        let mut xml = String::from("<worksheet><sheetData>");
        for (r, cells) in self.rows.iter().enumerate() {
            let row_number = r + 1;
            xml.push_str(&format!("<row r=\"{}\">", row_number));
            for (c, cell) in cells.iter().enumerate() {
                let reference = format!("{}{}", column_letters(c), row_number);
                match cell {
                    Cell::Text(text) => xml.push_str(&format!(
                        "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                        reference,
                        escape(text)
                    )),
                    Cell::Number(n) => {
                        xml.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", reference, n))
                    }
                    Cell::Empty => {}
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            zip.start_file("xl/workbook.xml", options).unwrap();
            zip.write_all(
                format!(
                    r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
                    self.sheet_name
                )
                .as_bytes(),
            )
            .unwrap();
            zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
            zip.write_all(
                br#"<Relationships><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#,
            )
            .unwrap();
            zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
            zip.write_all(self.sheet_xml().as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }
}

impl Default for XlsxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Builder for config documents, rendered as JSON or YAML.
pub struct ConfigBuilder {
    value: serde_json::Value,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            value: serde_json::json!({
                "version": "1.0",
                "storage_directory": "/tmp/transparencia/storage",
                "database_path": "/tmp/transparencia/portal.db",
                "worker_count": 1,
                "ocr": { "enabled": false }
            }),
        }
    }

    pub fn set(mut self, key: &str, value: serde_json::Value) -> Self {
        self.value[key] = value;
        self
    }

    pub fn json(&self) -> String {
        serde_json::to_string_pretty(&self.value).unwrap()
    }

    pub fn yaml(&self) -> String {
        serde_yaml::to_string(&self.value).unwrap()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
