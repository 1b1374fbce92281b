use quick_xml::events::attributes::Attributes;
use quick_xml::events::{BytesRef, BytesText, Event};
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::model::FileFormat;
use crate::processor::tabular::{decode_text, disambiguate_headers, ingest_rows, SourceRow};
use crate::processor::{DirectorateFallback, FormatProcessor, ImportContext};

/// Element that delimits one contract, matched case-insensitively at any depth.
const CONTRACT_ELEMENT: &str = "contrato";

#[derive(Debug, Clone, Default)]
pub struct XmlProcessor {
    directorate: DirectorateFallback,
}

impl XmlProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directorate(mut self, directorate: Option<String>) -> Self {
        self.directorate = DirectorateFallback::new(directorate);
        self
    }
}

impl FormatProcessor for XmlProcessor {
    fn format(&self) -> FileFormat {
        FileFormat::Xml
    }

    fn process(&self, ctx: &mut ImportContext<'_>) -> Result<(), ProcessError> {
        let _span = tracing::info_span!("processor.xml").entered();

        let bytes = ctx.read_source()?;
        // Parse the whole document first so a malformed tail fails the file
        // before any record is written.
        let rows = parse_contracts(&decode_text(&bytes))?;
        tracing::debug!(contracts = rows.len(), "Parsed XML contracts");

        ingest_rows(ctx, &self.directorate, rows);
        Ok(())
    }
}

struct OpenContract {
    depth: usize,
    keys: Vec<String>,
    values: Vec<String>,
}

impl OpenContract {
    fn push(&mut self, key: String, value: String) {
        self.keys.push(key);
        self.values.push(value);
    }

    fn finish(self, position: usize) -> SourceRow {
        let keys = disambiguate_headers(self.keys);
        SourceRow::new(position, keys.into_iter().zip(self.values).collect())
    }
}

/// One row per `<contrato>` element. Attributes and leaf descendants become
/// cells keyed by their local names.
pub fn parse_contracts(xml: &str) -> Result<Vec<SourceRow>, ProcessError> {
    let mut reader = Reader::from_str(xml);

    let mut rows = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<OpenContract> = None;
    // Innermost element still without children, with the text seen so far.
    let mut leaf: Option<(String, String)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ProcessError::XmlProcessing(format!(
                "XML parsing error at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                match open.as_mut() {
                    Some(_) => leaf = Some((name, String::new())),
                    None if name.eq_ignore_ascii_case(CONTRACT_ELEMENT) => {
                        let mut contract = OpenContract {
                            depth,
                            keys: Vec::new(),
                            values: Vec::new(),
                        };
                        push_attributes(&mut contract, e.attributes())?;
                        open = Some(contract);
                    }
                    None => {}
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                match open.as_mut() {
                    Some(contract) => contract.push(name, String::new()),
                    None if name.eq_ignore_ascii_case(CONTRACT_ELEMENT) => {
                        let mut contract = OpenContract {
                            depth,
                            keys: Vec::new(),
                            values: Vec::new(),
                        };
                        push_attributes(&mut contract, e.attributes())?;
                        rows.push(contract.finish(rows.len() + 1));
                    }
                    None => {}
                }
            }
            Event::Text(e) => {
                if let Some((_, text)) = leaf.as_mut() {
                    text.push_str(&text_content(&e));
                }
            }
            Event::CData(e) => {
                if let Some((_, text)) = leaf.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let Some((_, text)) = leaf.as_mut() {
                    if let Some(c) = resolve_reference(&e) {
                        text.push(c);
                    }
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                let closes_contract = open.as_ref().is_some_and(|c| c.depth == depth);
                if closes_contract {
                    leaf = None;
                    if let Some(contract) = open.take() {
                        rows.push(contract.finish(rows.len() + 1));
                    }
                } else if let (Some(contract), Some((name, text))) = (open.as_mut(), leaf.take()) {
                    contract.push(name, text.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if rows.is_empty() {
        return Err(ProcessError::XmlProcessing(
            "No <contrato> elements found".to_string(),
        ));
    }

    Ok(rows)
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_string()
}

fn push_attributes(contract: &mut OpenContract, attributes: Attributes<'_>) -> Result<(), ProcessError> {
    for attr in attributes {
        let attr = attr
            .map_err(|e| ProcessError::XmlProcessing(format!("Invalid attribute: {}", e)))?;
        let key = local_name(attr.key.local_name().as_ref());
        let value = attr
            .unescape_value()
            .map_err(|e| ProcessError::XmlProcessing(format!("Invalid attribute value: {}", e)))?;
        contract.push(key, value.trim().to_string());
    }
    Ok(())
}

/// Unescaped text of a text event; undecodable text is dropped.
pub(crate) fn text_content(e: &BytesText<'_>) -> String {
    e.decode().map(|t| t.into_owned()).unwrap_or_default()
}

/// Resolves `&amp;`-style and numeric character references.
pub(crate) fn resolve_reference(e: &BytesRef<'_>) -> Option<char> {
    if let Ok(Some(c)) = e.resolve_char_ref() {
        return Some(c);
    }
    let name = e.decode().ok()?;
    quick_xml::escape::resolve_xml_entity(&name).and_then(|s| s.chars().next())
}
