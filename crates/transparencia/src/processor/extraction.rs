//! Field extraction from contract text recovered out of PDFs.
//!
//! Documents list several contracts one after another, each opened by a
//! `CONTRATO Nº 001/2024` heading followed by `LABEL: value` lines.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RowError;
use crate::model::ContractRecord;
use crate::normalize::format_cnpj;
use crate::processor::fields::ContractField;

static RE_SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CONTRATO\s+N\s*[º°o]?\s*\.?\s*(\d+\s*/\s*\d{2,4})").unwrap()
});
static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d{4})\b").unwrap());
static RE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bVALOR(?:\s+GLOBAL|\s+TOTAL|\s+DO\s+CONTRATO)?\s*:\s*(?:R\$\s*)?([\d.,]*\d)")
        .unwrap()
});
static RE_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPRAZO\s*:\s*(\d+)\s*(mes(?:es)?|dias?|anos?)?").unwrap()
});
static RE_CNPJ_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCNPJ\s*(?:/MF)?\s*(?:n[º°o]\s*)?:?\s*([\d./\-]{14,18})").unwrap());
static RE_CNPJ_ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}").unwrap());
static RE_CNPJ_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[\s,;-]*CNPJ.*$").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// `LABEL: value` lines and the fields each one fills.
static LABELS: LazyLock<Vec<(Regex, &'static [ContractField])>> = LazyLock::new(|| {
    use ContractField::*;
    let table: [(&str, &'static [ContractField]); 16] = [
        (r"CONTRATANTE", &[Contratante]),
        (r"CONTRATAD[AO]", &[Contratado, NomeEmpresa]),
        (r"OBJETO(?:\s+DO\s+CONTRATO)?", &[Objeto]),
        (r"DIRETORIA(?:\s+REQUISITANTE)?", &[Diretoria]),
        (r"SECRETARIA", &[Secretaria]),
        (r"MODALIDADE", &[Modalidade]),
        (r"P\.?\s?A\.?", &[Pa]),
        (r"GESTOR(?:\s+DO\s+CONTRATO)?", &[GestorContrato]),
        (r"FISCAL\s+T[ÉE]CNICO", &[FiscalTecnico]),
        (r"FISCAL\s+ADMINISTRATIVO", &[FiscalAdministrativo]),
        (r"SUPLENTE", &[Suplente]),
        (r"DATA\s+(?:DE\s+|DA\s+)?ASSINATURA", &[DataAssinatura, DataInicio]),
        (r"VENCIMENTO", &[Vencimento, DataFim]),
        (r"STATUS|SITUA[ÇC][ÃA]O", &[Status]),
        (r"FONTE\s+D[EO]\s+RECURSOS?", &[FonteRecurso]),
        (r"TIPO(?:\s+DE\s+CONTRATO)?", &[TipoContrato]),
    ];
    table
        .into_iter()
        .map(|(label, fields)| {
            let pattern = format!(r"(?i)\b(?:{})\s*:\s*([^\n]+)", label);
            (Regex::new(&pattern).unwrap(), fields)
        })
        .collect()
});

/// Procurement modalities recognised anywhere in a section when no
/// `MODALIDADE:` line exists.
const MODALITIES: &[&str] = &[
    "Pregão Eletrônico",
    "Pregão Presencial",
    "Concorrência",
    "Tomada de Preços",
    "Convite",
    "Dispensa",
    "Inexigibilidade",
];

/// Collapses runs of spaces and tabs and of blank lines.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits text at each contract heading. Text before the first heading is
/// dropped; without any heading the whole text is one section.
pub fn split_sections(text: &str) -> Vec<&str> {
    let starts: Vec<usize> = RE_SECTION_MARKER
        .find_iter(text)
        .map(|m| m.start())
        .collect();

    if starts.is_empty() {
        return vec![text];
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[start..end].trim()
        })
        .collect()
}

/// Contract number from a section heading, whitespace removed (`001/2024`).
pub fn contract_number(section: &str) -> Option<String> {
    RE_SECTION_MARKER
        .captures(section)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
}

fn year_of(number: &str) -> Option<i32> {
    RE_YEAR
        .captures(number)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.is_empty())
}

/// Extracts every recognised field from one section.
///
/// Fails with [`RowError::EmptySection`] when nothing beyond the heading was
/// recognised, and with [`RowError::InvalidValue`] when a labelled amount
/// cannot be parsed.
pub fn extract_contract(import_id: &str, section: &str) -> Result<ContractRecord, RowError> {
    let mut record = ContractRecord::new(import_id);
    let mut found = false;

    if let Some(number) = contract_number(section) {
        record.ano = year_of(&number);
        record.ano_numero = Some(number.clone());
        record.numero_contrato = Some(number);
    }

    for (regex, fields) in LABELS.iter() {
        if let Some(value) = capture(regex, section) {
            for field in *fields {
                found |= field.apply(&mut record, value)?;
            }
        }
    }

    // A company line often carries its CNPJ: "CONTRATADA: Alfa Ltda - CNPJ: ...".
    let cnpj = record
        .contratado
        .as_deref()
        .and_then(|line| RE_CNPJ_ANY.find(line).map(|m| m.as_str().to_string()))
        .or_else(|| capture(&RE_CNPJ_LABEL, section).map(str::to_string))
        .or_else(|| RE_CNPJ_ANY.find(section).map(|m| m.as_str().to_string()));
    if let Some(cnpj) = cnpj {
        let formatted = format_cnpj(&cnpj);
        record.cnpj_contratado = Some(formatted.clone());
        record.cnpj_empresa = Some(formatted);
        found = true;
    }
    strip_cnpj_suffix(&mut record.contratante);
    strip_cnpj_suffix(&mut record.contratado);
    strip_cnpj_suffix(&mut record.nome_empresa);

    if let Some(amount) = capture(&RE_VALUE, section) {
        found |= ContractField::ValorContrato.apply(&mut record, amount)?;
        ContractField::Valor.apply(&mut record, amount)?;
    }

    if let Some(caps) = RE_TERM.captures(section) {
        record.prazo = caps.get(1).and_then(|m| m.as_str().parse().ok());
        record.unidade_prazo = caps.get(2).map(|m| term_unit(m.as_str()).to_string());
        found |= record.prazo.is_some();
    }

    if record.modalidade.is_none() {
        let lowered = section.to_lowercase();
        record.modalidade = MODALITIES
            .iter()
            .find(|m| lowered.contains(&m.to_lowercase()))
            .map(|m| m.to_string());
    }

    if !found {
        return Err(RowError::EmptySection);
    }
    Ok(record)
}

fn strip_cnpj_suffix(value: &mut Option<String>) {
    if let Some(v) = value.as_deref() {
        let stripped = RE_CNPJ_SUFFIX.replace(v, "").trim().to_string();
        *value = if stripped.is_empty() { None } else { Some(stripped) };
    }
}

fn term_unit(raw: &str) -> &'static str {
    match raw.to_lowercase().chars().next() {
        Some('d') => "dias",
        Some('a') => "anos",
        _ => "meses",
    }
}
