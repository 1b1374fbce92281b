//! Field normalization shared by every format processor and the reconciler.
//!
//! All functions here are pure. Parsing failures surface as `None`; callers
//! decide whether an unparseable value fails the row.

use chrono::{Datelike, Duration, NaiveDate};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::ContractStatus;

/// Characters treated as word separators in source keys.
const KEY_SEPARATORS: &[char] = &[
    '.', ',', ';', ':', '/', '\\', '-', '–', '—', '_', '(', ')', '[', ']', '{', '}',
];

/// Canonicalizes a raw column/tag/label name.
///
/// Lower-cases, strips accents, turns separator punctuation into spaces and
/// collapses whitespace. `normalize_key(normalize_key(x)) == normalize_key(x)`.
pub fn normalize_key(raw: &str) -> String {
    let folded: String = strip_accents(&raw.to_lowercase())
        .chars()
        .map(|c| if KEY_SEPARATORS.contains(&c) { ' ' } else { c })
        .collect();
    collapse_whitespace(&folded)
}

/// Removes combining marks after canonical decomposition ("Situação" -> "Situacao").
pub fn strip_accents(raw: &str) -> String {
    raw.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps a free-text status onto the closed status vocabulary.
///
/// Unknown non-empty values fall back to `Vigente`; blank input yields `None`.
pub fn map_status(raw: Option<&str>) -> Option<ContractStatus> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let folded = collapse_whitespace(&strip_accents(raw).to_uppercase());
    let status = match folded.as_str() {
        "VIGENTE" | "RENOVACAO EM ANDAMENTO" | "AGUARDANDO PUBLICACAO" => ContractStatus::Vigente,
        "ENCERRADO" | "ENCERRAOD" | "EMCERRADO" => ContractStatus::Encerrado,
        "SUSPENSO" | "PARALISADO" | "CONTRATO SUSPENSO POR PERIODO DETERMINADO" => {
            ContractStatus::Suspenso
        }
        "RESCINDIDO" | "RESCISAO CONTRATUAL" | "ENCERRADO/RESCINDIDO" | "CANCELADO" => {
            ContractStatus::Rescindido
        }
        _ => {
            tracing::debug!(status = raw, "Unknown contract status, defaulting to vigente");
            ContractStatus::Vigente
        }
    };
    Some(status)
}

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// Parses the date layouts seen in municipal spreadsheets and PDFs.
///
/// A trailing time component (`2024-01-15T10:00:00`, `15/01/2024 10:00`) is ignored.
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let date_part = raw
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()
        .unwrap_or(raw);

    DATE_FORMATS
        .iter()
        .filter_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .find(|date| (1900..=2200).contains(&date.year()))
}

/// Converts a spreadsheet serial day number (1900 date system) into a date.
pub fn parse_excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    // Serial 60 is the phantom 1900-02-29; the epoch shift absorbs it for later dates.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Parses a monetary amount in Brazilian (`R$ 1.234.567,89`) or plain
/// (`12535373.49`) notation.
///
/// When both separators appear the last one is the decimal mark. A lone comma
/// is decimal. Repeated dots, or a single dot followed by exactly three
/// digits, are thousands grouping. Returns `None` for anything non-numeric.
pub fn parse_monetary_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$')
        .collect();

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    if digits.is_empty()
        || !digits.chars().any(|c| c.is_ascii_digit())
        || !digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');

    let canonical = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (None, Some(_)) => {
            if digits.matches(',').count() > 1 {
                digits.replace(',', "")
            } else {
                digits.replace(',', ".")
            }
        }
        (Some(dot), None) => {
            let integer_part = &digits[..dot];
            let fraction = &digits[dot + 1..];
            if digits.matches('.').count() > 1
                || (fraction.len() == 3 && !integer_part.is_empty() && integer_part != "0")
            {
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    };

    let value: f64 = canonical.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Extracts the first integer in a cell such as `"12"`, `"12 meses"` or `"12.0"`.
pub fn parse_integer(raw: &str) -> Option<i32> {
    let digits: String = raw
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Formats a 14-digit CNPJ as `XX.XXX.XXX/XXXX-XX`; other inputs are returned trimmed.
pub fn format_cnpj(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 14 {
        return raw.trim().to_string();
    }
    format!(
        "{}.{}.{}/{}-{}",
        &digits[0..2],
        &digits[2..5],
        &digits[5..8],
        &digits[8..12],
        &digits[12..14]
    )
}
