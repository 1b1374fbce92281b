//! Static mapping from normalized source keys to canonical contract fields.
//!
//! Every processor funnels raw `(key, value)` pairs through
//! [`ContractField::lookup`] and [`ContractField::apply`], so parsing rules for
//! dates, money and statuses live in exactly one place.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;

use crate::error::RowError;
use crate::model::ContractRecord;
use crate::normalize::{
    format_cnpj, map_status, normalize_key, parse_date, parse_integer,
    parse_monetary_value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractField {
    AnoNumero,
    NumeroContrato,
    Ano,
    Pa,
    Diretoria,
    Modalidade,
    NomeEmpresa,
    CnpjEmpresa,
    Objeto,
    DataAssinatura,
    Prazo,
    UnidadePrazo,
    ValorContrato,
    Vencimento,
    GestorContrato,
    FiscalTecnico,
    FiscalAdministrativo,
    Suplente,
    Contratante,
    Contratado,
    CnpjContratado,
    Valor,
    DataInicio,
    DataFim,
    Status,
    TipoContrato,
    Secretaria,
    FonteRecurso,
    Observacoes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Cnpj,
    Date,
    Money,
    Integer,
    Status,
}

static FIELD_INDEX: LazyLock<HashMap<String, ContractField>> = LazyLock::new(|| {
    let mut index = HashMap::new();
    for field in ContractField::ALL {
        index.insert(normalize_key(field.column()), field);
        for alias in field.aliases() {
            index.insert(normalize_key(alias), field);
        }
    }
    index
});

impl ContractField {
    pub const ALL: [ContractField; 29] = [
        Self::AnoNumero,
        Self::NumeroContrato,
        Self::Ano,
        Self::Pa,
        Self::Diretoria,
        Self::Modalidade,
        Self::NomeEmpresa,
        Self::CnpjEmpresa,
        Self::Objeto,
        Self::DataAssinatura,
        Self::Prazo,
        Self::UnidadePrazo,
        Self::ValorContrato,
        Self::Vencimento,
        Self::GestorContrato,
        Self::FiscalTecnico,
        Self::FiscalAdministrativo,
        Self::Suplente,
        Self::Contratante,
        Self::Contratado,
        Self::CnpjContratado,
        Self::Valor,
        Self::DataInicio,
        Self::DataFim,
        Self::Status,
        Self::TipoContrato,
        Self::Secretaria,
        Self::FonteRecurso,
        Self::Observacoes,
    ];

    /// Resolves a raw header, tag or label to its canonical field.
    pub fn lookup(raw_key: &str) -> Option<ContractField> {
        FIELD_INDEX.get(&normalize_key(raw_key)).copied()
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::AnoNumero => "ano_numero",
            Self::NumeroContrato => "numero_contrato",
            Self::Ano => "ano",
            Self::Pa => "pa",
            Self::Diretoria => "diretoria",
            Self::Modalidade => "modalidade",
            Self::NomeEmpresa => "nome_empresa",
            Self::CnpjEmpresa => "cnpj_empresa",
            Self::Objeto => "objeto",
            Self::DataAssinatura => "data_assinatura",
            Self::Prazo => "prazo",
            Self::UnidadePrazo => "unidade_prazo",
            Self::ValorContrato => "valor_contrato",
            Self::Vencimento => "vencimento",
            Self::GestorContrato => "gestor_contrato",
            Self::FiscalTecnico => "fiscal_tecnico",
            Self::FiscalAdministrativo => "fiscal_administrativo",
            Self::Suplente => "suplente",
            Self::Contratante => "contratante",
            Self::Contratado => "contratado",
            Self::CnpjContratado => "cnpj_contratado",
            Self::Valor => "valor",
            Self::DataInicio => "data_inicio",
            Self::DataFim => "data_fim",
            Self::Status => "status",
            Self::TipoContrato => "tipo_contrato",
            Self::Secretaria => "secretaria",
            Self::FonteRecurso => "fonte_recurso",
            Self::Observacoes => "observacoes",
        }
    }

    /// Source spellings seen in spreadsheet headers and XML tags.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::AnoNumero => &["ano-nº", "ano nº", "ano-numero", "ano/número"],
            Self::NumeroContrato => &[
                "contrato",
                "numero",
                "nº contrato",
                "n° contrato",
                "nº do contrato",
                "número do contrato",
                "nº",
            ],
            Self::Ano => &["ano contrato", "ano do contrato"],
            Self::Pa => &["p.a", "p.a.", "processo administrativo", "processo"],
            Self::Diretoria => &["diretoria requisitante", "unidade requisitante"],
            Self::Modalidade => &["modalidade licitacao", "modalidade de licitação"],
            Self::NomeEmpresa => &["nome da empresa", "empresa", "fornecedor", "razão social"],
            Self::CnpjEmpresa => &["cnpj", "cnpj da empresa", "cnpj do fornecedor"],
            Self::Objeto => &["descricao", "descrição", "objeto do contrato", "objeto_contrato"],
            Self::DataAssinatura => &["data da assinatura", "assinatura", "data contrato"],
            Self::Prazo => &["prazo contrato", "duração", "prazo de vigência"],
            Self::UnidadePrazo => &["unid. prazo", "unid prazo", "unidade do prazo"],
            Self::ValorContrato => &["valor do contrato", "valor total", "valor global"],
            Self::Vencimento => &["data vencimento", "data de vencimento"],
            Self::GestorContrato => &["gestor do contrato", "gestor", "responsável"],
            Self::FiscalTecnico => &["fiscal técnico", "fiscal do contrato"],
            Self::FiscalAdministrativo => &["fiscal administrativo", "fiscal admin"],
            Self::Suplente => &["substituto", "fiscal suplente"],
            Self::Contratante => &["órgão contratante", "orgao"],
            Self::Contratado => &["contratada"],
            Self::CnpjContratado => &["cnpj contratada", "cnpj da contratada"],
            Self::Valor => &["valor r$"],
            Self::DataInicio => &["data de início", "início da vigência", "vigência início"],
            Self::DataFim => &["data de fim", "fim da vigência", "vigência fim", "vigencia_fim"],
            Self::Status => &["situacao", "situação", "situação do contrato"],
            Self::TipoContrato => &["tipo", "tipo de contrato"],
            Self::Secretaria => &["secretaria responsável"],
            Self::FonteRecurso => &["fonte de recurso", "fonte do recurso", "fonte"],
            Self::Observacoes => &["observações", "obs", "observação"],
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self.kind(), FieldKind::Date)
    }

    fn kind(&self) -> FieldKind {
        match self {
            Self::CnpjEmpresa | Self::CnpjContratado => FieldKind::Cnpj,
            Self::DataAssinatura | Self::Vencimento | Self::DataInicio | Self::DataFim => {
                FieldKind::Date
            }
            Self::ValorContrato | Self::Valor => FieldKind::Money,
            Self::Ano | Self::Prazo => FieldKind::Integer,
            Self::Status => FieldKind::Status,
            _ => FieldKind::Text,
        }
    }

    fn text_slot<'r>(&self, record: &'r mut ContractRecord) -> Option<&'r mut Option<String>> {
        let slot = match self {
            Self::AnoNumero => &mut record.ano_numero,
            Self::NumeroContrato => &mut record.numero_contrato,
            Self::Pa => &mut record.pa,
            Self::Diretoria => &mut record.diretoria,
            Self::Modalidade => &mut record.modalidade,
            Self::NomeEmpresa => &mut record.nome_empresa,
            Self::CnpjEmpresa => &mut record.cnpj_empresa,
            Self::Objeto => &mut record.objeto,
            Self::UnidadePrazo => &mut record.unidade_prazo,
            Self::GestorContrato => &mut record.gestor_contrato,
            Self::FiscalTecnico => &mut record.fiscal_tecnico,
            Self::FiscalAdministrativo => &mut record.fiscal_administrativo,
            Self::Suplente => &mut record.suplente,
            Self::Contratante => &mut record.contratante,
            Self::Contratado => &mut record.contratado,
            Self::CnpjContratado => &mut record.cnpj_contratado,
            Self::TipoContrato => &mut record.tipo_contrato,
            Self::Secretaria => &mut record.secretaria,
            Self::FonteRecurso => &mut record.fonte_recurso,
            Self::Observacoes => &mut record.observacoes,
            _ => return None,
        };
        Some(slot)
    }

    fn date_slot<'r>(&self, record: &'r mut ContractRecord) -> Option<&'r mut Option<NaiveDate>> {
        match self {
            Self::DataAssinatura => Some(&mut record.data_assinatura),
            Self::Vencimento => Some(&mut record.vencimento),
            Self::DataInicio => Some(&mut record.data_inicio),
            Self::DataFim => Some(&mut record.data_fim),
            _ => None,
        }
    }

    fn money_slot<'r>(&self, record: &'r mut ContractRecord) -> Option<&'r mut Option<f64>> {
        match self {
            Self::ValorContrato => Some(&mut record.valor_contrato),
            Self::Valor => Some(&mut record.valor),
            _ => None,
        }
    }

    fn integer_slot<'r>(&self, record: &'r mut ContractRecord) -> Option<&'r mut Option<i32>> {
        match self {
            Self::Ano => Some(&mut record.ano),
            Self::Prazo => Some(&mut record.prazo),
            _ => None,
        }
    }

    /// Parses `raw` and stores it if the field is still empty.
    ///
    /// Returns whether the record changed. Blank input is ignored; an
    /// unparseable non-blank monetary value is a row error. Unparseable dates
    /// and integers are dropped (the raw text stays in `dados_originais`).
    pub fn apply(&self, record: &mut ContractRecord, raw: &str) -> Result<bool, RowError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(false);
        }

        let changed = match self.kind() {
            FieldKind::Text | FieldKind::Cnpj => {
                let value = if self.kind() == FieldKind::Cnpj {
                    format_cnpj(raw)
                } else {
                    raw.to_string()
                };
                fill(self.text_slot(record), Some(value))
            }
            FieldKind::Date => {
                fill(self.date_slot(record), parse_date(Some(raw)))
            }
            FieldKind::Money => {
                let value = parse_monetary_value(raw).ok_or_else(|| RowError::InvalidValue {
                    field: self.column(),
                    value: raw.to_string(),
                })?;
                fill(self.money_slot(record), Some(value))
            }
            FieldKind::Integer => fill(self.integer_slot(record), parse_integer(raw)),
            FieldKind::Status => {
                if record.status.is_some() {
                    false
                } else {
                    record.status = map_status(Some(raw));
                    record.status.is_some()
                }
            }
        };
        Ok(changed)
    }
}

fn fill<T>(slot: Option<&mut Option<T>>, value: Option<T>) -> bool {
    match (slot, value) {
        (Some(slot), Some(value)) if slot.is_none() => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}

/// Builds a record from raw `(key, value)` pairs.
///
/// Every pair is kept verbatim in `dados_originais`; recognised keys also fill
/// their canonical field. The first non-blank value wins when several keys map
/// to the same field.
pub fn map_fields<'a, I>(import_id: &str, pairs: I) -> Result<ContractRecord, RowError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut record = ContractRecord::new(import_id);
    for (key, value) in pairs {
        record
            .dados_originais
            .insert(key.to_string(), value.to_string());
        if let Some(field) = ContractField::lookup(key) {
            field.apply(&mut record, value)?;
        }
    }
    Ok(record)
}
