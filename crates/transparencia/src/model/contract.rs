//! Normalized contract record.
//!
//! Field names follow the portal's Portuguese schema so that stored rows,
//! JSON output and source spreadsheets line up one to one.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Vigente,
    Encerrado,
    Suspenso,
    Rescindido,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vigente => "vigente",
            Self::Encerrado => "encerrado",
            Self::Suspenso => "suspenso",
            Self::Rescindido => "rescindido",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vigente" => Some(Self::Vigente),
            "encerrado" => Some(Self::Encerrado),
            "suspenso" => Some(Self::Suspenso),
            "rescindido" => Some(Self::Rescindido),
            _ => None,
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the text of a PDF section was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Texto,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Texto => "texto",
            Self::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: Option<i64>,
    pub import_id: String,

    pub ano_numero: Option<String>,
    pub numero_contrato: Option<String>,
    pub ano: Option<i32>,
    pub pa: Option<String>,
    pub diretoria: Option<String>,
    pub modalidade: Option<String>,
    pub nome_empresa: Option<String>,
    pub cnpj_empresa: Option<String>,
    pub objeto: Option<String>,
    pub data_assinatura: Option<NaiveDate>,
    pub prazo: Option<i32>,
    pub unidade_prazo: Option<String>,
    pub valor_contrato: Option<f64>,
    pub vencimento: Option<NaiveDate>,
    pub gestor_contrato: Option<String>,
    pub fiscal_tecnico: Option<String>,
    pub fiscal_administrativo: Option<String>,
    pub suplente: Option<String>,

    // Legacy columns still populated by older exports and the PDF extractor.
    pub contratante: Option<String>,
    pub contratado: Option<String>,
    pub cnpj_contratado: Option<String>,
    pub valor: Option<f64>,
    pub data_inicio: Option<NaiveDate>,
    pub data_fim: Option<NaiveDate>,
    pub status: Option<ContractStatus>,
    pub tipo_contrato: Option<String>,
    pub secretaria: Option<String>,
    pub fonte_recurso: Option<String>,
    pub observacoes: Option<String>,

    pub processado: bool,
    pub erro_processamento: Option<String>,
    /// Every source column verbatim, keyed by its original header.
    pub dados_originais: BTreeMap<String, String>,
    pub pdf_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractRecord {
    pub fn new(import_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            import_id: import_id.into(),
            ano_numero: None,
            numero_contrato: None,
            ano: None,
            pa: None,
            diretoria: None,
            modalidade: None,
            nome_empresa: None,
            cnpj_empresa: None,
            objeto: None,
            data_assinatura: None,
            prazo: None,
            unidade_prazo: None,
            valor_contrato: None,
            vencimento: None,
            gestor_contrato: None,
            fiscal_tecnico: None,
            fiscal_administrativo: None,
            suplente: None,
            contratante: None,
            contratado: None,
            cnpj_contratado: None,
            valor: None,
            data_inicio: None,
            data_fim: None,
            status: None,
            tipo_contrato: None,
            secretaria: None,
            fonte_recurso: None,
            observacoes: None,
            processado: true,
            erro_processamento: None,
            dados_originais: BTreeMap::new(),
            pdf_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record is identifiable once it carries a contract number in either form.
    pub fn has_identifier(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.numero_contrato) || present(&self.ano_numero)
    }

    pub fn has_directorate(&self) -> bool {
        self.diretoria
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}
