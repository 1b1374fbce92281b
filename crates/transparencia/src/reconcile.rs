//! Recovers empty canonical fields from a contract's `dados_originais`.
//!
//! Source columns whose names the mapping table did not recognise at import
//! time ("Fiscal Técnico 2", "Gestor (titular)") are still stored verbatim.
//! The reconciler matches them against per-field synonym lists to fill the
//! gaps, either for display ([`reconcile`]) or persistently
//! ([`backfill_contracts`]).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::db::{contract_repo, Database, DatabaseError};
use crate::model::ContractRecord;
use crate::normalize::normalize_key;
use crate::processor::ContractField;

/// Records fetched per round trip during a backfill.
const BACKFILL_BATCH: u64 = 500;

static RE_TRAILING_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\([^()]*\)\s*$").unwrap());

/// Ordered synonym lists, tried first to last for each field.
const CANDIDATES: &[(ContractField, &[&str])] = &[
    (
        ContractField::NumeroContrato,
        &["contrato", "numero", "numero_contrato", "nº contrato", "numero contrato"],
    ),
    (
        ContractField::AnoNumero,
        &["ano-nº", "ano_numero", "ano numero", "ano-numero", "ano_numero_contrato"],
    ),
    (ContractField::Ano, &["ano", "ano contrato", "ano_contrato"]),
    (
        ContractField::Pa,
        &["p.a", "pa", "processo_administrativo", "processo"],
    ),
    (ContractField::Status, &["status", "situacao", "situação"]),
    (
        ContractField::Diretoria,
        &["diretoria requisitante", "diretoria", "secretaria", "unidade"],
    ),
    (
        ContractField::Modalidade,
        &["modalidade", "modalidade_licitacao"],
    ),
    (
        ContractField::NomeEmpresa,
        &[
            "nome da empresa",
            "nome_empresa",
            "empresa",
            "contratado",
            "fornecedor",
            "razao social",
        ],
    ),
    (
        ContractField::CnpjEmpresa,
        &["cnpj da empresa", "cnpj_empresa", "cnpj", "cnpj_contratado"],
    ),
    (
        ContractField::Objeto,
        &["objeto", "descricao", "objeto contrato"],
    ),
    (
        ContractField::GestorContrato,
        &["gestor do contrato", "gestor_contrato", "gestor", "responsavel"],
    ),
    (
        ContractField::FiscalTecnico,
        &["fiscal tecnico", "fiscal_tecnico"],
    ),
    (
        ContractField::FiscalAdministrativo,
        &["fiscal administrativo", "fiscal_administrativo", "fiscal admin"],
    ),
    (ContractField::Suplente, &["suplente", "substituto"]),
    (
        ContractField::ValorContrato,
        &["valor do contrato", "valor_contrato", "valor_total", "valor total", "valor"],
    ),
    (
        ContractField::DataAssinatura,
        &[
            "data da assinatura",
            "data_assinatura",
            "assinatura",
            "data contrato",
        ],
    ),
    (ContractField::Prazo, &["prazo", "prazo contrato", "duracao"]),
    (
        ContractField::UnidadePrazo,
        &["unid. prazo", "unidade_prazo", "unidade", "periodo"],
    ),
    (
        ContractField::Vencimento,
        &["vencimento", "data_vencimento", "data fim", "vigencia_fim"],
    ),
    (ContractField::Observacoes, &["observacoes", "obs"]),
];

struct KeyEntry<'a> {
    raw: &'a str,
    normalized: String,
    value: &'a str,
}

/// A record's raw keys in normalized form, in the map's (sorted) key order.
pub struct NormalizedKeyMap<'a> {
    entries: Vec<KeyEntry<'a>>,
}

impl<'a> NormalizedKeyMap<'a> {
    pub fn from_raw(raw: &'a BTreeMap<String, String>) -> Self {
        let entries = raw
            .iter()
            .map(|(key, value)| KeyEntry {
                raw: key,
                normalized: normalize_key(key),
                value,
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First non-blank value for the candidates, tried in order.
    ///
    /// Per candidate: an exact normalized key match, then a key that is the
    /// candidate plus a numeric suffix ("fiscal tecnico 2") or plus a trailing
    /// parenthetical ("Gestor (titular)").
    pub fn lookup(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|candidate| {
            let base = normalize_key(candidate);
            if base.is_empty() {
                return None;
            }
            self.non_blank()
                .find(|e| e.normalized == base)
                .or_else(|| self.non_blank().find(|e| is_variant_of(e, &base)))
                .map(|e| e.value.trim().to_string())
        })
    }

    fn non_blank(&self) -> impl Iterator<Item = &KeyEntry<'a>> {
        self.entries.iter().filter(|e| !e.value.trim().is_empty())
    }
}

fn is_variant_of(entry: &KeyEntry<'_>, base: &str) -> bool {
    let numeric_suffix = entry
        .normalized
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix(' '))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

    numeric_suffix
        || RE_TRAILING_PARENTHETICAL
            .captures(entry.raw)
            .is_some_and(|caps| normalize_key(&caps[1]) == base)
}

/// A display copy of `record` with empty fields recovered from its raw data.
/// Values already set are never overwritten.
pub fn reconcile(record: &ContractRecord) -> ContractRecord {
    let mut view = record.clone();
    let keys = NormalizedKeyMap::from_raw(&record.dados_originais);
    if keys.is_empty() {
        return view;
    }

    for (field, candidates) in CANDIDATES {
        let Some(value) = keys.lookup(candidates) else {
            continue;
        };
        if let Err(e) = field.apply(&mut view, &value) {
            tracing::debug!(
                contract_id = ?record.id,
                field = field.column(),
                error = %e,
                "Recovered value ignored"
            );
        }
    }
    view
}

/// Applies [`reconcile`] to stored contracts in id order and saves the ones
/// that changed. `limit` of zero scans everything. Returns `(scanned, updated)`.
pub fn backfill_contracts(db: &Database, limit: u64) -> Result<(u64, u64), DatabaseError> {
    let _span = tracing::info_span!("reconcile.backfill", limit).entered();

    let mut scanned = 0u64;
    let mut updated = 0u64;
    let mut after_id = 0i64;

    loop {
        let batch_size = if limit == 0 {
            BACKFILL_BATCH
        } else {
            BACKFILL_BATCH.min(limit - scanned)
        };
        if batch_size == 0 {
            break;
        }

        let batch = contract_repo::list_after(db, after_id, batch_size)?;
        if batch.is_empty() {
            break;
        }

        for record in &batch {
            scanned += 1;
            let Some(id) = record.id else { continue };
            after_id = id;

            let mut reconciled = reconcile(record);
            if reconciled == *record {
                continue;
            }
            reconciled.updated_at = Utc::now();
            contract_repo::update(db, id, &reconciled)?;
            updated += 1;
        }
    }

    tracing::info!(scanned, updated, "Contract backfill finished");
    Ok((scanned, updated))
}
