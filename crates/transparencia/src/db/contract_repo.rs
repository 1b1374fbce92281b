//! Contract repository: operations for the `contracts` table.

use std::collections::BTreeMap;

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{decode_date, decode_timestamp, encode_date, encode_timestamp, Database, DatabaseError};
use crate::model::{ContractRecord, ContractStatus};

/// Column order shared by INSERT and UPDATE.
const DATA_COLUMNS: &[&str] = &[
    "import_id",
    "ano_numero",
    "numero_contrato",
    "ano",
    "pa",
    "diretoria",
    "modalidade",
    "nome_empresa",
    "cnpj_empresa",
    "objeto",
    "data_assinatura",
    "prazo",
    "unidade_prazo",
    "valor_contrato",
    "vencimento",
    "gestor_contrato",
    "fiscal_tecnico",
    "fiscal_administrativo",
    "suplente",
    "contratante",
    "contratado",
    "cnpj_contratado",
    "valor",
    "data_inicio",
    "data_fim",
    "status",
    "tipo_contrato",
    "secretaria",
    "fonte_recurso",
    "observacoes",
    "processado",
    "erro_processamento",
    "dados_originais",
    "pdf_path",
    "created_at",
    "updated_at",
];

/// Owned SQL values for one record, in `DATA_COLUMNS` order.
fn bind_values(record: &ContractRecord) -> Result<Vec<Box<dyn ToSql>>, DatabaseError> {
    let dados = serde_json::to_string(&record.dados_originais)?;
    Ok(vec![
        Box::new(record.import_id.clone()),
        Box::new(record.ano_numero.clone()),
        Box::new(record.numero_contrato.clone()),
        Box::new(record.ano),
        Box::new(record.pa.clone()),
        Box::new(record.diretoria.clone()),
        Box::new(record.modalidade.clone()),
        Box::new(record.nome_empresa.clone()),
        Box::new(record.cnpj_empresa.clone()),
        Box::new(record.objeto.clone()),
        Box::new(encode_date(&record.data_assinatura)),
        Box::new(record.prazo),
        Box::new(record.unidade_prazo.clone()),
        Box::new(record.valor_contrato),
        Box::new(encode_date(&record.vencimento)),
        Box::new(record.gestor_contrato.clone()),
        Box::new(record.fiscal_tecnico.clone()),
        Box::new(record.fiscal_administrativo.clone()),
        Box::new(record.suplente.clone()),
        Box::new(record.contratante.clone()),
        Box::new(record.contratado.clone()),
        Box::new(record.cnpj_contratado.clone()),
        Box::new(record.valor),
        Box::new(encode_date(&record.data_inicio)),
        Box::new(encode_date(&record.data_fim)),
        Box::new(record.status.map(|s| s.as_str())),
        Box::new(record.tipo_contrato.clone()),
        Box::new(record.secretaria.clone()),
        Box::new(record.fonte_recurso.clone()),
        Box::new(record.observacoes.clone()),
        Box::new(record.processado),
        Box::new(record.erro_processamento.clone()),
        Box::new(dados),
        Box::new(record.pdf_path.clone()),
        Box::new(encode_timestamp(&record.created_at)),
        Box::new(encode_timestamp(&record.updated_at)),
    ])
}

fn record_from_row(row: &Row<'_>) -> Result<Result<ContractRecord, DatabaseError>, rusqlite::Error> {
    let status: Option<String> = row.get("status")?;
    let dados: String = row.get("dados_originais")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let data_assinatura: Option<String> = row.get("data_assinatura")?;
    let vencimento: Option<String> = row.get("vencimento")?;
    let data_inicio: Option<String> = row.get("data_inicio")?;
    let data_fim: Option<String> = row.get("data_fim")?;

    let mut record = ContractRecord::new(row.get::<_, String>("import_id")?);
    record.id = Some(row.get("id")?);
    record.ano_numero = row.get("ano_numero")?;
    record.numero_contrato = row.get("numero_contrato")?;
    record.ano = row.get("ano")?;
    record.pa = row.get("pa")?;
    record.diretoria = row.get("diretoria")?;
    record.modalidade = row.get("modalidade")?;
    record.nome_empresa = row.get("nome_empresa")?;
    record.cnpj_empresa = row.get("cnpj_empresa")?;
    record.objeto = row.get("objeto")?;
    record.prazo = row.get("prazo")?;
    record.unidade_prazo = row.get("unidade_prazo")?;
    record.valor_contrato = row.get("valor_contrato")?;
    record.gestor_contrato = row.get("gestor_contrato")?;
    record.fiscal_tecnico = row.get("fiscal_tecnico")?;
    record.fiscal_administrativo = row.get("fiscal_administrativo")?;
    record.suplente = row.get("suplente")?;
    record.contratante = row.get("contratante")?;
    record.contratado = row.get("contratado")?;
    record.cnpj_contratado = row.get("cnpj_contratado")?;
    record.valor = row.get("valor")?;
    record.tipo_contrato = row.get("tipo_contrato")?;
    record.secretaria = row.get("secretaria")?;
    record.fonte_recurso = row.get("fonte_recurso")?;
    record.observacoes = row.get("observacoes")?;
    record.processado = row.get("processado")?;
    record.erro_processamento = row.get("erro_processamento")?;
    record.pdf_path = row.get("pdf_path")?;

    // Domain decoding errors are reported separately from SQLite errors.
    let decoded = (|| -> Result<ContractRecord, DatabaseError> {
        record.status = status
            .map(|s| {
                ContractStatus::parse(&s).ok_or(DatabaseError::InvalidData {
                    column: "status",
                    value: s.clone(),
                })
            })
            .transpose()?;
        record.dados_originais = serde_json::from_str::<BTreeMap<String, String>>(&dados)?;
        record.data_assinatura = decode_date("data_assinatura", data_assinatura)?;
        record.vencimento = decode_date("vencimento", vencimento)?;
        record.data_inicio = decode_date("data_inicio", data_inicio)?;
        record.data_fim = decode_date("data_fim", data_fim)?;
        record.created_at = decode_timestamp("created_at", &created_at)?;
        record.updated_at = decode_timestamp("updated_at", &updated_at)?;
        Ok(record)
    })();
    Ok(decoded)
}

fn collect_records(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[&dyn ToSql],
) -> Result<Vec<ContractRecord>, DatabaseError> {
    stmt.query_map(params, record_from_row)?
        .map(|r| r.map_err(DatabaseError::Sqlite).and_then(|decoded| decoded))
        .collect()
}

/// Inserts a contract and returns its new id.
pub fn insert(db: &Database, record: &ContractRecord) -> Result<i64, DatabaseError> {
    let values = bind_values(record)?;
    let placeholders: Vec<String> = (1..=DATA_COLUMNS.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO contracts ({}) VALUES ({})",
        DATA_COLUMNS.join(", "),
        placeholders.join(", ")
    );

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        Ok(conn.last_insert_rowid())
    })
}

/// Overwrites every data column of an existing contract.
pub fn update(db: &Database, id: i64, record: &ContractRecord) -> Result<(), DatabaseError> {
    let mut values = bind_values(record)?;
    let assignments: Vec<String> = DATA_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    values.push(Box::new(id));
    let sql = format!(
        "UPDATE contracts SET {} WHERE id = ?{}",
        assignments.join(", "),
        values.len()
    );

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ContractRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM contracts WHERE id = ?1")?;
        let mut records = collect_records(&mut stmt, &[&id])?;
        Ok(records.pop())
    })
}

/// One page of an import's contracts in insertion order, plus the total count.
pub fn list_by_import(
    db: &Database,
    import_id: &str,
    page: u64,
    per_page: u64,
) -> Result<(Vec<ContractRecord>, u64), DatabaseError> {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let offset = i64::try_from(page.saturating_sub(1).saturating_mul(per_page)).unwrap_or(i64::MAX);
    let limit = i64::try_from(per_page).unwrap_or(i64::MAX);

    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE import_id = ?1",
            params![import_id],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contracts WHERE import_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let records = collect_records(&mut stmt, &[&import_id, &limit, &offset])?;
        Ok((records, total))
    })
}

/// Contracts with `id > after_id`, ascending, at most `limit` rows.
pub fn list_after(
    db: &Database,
    after_id: i64,
    limit: u64,
) -> Result<Vec<ContractRecord>, DatabaseError> {
    let limit = limit as i64;
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM contracts WHERE id > ?1 ORDER BY id LIMIT ?2")?;
        collect_records(&mut stmt, &[&after_id, &limit])
    })
}

/// Distinct non-empty directorates of an import with their record counts,
/// most frequent first (ties broken by name).
pub fn distinct_directorates(
    db: &Database,
    import_id: &str,
) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT TRIM(diretoria) AS d, COUNT(*) AS n FROM contracts
             WHERE import_id = ?1 AND diretoria IS NOT NULL AND TRIM(diretoria) != ''
             GROUP BY d ORDER BY n DESC, d ASC",
        )?;
        let rows = stmt
            .query_map(params![import_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sets `diretoria` on an import's contracts that have none. Returns the number updated.
pub fn backfill_directorate(
    db: &Database,
    import_id: &str,
    diretoria: &str,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE contracts SET diretoria = ?2, updated_at = ?3
             WHERE import_id = ?1 AND (diretoria IS NULL OR TRIM(diretoria) = '')",
            params![import_id, diretoria, updated_at],
        )?;
        Ok(updated)
    })
}

pub fn count_by_import(db: &Database, import_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE import_id = ?1",
            params![import_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
