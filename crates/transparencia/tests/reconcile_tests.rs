//! Recovering empty canonical fields from the source columns kept with each
//! record, both on read and through the persisted backfill.

mod common;

use common::{CsvBuilder, TestHarness};
use transparencia::db::contract_repo;
use transparencia::{backfill_contracts, NormalizedKeyMap};

/// Headers none of the import aliases recognise, but the reconciler's
/// variant matching does.
fn legacy_export() -> Vec<u8> {
    CsvBuilder::new(&[
        "numero_contrato",
        "Gestor do Contrato (titular)",
        "Fiscal Técnico 2",
        "Fiscal Administrativo (substituto)",
    ])
    .delimiter(';')
    .row(&["10/2024", "Maria Souza", "João Lima", "Ana Reis"])
    .row(&["11/2024", "", "Paulo Dias", ""])
    .build()
}

#[test]
fn test_contract_view_recovers_fields() {
    let harness = TestHarness::new();
    let outcome = harness.upload("legado.csv", legacy_export(), None).unwrap();
    let records = harness.records(&outcome.import.id);
    assert!(records[0].gestor_contrato.is_none());

    let view = harness
        .queries()
        .contract_view(records[0].id.unwrap())
        .unwrap();

    assert_eq!(view.gestor_contrato.as_deref(), Some("Maria Souza"));
    assert_eq!(view.fiscal_tecnico.as_deref(), Some("João Lima"));
    assert_eq!(view.fiscal_administrativo.as_deref(), Some("Ana Reis"));
}

#[test]
fn test_backfill_persists_and_is_idempotent() {
    let harness = TestHarness::new();
    let outcome = harness.upload("legado.csv", legacy_export(), None).unwrap();

    let (scanned, updated) = backfill_contracts(&harness.db, 0).unwrap();
    assert_eq!((scanned, updated), (2, 2));

    let records = harness.records(&outcome.import.id);
    assert_eq!(records[0].gestor_contrato.as_deref(), Some("Maria Souza"));
    assert_eq!(records[1].fiscal_tecnico.as_deref(), Some("Paulo Dias"));
    assert!(records[1].gestor_contrato.is_none());

    assert_eq!(backfill_contracts(&harness.db, 0).unwrap(), (2, 0));
}

#[test]
fn test_backfill_keeps_existing_values() {
    let harness = TestHarness::new();
    let outcome = harness.upload("legado.csv", legacy_export(), None).unwrap();

    let mut record = harness.records(&outcome.import.id).remove(0);
    let id = record.id.unwrap();
    record.gestor_contrato = Some("Definido manualmente".to_string());
    contract_repo::update(&harness.db, id, &record).unwrap();

    backfill_contracts(&harness.db, 0).unwrap();

    let stored = contract_repo::find_by_id(&harness.db, id).unwrap().unwrap();
    assert_eq!(stored.gestor_contrato.as_deref(), Some("Definido manualmente"));
    assert_eq!(stored.fiscal_tecnico.as_deref(), Some("João Lima"));
}

#[test]
fn test_lookup_is_deterministic() {
    let harness = TestHarness::new();
    let outcome = harness.upload("legado.csv", legacy_export(), None).unwrap();
    let record = harness.records(&outcome.import.id).remove(0);

    let map = NormalizedKeyMap::from_raw(&record.dados_originais);
    let candidates = ["fiscal técnico", "fiscal tecnico"];
    let first = map.lookup(&candidates);
    for _ in 0..10 {
        assert_eq!(map.lookup(&candidates), first);
    }
    assert_eq!(first.as_deref(), Some("João Lima"));
}
