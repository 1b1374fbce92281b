//! End-to-end ingestion through the upload service, one test per behaviour a
//! portal operator relies on.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;

use common::{Cell, CsvBuilder, TestHarness, XlsxBuilder, XmlBuilder};
use transparencia::db::import_repo;
use transparencia::error::ProcessError;
use transparencia::model::ExtractionMethod;
use transparencia::processor::{ImportContext, OcrEngine, TextLayer};
use transparencia::worker::{DirectoryScanner, ImportTask, ImportWorkerPool};
use transparencia::{
    ContractStatus, FileFormat, ImportStatus, TransparenciaError, UploadRequest,
};

#[test]
fn test_csv_example_import() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["numero_contrato", "diretoria", "valor", "status"])
        .row(&["37", "OPERAÇÕES", "12535373.49", "VIGENTE"])
        .row(&["", "", "abc", "X"])
        .build();

    let outcome = harness.upload("contratos.csv", csv, None).unwrap();

    let job = &outcome.import;
    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counts.total, 2);
    assert_eq!(job.counts.successful, 1);
    assert_eq!(job.counts.failed, 1);
    assert_eq!(job.counts.successful + job.counts.failed, job.counts.processed);

    let records = harness.records(&job.id);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.numero_contrato.as_deref(), Some("37"));
    assert_eq!(record.diretoria.as_deref(), Some("OPERAÇÕES"));
    assert_eq!(record.valor, Some(12535373.49));
    assert_eq!(record.status, Some(ContractStatus::Vigente));
    assert_eq!(record.dados_originais["valor"], "12535373.49");

    assert_eq!(outcome.diretorias_encontradas, vec!["OPERAÇÕES"]);
}

#[test]
fn test_docx_rejected_before_processing() {
    let harness = TestHarness::new();

    let err = harness
        .upload("contrato.docx", b"PK\x03\x04".to_vec(), Some("DAF"))
        .unwrap_err();

    match err {
        TransparenciaError::Validation(v) => assert!(v.has("file")),
        other => panic!("Expected validation error, got {}", other),
    }
    let (_, total) = import_repo::query(&harness.db, &Default::default()).unwrap();
    assert_eq!(total, 0);
}

#[test]
fn test_pdf_without_directorate_rejected() {
    let harness = TestHarness::new();

    let err = harness
        .upload("extrato.pdf", b"%PDF-1.5".to_vec(), None)
        .unwrap_err();

    match err {
        TransparenciaError::Validation(v) => {
            assert_eq!(
                v.errors["diretoria"],
                vec!["A diretoria é obrigatória para arquivos PDF"]
            );
        }
        other => panic!("Expected validation error, got {}", other),
    }
    let (_, total) = import_repo::query(&harness.db, &Default::default()).unwrap();
    assert_eq!(total, 0);
}

#[test]
fn test_malformed_row_does_not_abort_import() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["Nº Contrato", "Empresa", "Valor do Contrato"])
        .delimiter(';')
        .row(&["001/2024", "Alfa Ltda", "1.500,00"])
        .row(&["002/2024", "Beta S.A.", "R$ 2.000,50"])
        .row(&["003/2024", "Gama ME", "mil reais"])
        .row(&["004/2024", "Delta EPP", "900"])
        .row(&["005/2024", "Épsilon", "10.000"])
        .build();

    let outcome = harness.upload("lote.csv", csv, None).unwrap();

    assert_eq!(outcome.import.status, ImportStatus::Completed);
    assert_eq!(outcome.import.counts.total, 5);
    assert_eq!(outcome.import.counts.successful, 4);
    assert_eq!(outcome.import.counts.failed, 1);

    let numbers: Vec<_> = harness
        .records(&outcome.import.id)
        .iter()
        .map(|r| r.numero_contrato.clone().unwrap())
        .collect();
    assert_eq!(numbers, vec!["001/2024", "002/2024", "004/2024", "005/2024"]);
}

#[test]
fn test_record_directorate_wins_over_preset_and_fallback() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["numero_contrato", "diretoria"])
        .row(&["1/2024", "DOP"])
        .row(&["2/2024", ""])
        .build();
    let job = harness
        .uploads()
        .stage(UploadRequest::new("contratos.csv", csv).with_diretoria(Some("X".to_string())))
        .unwrap();

    let registry = transparencia::ProcessorRegistry::new(&harness.config);
    let processor = registry.processor_for(FileFormat::Csv, Some("X"));
    let mut ctx = ImportContext::new(&harness.db, &job, Some("Y"));
    processor.process(&mut ctx).unwrap();
    assert_eq!(ctx.counts.successful, 2);

    let records = harness.records(&job.id);
    assert_eq!(records[0].diretoria.as_deref(), Some("DOP"));
    assert_eq!(records[1].diretoria.as_deref(), Some("X"));
}

#[test]
fn test_caller_fallback_without_preset() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["numero_contrato", "diretoria"])
        .row(&["1/2024", ""])
        .build();
    let job = harness
        .uploads()
        .stage(UploadRequest::new("contratos.csv", csv))
        .unwrap();

    let registry = transparencia::ProcessorRegistry::new(&harness.config);
    let processor = registry.processor_for(FileFormat::Csv, None);
    let mut ctx = ImportContext::new(&harness.db, &job, Some("Y"));
    processor.process(&mut ctx).unwrap();

    assert_eq!(harness.records(&job.id)[0].diretoria.as_deref(), Some("Y"));
}

#[test]
fn test_xml_import() {
    let harness = TestHarness::new();
    let xml = XmlBuilder::new()
        .root("portal")
        .contract(&[
            ("numero_contrato", "10/2023"),
            ("nome_empresa", "Construtora Horizonte & Filhos"),
            ("data_assinatura", "15/03/2023"),
            ("valor_contrato", "250.000,00"),
            ("situacao", "Encerrado"),
        ])
        .contract(&[("objeto", "Sem identificação")])
        .build();

    let outcome = harness.upload("portal.xml", xml, Some("DAF")).unwrap();

    assert_eq!(outcome.import.counts.total, 2);
    assert_eq!(outcome.import.counts.successful, 1);
    let record = &harness.records(&outcome.import.id)[0];
    assert_eq!(
        record.nome_empresa.as_deref(),
        Some("Construtora Horizonte & Filhos")
    );
    assert_eq!(
        record.data_assinatura,
        NaiveDate::from_ymd_opt(2023, 3, 15)
    );
    assert_eq!(record.valor_contrato, Some(250000.0));
    assert_eq!(record.status, Some(ContractStatus::Encerrado));
    assert_eq!(record.diretoria.as_deref(), Some("DAF"));
}

#[test]
fn test_xml_without_contracts_fails_job() {
    let harness = TestHarness::new();
    let xml = b"<?xml version=\"1.0\"?><portal><item/></portal>".to_vec();

    let err = harness.upload("portal.xml", xml, None).unwrap_err();
    assert!(matches!(err, TransparenciaError::Process(_)));

    let (jobs, _) = import_repo::query(&harness.db, &Default::default()).unwrap();
    assert_eq!(jobs[0].status, ImportStatus::Failed);
    assert!(jobs[0].error_message.is_some());
}

#[test]
fn test_xlsx_import() {
    let harness = TestHarness::new();
    let xlsx = XlsxBuilder::new()
        .text_row(&["Nº Contrato", "Empresa", "Valor do Contrato", "Situação"])
        .row(vec![
            Cell::from("045/2024"),
            Cell::from("Alfa Ltda"),
            Cell::from(12535373.49),
            Cell::from("VIGENTE"),
        ])
        .text_row(&["", "", "", ""])
        .row(vec![
            Cell::from("046/2024"),
            Cell::from("Beta S.A."),
            Cell::Empty,
            Cell::from("Paralisado"),
        ])
        .build();

    let outcome = harness.upload("contratos.xlsx", xlsx, None).unwrap();

    assert_eq!(outcome.import.status, ImportStatus::Completed);
    assert_eq!(outcome.import.counts.total, 2);
    assert_eq!(outcome.import.counts.successful, 2);
    let records = harness.records(&outcome.import.id);
    assert_eq!(records[0].valor_contrato, Some(12535373.49));
    assert_eq!(records[1].status, Some(ContractStatus::Suspenso));
}

#[test]
fn test_csv_bare_numbers_do_not_become_dates() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["numero_contrato", "data_assinatura", "data_fim"])
        .delimiter(';')
        .row(&["7/2024", "30", "2024"])
        .build();

    let outcome = harness.upload("contratos.csv", csv, None).unwrap();

    assert_eq!(outcome.import.counts.successful, 1);
    let record = &harness.records(&outcome.import.id)[0];
    assert!(record.data_assinatura.is_none());
    assert!(record.data_fim.is_none());
    assert_eq!(record.dados_originais["data_fim"], "2024");
}

#[test]
fn test_xlsx_serial_dates_only_from_numeric_cells() {
    let harness = TestHarness::new();
    let xlsx = XlsxBuilder::new()
        .text_row(&["Nº Contrato", "Data da Assinatura", "Data de Fim"])
        .row(vec![
            Cell::from("050/2024"),
            Cell::from(45292.0),
            Cell::from("2024"),
        ])
        .build();

    let outcome = harness.upload("contratos.xlsx", xlsx, None).unwrap();

    let record = &harness.records(&outcome.import.id)[0];
    assert_eq!(record.data_assinatura, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert!(record.data_fim.is_none());
}

/// Text layer holding three contracts, the middle one only a heading.
struct HeadingOnlySection;

impl TextLayer for HeadingOnlySection {
    fn extract_text(&self, _: &[u8]) -> Result<String, ProcessError> {
        Ok("EXTRATOS DE CONTRATOS\n\
            CONTRATO Nº 001/2024\n\
            CONTRATADA: Alfa Serviços Ltda\n\
            OBJETO: Limpeza predial\n\
            CONTRATO Nº 002/2024\n\
            CONTRATO Nº 003/2024\n\
            CONTRATADA: Beta Obras S.A.\n\
            VALOR: R$ 9.800,00"
            .to_string())
    }
}

#[test]
fn test_pdf_empty_section_is_isolated() {
    let harness = TestHarness::with_pdf_backends(Arc::new(HeadingOnlySection), None);

    let outcome = harness
        .upload("extratos.pdf", b"%PDF-1.5".to_vec(), Some("DAF"))
        .unwrap();

    let job = &outcome.import;
    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counts.total, 3);
    assert_eq!(job.counts.successful, 2);
    assert_eq!(job.counts.failed, 1);

    let numbers: Vec<_> = harness
        .records(&job.id)
        .into_iter()
        .map(|r| r.numero_contrato.unwrap_or_default())
        .collect();
    assert_eq!(numbers, vec!["001/2024", "003/2024"]);
}

struct ShortText;

impl TextLayer for ShortText {
    fn extract_text(&self, _: &[u8]) -> Result<String, ProcessError> {
        Ok("  \n".to_string())
    }
}

#[derive(Default)]
struct ScannedContract {
    calls: AtomicUsize,
}

impl OcrEngine for ScannedContract {
    fn recognize_pdf(&self, _: &[u8]) -> Result<String, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("EXTRATO DE CONTRATO\n\
            CONTRATO Nº 012/2024\n\
            CONTRATADA: Serviços Gerais Ltda\n\
            OBJETO: Manutenção predial\n\
            VALOR: R$ 48.000,00"
            .to_string())
    }
}

#[test]
fn test_pdf_short_text_layer_falls_back_to_ocr() {
    let ocr = Arc::new(ScannedContract::default());
    let harness =
        TestHarness::with_pdf_backends(Arc::new(ShortText), Some(ocr.clone() as Arc<dyn OcrEngine>));

    let outcome = harness
        .upload("extrato.pdf", b"%PDF-1.5 scanned".to_vec(), Some("DAF"))
        .unwrap();

    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.import.counts.successful, 1);
    let record = &harness.records(&outcome.import.id)[0];
    assert_eq!(record.numero_contrato.as_deref(), Some("012/2024"));
    assert_eq!(record.diretoria.as_deref(), Some("DAF"));
    assert_eq!(
        record.dados_originais["metodo"],
        ExtractionMethod::Ocr.as_str()
    );
    assert!(record.pdf_path.is_some());
}

#[test]
fn test_pdf_without_text_or_ocr_fails() {
    let harness = TestHarness::with_pdf_backends(Arc::new(ShortText), None);

    let err = harness
        .upload("extrato.pdf", b"%PDF-1.5".to_vec(), Some("DAF"))
        .unwrap_err();

    assert!(err.to_string().contains("No text could be extracted"));
    assert_eq!(
        import_repo::count_by_status(&harness.db, ImportStatus::Failed).unwrap(),
        1
    );
}

#[test]
fn test_directory_import_through_worker_pool() {
    let harness = TestHarness::new();
    harness.write_input(
        "a.csv",
        &CsvBuilder::new(&["numero_contrato", "diretoria"])
            .row(&["1/2024", "DAF"])
            .build(),
    );
    harness.write_input(
        "b.xml",
        &XmlBuilder::new()
            .contract(&[("numero_contrato", "2/2024")])
            .build(),
    );
    harness.write_input("c.xml", b"<portal/>");
    harness.write_input("leia-me.txt", b"ignored");

    let uploads = harness.uploads();
    let mut tasks = Vec::new();
    for path in DirectoryScanner::new(&harness.input_dir).scan() {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let request = UploadRequest::new(name, std::fs::read(&path).unwrap())
            .with_diretoria(Some("DJ".to_string()));
        let job = uploads.stage(request).unwrap();
        tasks.push(ImportTask::new(&job.id).with_fallback(job.metadata.diretoria.clone()));
    }
    assert_eq!(tasks.len(), 3);

    let pool = ImportWorkerPool::new(harness.orchestrator.clone(), 2);
    let results = pool.run_all(tasks).unwrap();
    pool.shutdown();
    pool.wait();

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
    let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, ImportStatus::Failed);
    assert_eq!(
        import_repo::count_by_status(&harness.db, ImportStatus::Completed).unwrap(),
        2
    );
}
