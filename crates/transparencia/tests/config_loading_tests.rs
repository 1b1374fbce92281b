//! Table-driven tests for configuration loading and validation.
//!
//! Tests cover JSON and YAML documents, from strings and from files.

mod common;

use std::io::Write;

use common::ConfigBuilder;
use serde_json::json;
use transparencia::config::{load_config, load_config_from_str, load_config_from_yaml_str};

/// Represents a single config loading test case.
struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/transparencia/storage",
            "database_path": "/srv/transparencia/portal.db",
            "max_upload_bytes": 10485760,
            "worker_count": 8,
            "ocr": {
                "enabled": true,
                "languages": ["por", "eng"],
                "dpi": 400,
                "min_text_chars": 80
            },
            "pdf": { "default_contratante": "CODEMAR" },
            "pagination": { "contracts_per_page": 100, "imports_per_page": 20 }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "worker_count": 2 }"#,
        should_succeed: false,
        expected_error: Some("version"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "version": "1.0", "worker_count": 0 }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_key",
        config_json: r#"{ "version": "1.0", "input_directory": "/input" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "ocr_without_languages",
        config_json: r#"{ "version": "1.0", "ocr": { "enabled": true, "languages": [] } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_json_config_loading() {
    for case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (result, case.should_succeed) {
            (Ok(_), true) => {}
            (Ok(_), false) => panic!("[{}] expected failure, got success", case.name),
            (Err(e), true) => panic!("[{}] expected success, got: {}", case.name, e),
            (Err(e), false) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "[{}] error '{}' does not contain '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_defaults_applied() {
    let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();

    assert!(config.ocr.enabled);
    assert_eq!(config.ocr.languages, vec!["por"]);
    assert_eq!(config.ocr.min_text_chars, 50);
    assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
    assert_eq!(config.pagination.contracts_per_page, 50);
    assert_eq!(config.pagination.imports_per_page, 15);
    assert!(config.pdf.default_contratante.is_none());
    assert!(config.worker_count >= 1);
}

#[test]
fn test_yaml_matches_json() {
    let builder = ConfigBuilder::new()
        .set("max_upload_bytes", json!(1048576))
        .set("pdf", json!({ "default_contratante": "CODEMAR" }));

    let from_json = load_config_from_str(&builder.json()).unwrap();
    let from_yaml = load_config_from_yaml_str(&builder.yaml()).unwrap();

    assert_eq!(from_json.max_upload_bytes, from_yaml.max_upload_bytes);
    assert_eq!(from_json.storage_directory, from_yaml.storage_directory);
    assert_eq!(
        from_yaml.pdf.default_contratante.as_deref(),
        Some("CODEMAR")
    );
    assert!(!from_yaml.ocr.enabled);
}

#[test]
fn test_yaml_schema_errors_reported() {
    let yaml = "version: \"1.0\"\nworker_count: -3\n";
    let err = load_config_from_yaml_str(yaml).unwrap_err();
    assert!(err.to_string().contains("Schema validation failed"));
}

#[test]
fn test_load_config_picks_parser_by_extension() {
    let dir = tempfile::TempDir::new().unwrap();
    let builder = ConfigBuilder::new().set("worker_count", json!(3));

    let yaml_path = dir.path().join("transparencia.yml");
    std::fs::File::create(&yaml_path)
        .unwrap()
        .write_all(builder.yaml().as_bytes())
        .unwrap();
    assert_eq!(load_config(&yaml_path).unwrap().worker_count, 3);

    let json_path = dir.path().join("transparencia.json");
    std::fs::write(&json_path, builder.json()).unwrap();
    assert_eq!(load_config(&json_path).unwrap().worker_count, 3);

    let err = load_config(dir.path().join("missing.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
