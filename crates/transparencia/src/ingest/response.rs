//! Structured responses for the upload and query surfaces.
//!
//! Callers always get an [`ApiResponse`]; errors are flattened into its
//! `errors` (field-keyed validation messages) or `error` (anything else).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::TransparenciaError;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: None,
            error: None,
        }
    }

    /// `failure_message` is used for everything except validation and
    /// not-found errors, which carry their own wording.
    pub fn from_error(failure_message: &str, err: &TransparenciaError) -> Self {
        let (message, errors, error) = match err {
            TransparenciaError::Validation(v) => {
                ("Validação falhou".to_string(), Some(v.errors.clone()), None)
            }
            TransparenciaError::ImportNotFound(_) => {
                ("Importação não encontrada".to_string(), None, Some(err.to_string()))
            }
            TransparenciaError::ContractNotFound(_) => {
                ("Contrato não encontrado".to_string(), None, Some(err.to_string()))
            }
            _ => (failure_message.to_string(), None, Some(err.to_string())),
        };

        Self {
            success: false,
            message,
            data: None,
            errors,
            error,
        }
    }

    pub fn from_result(
        result: crate::error::Result<T>,
        success_message: &str,
        failure_message: &str,
    ) -> Self {
        match result {
            Ok(data) => Self::ok(success_message, data),
            Err(e) => Self::from_error(failure_message, &e),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let per_page = per_page.max(1);
        Self {
            data,
            total,
            page: page.max(1),
            per_page,
            last_page: total.div_ceil(per_page).max(1),
        }
    }
}
