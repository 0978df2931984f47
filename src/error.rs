//! Error taxonomy for the price estimation service

use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// One offending field in a rejected input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Malformed or invalid input shape, reporting every violated field at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaError {
    /// Where the input came from (a file path, or `None` for request bodies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub violations: Vec<FieldViolation>,
}

impl SchemaError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema error attributed to a named input, typically a dataset file.
    pub fn in_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            violations: Vec::new(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(field, message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Names of the violated fields, in the order they were reported.
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// `Ok(value)` when nothing was violated, otherwise the accumulated error.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, SchemaError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "schema error in {}: ", origin)?,
            None => write!(f, "schema error: ")?,
        }
        for (idx, violation) in self.violations.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", violation.field, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Every failure the core library can surface.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("no label mapping for field '{field}'")]
    UnknownField { field: String },

    #[error("invalid label '{label}' for field '{field}', valid labels are {valid:?}")]
    UnknownLabel {
        field: String,
        label: String,
        valid: Vec<String>,
    },

    #[error("invalid code {code} for field '{field}', valid codes are {valid:?}")]
    UnknownCode {
        field: String,
        code: i64,
        valid: Vec<i64>,
    },

    #[error("models unavailable: {0}")]
    ModelUnavailable(String),

    #[error("{model} produced a non-finite estimate with bundle {version}")]
    NonFiniteEstimate { model: String, version: String },

    #[error("startup configuration error: {0}")]
    StartupConfig(String),

    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error on {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ServiceError {
    /// I/O failure on `path`.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the failure was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Schema(_)
                | ServiceError::UnknownField { .. }
                | ServiceError::UnknownLabel { .. }
                | ServiceError::UnknownCode { .. }
        )
    }

    /// HTTP status a request failing with this error should get.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ModelUnavailable(_) | ServiceError::NonFiniteEstimate { .. } => {
                StatusCode::BAD_REQUEST
            }
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_lists_every_violation() {
        let err = SchemaError::new()
            .with("year", "must be between 1900 and 2027")
            .with("mileage", "must be non-negative");

        let message = err.to_string();
        assert!(message.contains("year"));
        assert!(message.contains("mileage"));
        assert_eq!(err.fields(), vec!["year", "mileage"]);
    }

    #[test]
    fn test_schema_error_origin() {
        let err = SchemaError::in_origin("datasets/broken.csv").with("price", "missing column");
        assert!(err.to_string().starts_with("schema error in datasets/broken.csv"));
        assert!(err.mentions("price"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(SchemaError::new().into_result(5).unwrap(), 5);
        assert!(SchemaError::new().with("x", "bad").into_result(5).is_err());
    }

    #[test]
    fn test_client_error_classification() {
        let schema: ServiceError = SchemaError::new().with("year", "bad").into();
        assert!(schema.is_client_error());
        assert!(!ServiceError::ModelUnavailable("not loaded".into()).is_client_error());
        assert!(!ServiceError::TrainingFailure("diverged".into()).is_client_error());
    }

    #[test]
    fn test_status_codes() {
        let schema: ServiceError = SchemaError::new().with("year", "bad").into();
        assert_eq!(schema.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::ModelUnavailable("no network".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::TrainingFailure("diverged".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let overflow = ServiceError::NonFiniteEstimate {
            model: "mlp".into(),
            version: "v1".into(),
        };
        assert_eq!(overflow.status_code(), StatusCode::BAD_REQUEST);
        assert!(!overflow.is_client_error());
        assert!(!overflow.to_string().contains("unavailable"));
        let io = ServiceError::io("models", std::io::Error::other("disk full"));
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
