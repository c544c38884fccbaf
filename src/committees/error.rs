use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type covering the different failure cases that can occur when the
/// tool imports a roster, talks to the CRM, or applies changes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a sheet does not follow the expected conventions.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when the configuration file cannot be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Raised when the configuration parses but is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport level failures talking to the CRM.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The CRM answered a call with an error.
    #[error("{entity}.{action} failed: {message}")]
    Api {
        entity: String,
        action: String,
        message: String,
    },

    /// The CRM answered with a payload we cannot interpret.
    #[error("unexpected response from {entity}.{action}: {message}")]
    UnexpectedResponse {
        entity: String,
        action: String,
        message: String,
    },

    /// Raised by the pre-flight check when a CRM subsystem is not installed.
    #[error("missing requirement '{name}': {hint}")]
    MissingDependency { name: String, hint: String },

    /// A single imported entity failed validation.
    #[error("{entity} '{id}' is invalid: {message}")]
    Validation {
        entity: &'static str,
        id: String,
        message: String,
    },

    /// A definition that must be unique exists more than once in the CRM.
    #[error("multiple {kind} definitions named '{name}' found")]
    DuplicateDefinition { kind: &'static str, name: String },

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl SyncError {
    /// Whether the error only concerns a single imported entity and the run
    /// may carry on with the next one.
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self, SyncError::Validation { .. })
    }
}
