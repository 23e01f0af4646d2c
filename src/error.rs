// src/error.rs

//! Unified error handling for the harvester.
//!
//! Variants follow the propagation policy of the pipeline: record-scoped
//! errors are logged and the harvest continues, harvest-scoped errors abort
//! the current run.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Retryable source failure (5xx, connection reset, timeout)
    #[error("Transient source error at {url}: {message}")]
    TransientSource { url: String, message: String },

    /// Non-retryable source failure (4xx, malformed page)
    #[error("Permanent source error at {url}: {message}")]
    PermanentSource { url: String, message: String },

    /// A page kept failing transiently until the retry budget ran out
    #[error("Retry budget exhausted after {attempts} attempts for {url}")]
    RetryBudgetExceeded { url: String, attempts: u32 },

    /// The listing cannot be followed to its end (unskippable page, too many
    /// failed pages, repeated cursor)
    #[error("Cursor exhausted for source {source_id}: {message}")]
    CursorExhausted { source_id: String, message: String },

    /// No decoder registered for a content type, or the payload is malformed
    #[error("Cannot deserialize '{content_type}' payload: {message}")]
    Deserialization {
        content_type: String,
        message: String,
    },

    /// Neither an original object id nor original object URLs were found
    #[error("Cannot compute identity for source {source_id}: {message}")]
    Identity { source_id: String, message: String },

    /// Write to a key that is not part of a constrained map's schema
    #[error("Key '{key}' is not allowed in {schema}")]
    SchemaKey { schema: &'static str, key: String },

    /// Write of a value whose type differs from the declared one
    #[error("Key '{key}' in {schema} expects {expected}, got {actual}")]
    SchemaType {
        schema: &'static str,
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// An enrichment stage declined to run (e.g. no media present)
    #[error("Enrichment stage '{stage}' skipped: {reason}")]
    EnrichmentSkipped { stage: String, reason: String },

    /// An enrichment stage failed; never fatal for the item
    #[error("Enrichment stage '{stage}' failed: {message}")]
    EnrichmentStage { stage: String, message: String },

    /// Writing an item's documents to the index store failed
    #[error("Load error for {object_id}: {message}")]
    Load { object_id: String, message: String },

    /// The alias repoint failed; the old generation is preserved
    #[error("Cutover of alias '{alias}' failed: {message}")]
    Cutover { alias: String, message: String },

    /// Index store request failed
    #[error("Index store error: {0}")]
    Store(String),

    /// A symbolic component name has no registered implementation
    #[error("No {kind} registered under '{name}'")]
    Registry { kind: &'static str, name: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// XML parsing failed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a transient source error.
    pub fn transient(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientSource {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a permanent source error.
    pub fn permanent(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::PermanentSource {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a cursor exhaustion error.
    pub fn cursor_exhausted(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::CursorExhausted {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Create a deserialization error.
    pub fn deserialization(content_type: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Deserialization {
            content_type: content_type.into(),
            message: message.to_string(),
        }
    }

    /// Create an identity error.
    pub fn identity(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Identity {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Create an enrichment skip signal.
    pub fn skip(stage: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::EnrichmentSkipped {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an enrichment stage error.
    pub fn enrichment(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::EnrichmentStage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Create a load error.
    pub fn load(object_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Load {
            object_id: object_id.into(),
            message: message.to_string(),
        }
    }

    /// Create a cutover error.
    pub fn cutover(alias: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Cutover {
            alias: alias.into(),
            message: message.to_string(),
        }
    }

    /// Create an index store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a registry lookup error.
    pub fn registry(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Registry {
            kind,
            name: name.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the same request may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientSource { .. })
    }

    /// Whether the error aborts the whole harvest rather than one record.
    pub fn is_harvest_scoped(&self) -> bool {
        matches!(
            self,
            Self::RetryBudgetExceeded { .. } | Self::CursorExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AppError::transient("http://x", "503").is_transient());
        assert!(!AppError::permanent("http://x", "404").is_transient());
        assert!(
            AppError::RetryBudgetExceeded {
                url: "http://x".into(),
                attempts: 10
            }
            .is_harvest_scoped()
        );
        assert!(AppError::cursor_exhausted("museum_x", "cursor repeated").is_harvest_scoped());
        assert!(!AppError::identity("museum_x", "empty").is_harvest_scoped());
    }

    #[test]
    fn test_schema_type_message() {
        let err = AppError::SchemaType {
            schema: "combined_data",
            key: "title".into(),
            expected: "text",
            actual: "integer",
        };
        assert_eq!(
            err.to_string(),
            "Key 'title' in combined_data expects text, got integer"
        );
    }
}
