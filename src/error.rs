use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::storage::StoreError;

/// Errors that abort the pipeline before a report is produced.
#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to list objects under prefix '{prefix}': {source}")]
    Discovery {
        prefix: String,
        #[source]
        source: StoreError,
    },
}

impl ConverterError {
    pub fn config(msg: impl Into<String>) -> Self {
        ConverterError::Configuration(msg.into())
    }
}

/// Structured classification of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceFetchError,
    UnsupportedOrCorruptImage,
    TranscodeError,
    DestinationStoreError,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceFetchError => "source_fetch_error",
            ErrorKind::UnsupportedOrCorruptImage => "unsupported_or_corrupt_image",
            ErrorKind::TranscodeError => "transcode_error",
            ErrorKind::DestinationStoreError => "destination_store_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed `ConversionResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedOrCorruptImage).unwrap();
        assert_eq!(json, "\"unsupported_or_corrupt_image\"");
        assert_eq!(
            ErrorKind::DestinationStoreError.as_str(),
            "destination_store_error"
        );
    }

    #[test]
    fn test_item_error_display() {
        let err = ItemError::new(ErrorKind::Timeout, "took too long");
        assert_eq!(err.to_string(), "[timeout] took too long");
    }
}
