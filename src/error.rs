use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// How a failure should be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The store could not be reached; the same call may succeed later.
    Transient,
    /// Missing artifact, malformed schema or corrupt payload; retrying cannot help.
    Structural,
}

/// Error type returned by stores, codecs, stages and the orchestrator.
///
/// Row-level validation problems (bad dates, non-positive amounts, duplicates) are never
/// reported through this type: the cleaning stage drops and counts those rows instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A store (object or document) could not serve the request.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The requested object (or its bucket) does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// A bucket, key or collection name that a store adapter cannot address.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Local I/O error outside of a store adapter (config files, report output).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet encoding/decoding error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (document) serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The input does not conform to the expected schema (missing required columns, etc.).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A typed artifact cell could not be read as the required type.
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl PipelineError {
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        }
    }

    /// Classify the error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StoreUnavailable { .. } => ErrorClass::Transient,
            _ => ErrorClass::Structural,
        }
    }

    /// `true` when retrying the failed unit may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
