//! Pipeline configuration.
//!
//! Everything that used to be a hard-coded endpoint or bucket name is a field of
//! [`PipelineConfig`], loaded from TOML and handed to the store adapters at construction.
//! Every section is optional; an empty file yields [`PipelineConfig::default`].
//!
//! ```toml
//! [object_store]
//! root = "data/lake"
//!
//! [document_store]
//! root = "data/warehouse"
//!
//! [buckets]
//! raw = "bronze"
//! intermediate = "silver"
//! aggregate = "gold"
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 200
//!
//! [execution]
//! workers = 4
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::execution::{ExecutionOptions, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub object_store: ObjectStoreConfig,
    pub document_store: DocumentStoreConfig,
    pub buckets: BucketConfig,
    pub raw_objects: RawObjectConfig,
    pub retry: RetryConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

/// Location of the filesystem object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectStoreConfig {
    pub root: PathBuf,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/lake"),
        }
    }
}

/// Location of the filesystem document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentStoreConfig {
    pub root: PathBuf,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/warehouse"),
        }
    }
}

/// Bucket name per storage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    pub raw: String,
    pub intermediate: String,
    pub aggregate: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            raw: "bronze".to_string(),
            intermediate: "silver".to_string(),
            aggregate: "gold".to_string(),
        }
    }
}

/// Object keys of the two raw-tier inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawObjectConfig {
    pub customers: String,
    pub purchases: String,
}

impl Default for RawObjectConfig {
    fn default() -> Self {
        Self {
            customers: "clients.csv".to_string(),
            purchases: "achats.csv".to_string(),
        }
    }
}

/// Bounded retry applied to every unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

/// Worker pool sizing. `None` means "available parallelism".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub workers: Option<usize>,
    pub max_in_flight_units: Option<usize>,
}

/// Log output settings for the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `sales_lakehouse=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> PipelineResult<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config {
            message: e.to_string(),
        })
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |message: String| Err(PipelineError::Config { message });

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1".to_string());
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be a finite value >= 1.0".to_string());
        }
        if self.execution.workers == Some(0) {
            return invalid("execution.workers must be > 0 when set".to_string());
        }
        if self.execution.max_in_flight_units == Some(0) {
            return invalid("execution.max_in_flight_units must be > 0 when set".to_string());
        }
        let buckets = [
            &self.buckets.raw,
            &self.buckets.intermediate,
            &self.buckets.aggregate,
        ];
        for name in buckets {
            if name.trim().is_empty() {
                return invalid("bucket names must not be empty".to_string());
            }
        }
        if self.buckets.raw == self.buckets.intermediate
            || self.buckets.raw == self.buckets.aggregate
            || self.buckets.intermediate == self.buckets.aggregate
        {
            return invalid("each tier needs its own bucket".to_string());
        }
        Ok(())
    }

    /// Bucket and object names used by the stages.
    pub fn layout(&self) -> StorageLayout {
        StorageLayout {
            raw_bucket: self.buckets.raw.clone(),
            intermediate_bucket: self.buckets.intermediate.clone(),
            aggregate_bucket: self.buckets.aggregate.clone(),
            raw_customers: self.raw_objects.customers.clone(),
            raw_purchases: self.raw_objects.purchases.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        let defaults = ExecutionOptions::default();
        ExecutionOptions {
            workers: self.execution.workers.unwrap_or(defaults.workers),
            max_in_flight_units: self
                .execution
                .max_in_flight_units
                .unwrap_or(defaults.max_in_flight_units),
        }
    }
}

/// Where each tier artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub raw_bucket: String,
    pub intermediate_bucket: String,
    pub aggregate_bucket: String,
    pub raw_customers: String,
    pub raw_purchases: String,
}

impl StorageLayout {
    /// Intermediate-tier key of the cleaned customers.
    pub const CLEAN_CUSTOMERS_KEY: &'static str = "clients.parquet";
    /// Intermediate-tier key of the cleaned purchases.
    pub const CLEAN_PURCHASES_KEY: &'static str = "achats.parquet";
}

impl Default for StorageLayout {
    fn default() -> Self {
        PipelineConfig::default().layout()
    }
}
