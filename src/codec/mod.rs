//! Tier encodings.
//!
//! - [`csv`]: row-oriented text, used by the raw tier (read only)
//! - [`parquet`]: column-oriented binary, used by the intermediate and aggregate tiers

pub mod csv;
pub mod parquet;

pub use self::csv::read_raw_table;
pub use self::parquet::{read_parquet, write_parquet};
