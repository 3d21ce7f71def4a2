//! `sales-lakehouse` is a batch pipeline over two raw inputs, customers and purchases.
//!
//! Data moves through three storage tiers plus a document store:
//!
//! - **raw** (`bronze`): CSV exactly as delivered
//! - **intermediate** (`silver`): cleaned, deduplicated, typed records as Parquet
//! - **aggregate** (`gold`): four analytical views as Parquet
//! - **document store**: one collection per view, fully replaced on every publish
//!
//! The work is split into units (`clean_customers`, `clean_purchases`, `aggregate_<view>`,
//! `publish_<view>`) that the [`execution::Pipeline`] runs in dependency order on a bounded
//! worker pool, with retry on transient store failures and a structured
//! [`execution::RunReport`] at the end.
//!
//! ## Modules
//!
//! - [`types`]: schema + in-memory dataset types
//! - [`records`]: typed customer, purchase and view records with their fixed column names
//! - [`codec`]: CSV decoding for the raw tier, Parquet encoding/decoding for the others
//! - [`store`]: object store and document store capabilities, with memory and filesystem adapters
//! - [`cleaning`], [`aggregation`], [`publish`]: the three stages
//! - [`execution`]: the orchestrator, retry policy, observer hooks and run report
//! - [`config`]: TOML configuration
//! - [`error`]: the crate-wide error type
//!
//! ## Example
//!
//! ```rust
//! use sales_lakehouse::cleaning::load_raw;
//! use sales_lakehouse::context::PipelineContext;
//! use sales_lakehouse::execution::{ExecutionOptions, Pipeline, RunOptions, RunStatus};
//!
//! # fn main() -> Result<(), sales_lakehouse::PipelineError> {
//! let ctx = PipelineContext::in_memory();
//! load_raw(
//!     &ctx,
//!     b"id_client,nom,email,date_inscription,pays\n10,Ada,ada@example.com,2023-01-01,FR\n",
//!     b"id_achat,id_client,produit,montant,date_achat\n1,10,Laptop,999.90,2024-01-05 10:00:00\n",
//! )?;
//!
//! let pipeline = Pipeline::new(ctx, ExecutionOptions::default())?;
//! let report = pipeline.run(&RunOptions::default())?;
//! assert_eq!(report.status, RunStatus::Succeeded);
//!
//! let docs = pipeline.context().documents.find_all("product_stats")?;
//! assert_eq!(docs[0]["produit"], "Laptop");
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod cleaning;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod publish;
pub mod records;
pub mod store;
pub mod types;

pub use error::{PipelineError, PipelineResult};
