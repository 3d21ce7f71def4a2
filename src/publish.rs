//! Publish stage: full replace of each document collection with its aggregate view.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::codec::read_parquet;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::execution::report::serialize_millis;
use crate::records::{
    CountryStats, CustomerStats, MonthlyStats, ProductStats, Record, ViewKind, from_dataset,
};
use crate::store::Document;
use crate::types::DataSet;

/// Outcome of publishing one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishStats {
    pub collection: String,
    pub rows_inserted: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Totals over the collections published by one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishSummary {
    pub collections: usize,
    pub total_rows: usize,
    #[serde(rename = "total_elapsed_ms", serialize_with = "serialize_millis")]
    pub total_elapsed: Duration,
}

impl<'a> FromIterator<&'a PublishStats> for PublishSummary {
    fn from_iter<I: IntoIterator<Item = &'a PublishStats>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut acc, s| {
            acc.collections += 1;
            acc.total_rows += s.rows_inserted;
            acc.total_elapsed += s.elapsed;
            acc
        })
    }
}

fn to_documents<R: Record + Serialize>(dataset: &DataSet) -> PipelineResult<Vec<Document>> {
    from_dataset::<R>(dataset)?
        .iter()
        .map(|record| match serde_json::to_value(record)? {
            serde_json::Value::Object(doc) => Ok(doc),
            other => Err(PipelineError::SchemaMismatch {
                message: format!("record serialized to a non-object value: {other}"),
            }),
        })
        .collect()
}

/// Convert an aggregate artifact of `view` into flat documents.
///
/// Timestamps become `YYYY-MM-DD HH:MM:SS` strings; absent timestamps become `null`.
pub fn documents_for(view: ViewKind, dataset: &DataSet) -> PipelineResult<Vec<Document>> {
    match view {
        ViewKind::CustomerStats => to_documents::<CustomerStats>(dataset),
        ViewKind::ProductStats => to_documents::<ProductStats>(dataset),
        ViewKind::MonthlyStats => to_documents::<MonthlyStats>(dataset),
        ViewKind::CountryStats => to_documents::<CountryStats>(dataset),
    }
}

/// Unit `publish_<view>`: aggregate artifact → document collection, replacing prior content.
///
/// The artifact is read and converted before the collection is touched, so a missing or corrupt
/// artifact leaves the previously published collection in place.
pub fn run_publish(ctx: &PipelineContext, view: ViewKind) -> PipelineResult<PublishStats> {
    let start = Instant::now();
    let bytes = ctx.objects.get(&ctx.layout.aggregate_bucket, view.object_key())?;
    let dataset = read_parquet(bytes, &view.schema())?;
    let documents = documents_for(view, &dataset)?;

    let collection = view.collection();
    ctx.documents.drop_collection(collection)?;
    let rows_inserted = ctx.documents.insert_many(collection, documents)?;

    let stats = PublishStats {
        collection: collection.to_string(),
        rows_inserted,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        collection,
        rows_inserted,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "published collection"
    );
    Ok(stats)
}
