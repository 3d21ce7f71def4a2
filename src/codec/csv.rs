//! Raw-tier CSV decoding.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Schema, Value};

/// Decode a raw CSV object into a text-typed [`DataSet`].
///
/// Rules:
///
/// - The CSV must have headers.
/// - Headers must contain all schema fields (order can differ, extra columns are ignored).
/// - Cells are trimmed; an empty cell becomes [`Value::Null`]. No type conversion happens
///   here, so a malformed cell never fails decoding: the cleaning stage decides what to drop.
pub fn read_raw_table(bytes: &[u8], schema: &Schema) -> PipelineResult<DataSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    read_raw_table_from_reader(&mut rdr, schema)
}

/// Decode raw CSV data from an existing CSV reader.
pub fn read_raw_table_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    schema: &Schema,
) -> PipelineResult<DataSet> {
    if let Some(field) = schema.fields.iter().find(|f| f.data_type != DataType::Utf8) {
        return Err(PipelineError::SchemaMismatch {
            message: format!("raw column '{}' must be declared as text", field.name),
        });
    }

    let headers = rdr.headers()?.clone();

    // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match headers.iter().position(|h| h.trim() == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(PipelineError::SchemaMismatch {
                    message: format!(
                        "missing required column '{field}'. headers={:?}",
                        headers.iter().collect::<Vec<_>>(),
                        field = field.name
                    ),
                });
            }
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = col_idxs
            .iter()
            .map(|&csv_idx| text_cell(record.get(csv_idx).unwrap_or("")))
            .collect();
        rows.push(row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

fn text_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Utf8(trimmed.to_owned())
    }
}
