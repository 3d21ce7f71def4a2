//! Parquet encoding and decoding for the intermediate and aggregate tiers.
//!
//! Every column is written as `OPTIONAL` so that nullable view columns (first/last purchase)
//! and required columns share one code path. A dataset with no rows is written as a file with
//! a schema and no row groups, which reads back as an empty, schema-valid table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field as ParquetField;
use parquet::schema::parser::parse_message_type;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Encode a dataset as a single Parquet object held in memory.
///
/// The whole object is produced before it is handed to a store, so a store `put` never sees a
/// partially written file.
pub fn write_parquet(dataset: &DataSet) -> PipelineResult<Vec<u8>> {
    let schema = Arc::new(parse_message_type(&message_type(&dataset.schema))?);
    let props = Arc::new(WriterProperties::builder().build());

    let mut buf = Vec::new();
    {
        let mut writer = SerializedFileWriter::new(&mut buf, schema, props)?;
        if dataset.row_count() > 0 {
            let mut rg = writer.next_row_group()?;
            let mut col_idx: usize = 0;
            while let Some(mut col) = rg.next_column()? {
                let field = dataset.schema.fields.get(col_idx).ok_or_else(|| {
                    PipelineError::SchemaMismatch {
                        message: format!("parquet writer produced unexpected column #{col_idx}"),
                    }
                })?;
                write_column(col.untyped(), dataset, col_idx, field)?;
                col.close()?;
                col_idx += 1;
            }
            rg.close()?;
        }
        writer.close()?;
    }
    Ok(buf)
}

/// Decode a Parquet object into a dataset shaped like `schema`.
///
/// Validates that all schema fields exist as Parquet leaf columns; extra columns are ignored.
pub fn read_parquet(bytes: impl Into<Bytes>, schema: &Schema) -> PipelineResult<DataSet> {
    let reader = SerializedFileReader::new(bytes.into())?;

    let available_columns = parquet_leaf_column_paths(&reader);
    for field in &schema.fields {
        if !available_columns.contains(field.name.as_str()) {
            return Err(PipelineError::SchemaMismatch {
                message: format!("missing required column '{}'", field.name),
            });
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx0, row_res) in reader.get_row_iter(None)?.enumerate() {
        let row_num = idx0 + 1;
        let row = row_res?;

        let mut map: HashMap<&str, &ParquetField> = HashMap::new();
        for (name, field) in row.get_column_iter() {
            map.insert(name.as_str(), field);
        }

        let mut out_row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for f in &schema.fields {
            let v = map.get(f.name.as_str()).ok_or_else(|| PipelineError::SchemaMismatch {
                message: format!("row {row_num} missing required column '{}'", f.name),
            })?;
            out_row.push(convert_parquet_field(row_num, &f.name, f.data_type, v)?);
        }
        rows.push(out_row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

fn message_type(schema: &Schema) -> String {
    let mut out = String::from("message schema {\n");
    for field in &schema.fields {
        let decl = match field.data_type {
            DataType::Int64 => format!("OPTIONAL INT64 {};", field.name),
            DataType::Float64 => format!("OPTIONAL DOUBLE {};", field.name),
            DataType::Utf8 => format!("OPTIONAL BINARY {} (UTF8);", field.name),
            DataType::Date => format!("OPTIONAL INT32 {} (DATE);", field.name),
            DataType::Timestamp => format!("OPTIONAL INT64 {} (TIMESTAMP_MICROS);", field.name),
        };
        out.push_str("  ");
        out.push_str(&decl);
        out.push('\n');
    }
    out.push('}');
    out
}

fn write_column(
    writer: &mut ColumnWriter<'_>,
    dataset: &DataSet,
    idx: usize,
    field: &Field,
) -> PipelineResult<()> {
    match (writer, field.data_type) {
        (ColumnWriter::Int64ColumnWriter(w), DataType::Int64) => {
            let (values, defs) = collect_column(dataset, idx, field, |v| match v {
                Value::Int64(x) => Some(*x),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::Int64ColumnWriter(w), DataType::Timestamp) => {
            let (values, defs) = collect_column(dataset, idx, field, |v| match v {
                Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::Int32ColumnWriter(w), DataType::Date) => {
            let (values, defs) = collect_column(dataset, idx, field, |v| match v {
                Value::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::DoubleColumnWriter(w), DataType::Float64) => {
            let (values, defs) = collect_column(dataset, idx, field, |v| match v {
                Value::Float64(x) => Some(*x),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (ColumnWriter::ByteArrayColumnWriter(w), DataType::Utf8) => {
            let (values, defs) = collect_column(dataset, idx, field, |v| match v {
                Value::Utf8(s) => Some(ByteArray::from(s.as_str())),
                _ => None,
            })?;
            w.write_batch(&values, Some(&defs), None)?;
        }
        (_, data_type) => {
            return Err(PipelineError::SchemaMismatch {
                message: format!(
                    "no parquet column writer for '{}' ({data_type:?})",
                    field.name
                ),
            });
        }
    }
    Ok(())
}

/// Gather the non-null values of one column plus its definition levels (1 = present).
fn collect_column<T>(
    dataset: &DataSet,
    idx: usize,
    field: &Field,
    extract: impl Fn(&Value) -> Option<T>,
) -> PipelineResult<(Vec<T>, Vec<i16>)> {
    let mut values = Vec::with_capacity(dataset.row_count());
    let mut defs = Vec::with_capacity(dataset.row_count());
    for (row_idx, row) in dataset.rows.iter().enumerate() {
        let cell = row.get(idx).unwrap_or(&Value::Null);
        if cell.is_null() {
            defs.push(0);
            continue;
        }
        match extract(cell) {
            Some(v) => {
                values.push(v);
                defs.push(1);
            }
            None => {
                return Err(PipelineError::ParseError {
                    row: row_idx + 1,
                    column: field.name.clone(),
                    raw: format!("{cell:?}"),
                    message: format!("expected {:?}", field.data_type),
                });
            }
        }
    }
    Ok((values, defs))
}

fn parquet_leaf_column_paths<R: ChunkReader + 'static>(
    reader: &SerializedFileReader<R>,
) -> HashSet<String> {
    reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.path().string())
        .collect()
}

fn convert_parquet_field(
    row: usize,
    column: &str,
    data_type: DataType,
    f: &ParquetField,
) -> PipelineResult<Value> {
    if let ParquetField::Null = f {
        return Ok(Value::Null);
    }

    let mismatch = |message: &str| PipelineError::ParseError {
        row,
        column: column.to_string(),
        raw: f.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => match f {
            ParquetField::Str(s) => Ok(Value::Utf8(s.clone())),
            _ => Err(mismatch("expected string")),
        },
        DataType::Int64 => match f {
            ParquetField::Int(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Long(v) => Ok(Value::Int64(*v)),
            _ => Err(mismatch("expected integer")),
        },
        DataType::Float64 => match f {
            ParquetField::Float(v) => Ok(Value::Float64(f64::from(*v))),
            ParquetField::Double(v) => Ok(Value::Float64(*v)),
            _ => Err(mismatch("expected number")),
        },
        DataType::Date => match f {
            ParquetField::Date(days) | ParquetField::Int(days) => days
                .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .map(Value::Date)
                .ok_or_else(|| mismatch("date out of range")),
            _ => Err(mismatch("expected date")),
        },
        DataType::Timestamp => {
            let ts: Option<NaiveDateTime> = match f {
                ParquetField::TimestampMicros(v) | ParquetField::Long(v) => {
                    DateTime::from_timestamp_micros(*v).map(|dt| dt.naive_utc())
                }
                ParquetField::TimestampMillis(v) => {
                    DateTime::from_timestamp_millis(*v).map(|dt| dt.naive_utc())
                }
                _ => return Err(mismatch("expected timestamp")),
            };
            ts.map(Value::Timestamp)
                .ok_or_else(|| mismatch("timestamp out of range"))
        }
    }
}
