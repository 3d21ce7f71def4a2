//! Cleaning stage: raw-tier CSV → validated, deduplicated, typed records in the intermediate tier.
//!
//! Row-level problems never fail the stage. Each dropped row is counted under exactly one
//! [`DropReason`], checked in this order:
//!
//! 1. `duplicate`: the parsed identifier was already seen (first occurrence wins; rows without a
//!    readable identifier form one group)
//! 2. `unparseable_date`: a non-empty timestamp cell that no accepted form matches
//! 3. `non_positive_amount`: purchases only, `montant <= 0`
//! 4. `missing_field`: any required field still null (empty cell, non-numeric id or amount)
//!
//! Only structural problems (missing raw object, missing required column) are errors.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::codec::{read_raw_table, write_parquet};
use crate::config::StorageLayout;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::records::{Customer, Purchase, RAW_CUSTOMER_COLUMNS, RAW_PURCHASE_COLUMNS, to_dataset};
use crate::types::{DataSet, Schema, Value};

/// Why a raw row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    UnparseableDate,
    NonPositiveAmount,
    MissingField,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Duplicate => "duplicate",
            DropReason::UnparseableDate => "unparseable_date",
            DropReason::NonPositiveAmount => "non_positive_amount",
            DropReason::MissingField => "missing_field",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dropped-row counters, one per [`DropReason`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub duplicate: usize,
    pub unparseable_date: usize,
    pub non_positive_amount: usize,
    pub missing_field: usize,
}

impl DropCounts {
    pub fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::Duplicate => self.duplicate += 1,
            DropReason::UnparseableDate => self.unparseable_date += 1,
            DropReason::NonPositiveAmount => self.non_positive_amount += 1,
            DropReason::MissingField => self.missing_field += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.duplicate + self.unparseable_date + self.non_positive_amount + self.missing_field
    }
}

impl Add for DropCounts {
    type Output = DropCounts;

    fn add(self, rhs: DropCounts) -> DropCounts {
        DropCounts {
            duplicate: self.duplicate + rhs.duplicate,
            unparseable_date: self.unparseable_date + rhs.unparseable_date,
            non_positive_amount: self.non_positive_amount + rhs.non_positive_amount,
            missing_field: self.missing_field + rhs.missing_field,
        }
    }
}

impl AddAssign for DropCounts {
    fn add_assign(&mut self, rhs: DropCounts) {
        *self = *self + rhs;
    }
}

/// Output of a cleaning pass over one raw table.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned<T> {
    pub records: Vec<T>,
    pub rows_in: usize,
    pub drops: DropCounts,
}

/// Outcome of one cleaning unit, as recorded in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub drops: DropCounts,
}

impl<T> From<&Cleaned<T>> for CleaningReport {
    fn from(c: &Cleaned<T>) -> Self {
        Self {
            rows_in: c.rows_in,
            rows_out: c.records.len(),
            drops: c.drops,
        }
    }
}

/// Parse a timestamp in any accepted form.
///
/// Accepted: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS[.f]]`, the same with a `T` separator, and
/// RFC 3339 with an offset (converted to UTC).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_id(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    // Spreadsheet exports write integer ids as "42.0".
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| f as i64)
}

fn parse_amount(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|a| a.is_finite())
}

/// Resolved column positions of a raw table.
struct RawColumns<const N: usize>([usize; N]);

impl<const N: usize> RawColumns<N> {
    fn resolve(schema: &Schema, names: &[&str; N]) -> PipelineResult<Self> {
        let mut idx = [0usize; N];
        for (slot, name) in idx.iter_mut().zip(names) {
            *slot = schema
                .index_of(name)
                .ok_or_else(|| PipelineError::SchemaMismatch {
                    message: format!("missing required column '{name}'"),
                })?;
        }
        Ok(Self(idx))
    }

    fn text<'a>(&self, row: &'a [Value], col: usize) -> Option<&'a str> {
        row.get(self.0[col])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of parsing an optional timestamp cell.
enum TimestampCell {
    Missing,
    Invalid,
    Parsed(NaiveDateTime),
}

fn timestamp_cell(raw: Option<&str>) -> TimestampCell {
    match raw {
        None => TimestampCell::Missing,
        Some(s) => parse_timestamp(s).map_or(TimestampCell::Invalid, TimestampCell::Parsed),
    }
}

/// Validate, normalize and deduplicate raw customer rows.
pub fn clean_customers(raw: &DataSet) -> PipelineResult<Cleaned<Customer>> {
    let cols = RawColumns::resolve(&raw.schema, &RAW_CUSTOMER_COLUMNS)?;
    // Keyed on the parsed id so "7", "07" and "7.0" collide; unreadable ids share the `None` key.
    let mut seen: HashSet<Option<i64>> = HashSet::new();
    let mut drops = DropCounts::default();
    let mut records = Vec::with_capacity(raw.row_count());

    for row in &raw.rows {
        let id = cols.text(row, 0).and_then(parse_id);
        if !seen.insert(id) {
            drops.record(DropReason::Duplicate);
            continue;
        }

        let registered_at = match timestamp_cell(cols.text(row, 3)) {
            TimestampCell::Invalid => {
                drops.record(DropReason::UnparseableDate);
                continue;
            }
            TimestampCell::Missing => None,
            TimestampCell::Parsed(ts) => Some(ts),
        };
        let email = cols.text(row, 2).map(str::to_lowercase);

        let fields = (
            id,
            cols.text(row, 1),
            email,
            registered_at,
            cols.text(row, 4),
        );
        match fields {
            (Some(id), Some(name), Some(email), Some(registered_at), Some(country)) => {
                records.push(Customer {
                    id,
                    name: name.to_string(),
                    email,
                    registered_at,
                    country: country.to_string(),
                });
            }
            _ => drops.record(DropReason::MissingField),
        }
    }

    Ok(Cleaned {
        records,
        rows_in: raw.row_count(),
        drops,
    })
}

/// Validate, deduplicate and enrich raw purchase rows.
pub fn clean_purchases(raw: &DataSet) -> PipelineResult<Cleaned<Purchase>> {
    let cols = RawColumns::resolve(&raw.schema, &RAW_PURCHASE_COLUMNS)?;
    // Keyed on the parsed id so "7", "07" and "7.0" collide; unreadable ids share the `None` key.
    let mut seen: HashSet<Option<i64>> = HashSet::new();
    let mut drops = DropCounts::default();
    let mut records = Vec::with_capacity(raw.row_count());

    for row in &raw.rows {
        let id = cols.text(row, 0).and_then(parse_id);
        if !seen.insert(id) {
            drops.record(DropReason::Duplicate);
            continue;
        }

        let purchased_at = match timestamp_cell(cols.text(row, 4)) {
            TimestampCell::Invalid => {
                drops.record(DropReason::UnparseableDate);
                continue;
            }
            TimestampCell::Missing => None,
            TimestampCell::Parsed(ts) => Some(ts),
        };

        let amount = cols.text(row, 3).and_then(parse_amount);
        if let Some(a) = amount {
            if a <= 0.0 {
                drops.record(DropReason::NonPositiveAmount);
                continue;
            }
        }

        let fields = (
            id,
            cols.text(row, 1).and_then(parse_id),
            cols.text(row, 2),
            amount,
            purchased_at,
        );
        match fields {
            (Some(id), Some(customer_id), Some(product), Some(amount), Some(purchased_at)) => {
                records.push(Purchase::new(id, customer_id, product, amount, purchased_at));
            }
            _ => drops.record(DropReason::MissingField),
        }
    }

    Ok(Cleaned {
        records,
        rows_in: raw.row_count(),
        drops,
    })
}

fn log_cleaned<T>(table: &str, cleaned: &Cleaned<T>) {
    let d = &cleaned.drops;
    tracing::info!(
        table,
        rows_in = cleaned.rows_in,
        rows_out = cleaned.records.len(),
        "cleaned raw table"
    );
    if d.total() > 0 {
        tracing::warn!(
            table,
            duplicate = d.duplicate,
            unparseable_date = d.unparseable_date,
            non_positive_amount = d.non_positive_amount,
            missing_field = d.missing_field,
            "dropped invalid rows"
        );
    }
}

fn read_raw(ctx: &PipelineContext, key: &str, columns: &[&str]) -> PipelineResult<DataSet> {
    let bytes = ctx.objects.get(&ctx.layout.raw_bucket, key)?;
    read_raw_table(&bytes, &Schema::utf8(columns))
}

fn write_intermediate(ctx: &PipelineContext, key: &str, dataset: &DataSet) -> PipelineResult<()> {
    let bytes = write_parquet(dataset)?;
    let bucket = &ctx.layout.intermediate_bucket;
    ctx.objects.ensure_bucket(bucket)?;
    ctx.objects.put(bucket, key, &bytes)?;
    tracing::debug!(bucket = %bucket, key, bytes = bytes.len(), "wrote intermediate artifact");
    Ok(())
}

/// Unit `clean_customers`: raw customers CSV → intermediate `clients.parquet`.
pub fn run_clean_customers(ctx: &PipelineContext) -> PipelineResult<CleaningReport> {
    let raw = read_raw(ctx, &ctx.layout.raw_customers, &RAW_CUSTOMER_COLUMNS)?;
    let cleaned = clean_customers(&raw)?;
    log_cleaned("customers", &cleaned);
    write_intermediate(
        ctx,
        StorageLayout::CLEAN_CUSTOMERS_KEY,
        &to_dataset(&cleaned.records),
    )?;
    Ok(CleaningReport::from(&cleaned))
}

/// Unit `clean_purchases`: raw purchases CSV → intermediate `achats.parquet`.
pub fn run_clean_purchases(ctx: &PipelineContext) -> PipelineResult<CleaningReport> {
    let raw = read_raw(ctx, &ctx.layout.raw_purchases, &RAW_PURCHASE_COLUMNS)?;
    let cleaned = clean_purchases(&raw)?;
    log_cleaned("purchases", &cleaned);
    write_intermediate(
        ctx,
        StorageLayout::CLEAN_PURCHASES_KEY,
        &to_dataset(&cleaned.records),
    )?;
    Ok(CleaningReport::from(&cleaned))
}

/// Upload raw customer and purchase CSV content into the raw tier.
///
/// Both files are checked for their required columns before anything is written.
pub fn load_raw(ctx: &PipelineContext, customers: &[u8], purchases: &[u8]) -> PipelineResult<()> {
    read_raw_table(customers, &Schema::utf8(&RAW_CUSTOMER_COLUMNS))?;
    read_raw_table(purchases, &Schema::utf8(&RAW_PURCHASE_COLUMNS))?;

    let layout = &ctx.layout;
    ctx.objects.ensure_bucket(&layout.raw_bucket)?;
    ctx.objects.put(&layout.raw_bucket, &layout.raw_customers, customers)?;
    ctx.objects.put(&layout.raw_bucket, &layout.raw_purchases, purchases)?;
    tracing::info!(
        bucket = %layout.raw_bucket,
        customers = %layout.raw_customers,
        purchases = %layout.raw_purchases,
        "uploaded raw objects"
    );
    Ok(())
}
