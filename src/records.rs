//! Typed records for every tier, and their mapping to schema-carrying [`DataSet`]s.
//!
//! Column names are fixed: the raw CSV headers, the Parquet columns and the published document
//! fields all use the same names, because downstream readers of the published collections
//! depend on them.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Serialize, Serializer};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Canonical string form of timestamps in published documents.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw customer columns, as found in the raw tier CSV.
pub const RAW_CUSTOMER_COLUMNS: [&str; 5] = ["id_client", "nom", "email", "date_inscription", "pays"];

/// Raw purchase columns, as found in the raw tier CSV.
pub const RAW_PURCHASE_COLUMNS: [&str; 5] = ["id_achat", "id_client", "produit", "montant", "date_achat"];

/// Conversion between a typed record and one row of a [`DataSet`].
pub trait Record: Sized {
    /// Schema of the artifact holding these records.
    fn schema() -> Schema;

    /// Cells in [`Record::schema`] order.
    fn to_row(&self) -> Vec<Value>;

    /// Rebuild a record from a row in [`Record::schema`] order. `row_num` is 1-based.
    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self>;
}

/// Build a dataset from typed records.
pub fn to_dataset<R: Record>(records: &[R]) -> DataSet {
    DataSet::new(R::schema(), records.iter().map(R::to_row).collect())
}

/// Rebuild typed records from a dataset shaped like `R::schema()`.
pub fn from_dataset<R: Record>(dataset: &DataSet) -> PipelineResult<Vec<R>> {
    let expected = R::schema();
    if dataset.schema != expected {
        return Err(PipelineError::SchemaMismatch {
            message: format!(
                "expected columns {:?}, found {:?}",
                expected.field_names().collect::<Vec<_>>(),
                dataset.schema.field_names().collect::<Vec<_>>()
            ),
        });
    }
    dataset
        .rows
        .iter()
        .enumerate()
        .map(|(idx0, row)| R::from_row(row, idx0 + 1))
        .collect()
}

/// Positional, typed access to the cells of one row.
struct Cells<'a> {
    row: &'a [Value],
    schema: Schema,
    row_num: usize,
}

impl<'a> Cells<'a> {
    fn new<R: Record>(row: &'a [Value], row_num: usize) -> PipelineResult<Self> {
        let schema = R::schema();
        if row.len() != schema.fields.len() {
            return Err(PipelineError::SchemaMismatch {
                message: format!(
                    "row {row_num} has {} cells, expected {}",
                    row.len(),
                    schema.fields.len()
                ),
            });
        }
        Ok(Self {
            row,
            schema,
            row_num,
        })
    }

    fn error(&self, idx: usize, message: &str) -> PipelineError {
        PipelineError::ParseError {
            row: self.row_num,
            column: self.schema.fields[idx].name.clone(),
            raw: format!("{:?}", self.row[idx]),
            message: message.to_string(),
        }
    }

    fn int(&self, idx: usize) -> PipelineResult<i64> {
        match &self.row[idx] {
            Value::Int64(v) => Ok(*v),
            _ => Err(self.error(idx, "expected integer")),
        }
    }

    fn float(&self, idx: usize) -> PipelineResult<f64> {
        match &self.row[idx] {
            Value::Float64(v) => Ok(*v),
            _ => Err(self.error(idx, "expected number")),
        }
    }

    fn text(&self, idx: usize) -> PipelineResult<String> {
        match &self.row[idx] {
            Value::Utf8(s) => Ok(s.clone()),
            _ => Err(self.error(idx, "expected string")),
        }
    }

    fn date(&self, idx: usize) -> PipelineResult<NaiveDate> {
        match &self.row[idx] {
            Value::Date(d) => Ok(*d),
            _ => Err(self.error(idx, "expected date")),
        }
    }

    fn timestamp(&self, idx: usize) -> PipelineResult<NaiveDateTime> {
        match &self.row[idx] {
            Value::Timestamp(ts) => Ok(*ts),
            _ => Err(self.error(idx, "expected timestamp")),
        }
    }

    fn opt_timestamp(&self, idx: usize) -> PipelineResult<Option<NaiveDateTime>> {
        match &self.row[idx] {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            _ => Err(self.error(idx, "expected timestamp or null")),
        }
    }
}

fn canonical_timestamp<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(CANONICAL_TIMESTAMP_FORMAT))
}

fn canonical_opt_timestamp<S: Serializer>(
    ts: &Option<NaiveDateTime>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => canonical_timestamp(ts, s),
        None => s.serialize_none(),
    }
}

/// Full English weekday name.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// A cleaned customer.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    /// Trimmed, lower-case, never empty.
    pub email: String,
    pub registered_at: NaiveDateTime,
    pub country: String,
}

impl Record for Customer {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id_client", DataType::Int64),
            Field::new("nom", DataType::Utf8),
            Field::new("email", DataType::Utf8),
            Field::new("date_inscription", DataType::Timestamp),
            Field::new("pays", DataType::Utf8),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.id),
            Value::Utf8(self.name.clone()),
            Value::Utf8(self.email.clone()),
            Value::Timestamp(self.registered_at),
            Value::Utf8(self.country.clone()),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        Ok(Self {
            id: c.int(0)?,
            name: c.text(1)?,
            email: c.text(2)?,
            registered_at: c.timestamp(3)?,
            country: c.text(4)?,
        })
    }
}

/// A cleaned purchase, with calendar fields derived from its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub id: i64,
    /// Not checked against the customer set at cleaning time.
    pub customer_id: i64,
    pub product: String,
    /// Strictly positive.
    pub amount: f64,
    pub purchased_at: NaiveDateTime,
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub weekday: String,
}

impl Purchase {
    /// Build a purchase and derive `date`, `year`, `month` and `weekday` from `purchased_at`.
    pub fn new(
        id: i64,
        customer_id: i64,
        product: impl Into<String>,
        amount: f64,
        purchased_at: NaiveDateTime,
    ) -> Self {
        let date = purchased_at.date();
        Self {
            id,
            customer_id,
            product: product.into(),
            amount,
            purchased_at,
            date,
            year: date.year(),
            month: date.month(),
            weekday: weekday_name(date.weekday()).to_string(),
        }
    }

    /// `YYYY-MM` key of the purchase month.
    pub fn year_month(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

impl Record for Purchase {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id_achat", DataType::Int64),
            Field::new("id_client", DataType::Int64),
            Field::new("produit", DataType::Utf8),
            Field::new("montant", DataType::Float64),
            Field::new("date_achat", DataType::Timestamp),
            Field::new("date", DataType::Date),
            Field::new("annee", DataType::Int64),
            Field::new("mois", DataType::Int64),
            Field::new("jour_semaine", DataType::Utf8),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.id),
            Value::Int64(self.customer_id),
            Value::Utf8(self.product.clone()),
            Value::Float64(self.amount),
            Value::Timestamp(self.purchased_at),
            Value::Date(self.date),
            Value::Int64(i64::from(self.year)),
            Value::Int64(i64::from(self.month)),
            Value::Utf8(self.weekday.clone()),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        let year = i32::try_from(c.int(6)?).map_err(|_| c.error(6, "year out of range"))?;
        let month = u32::try_from(c.int(7)?).map_err(|_| c.error(7, "month out of range"))?;
        Ok(Self {
            id: c.int(0)?,
            customer_id: c.int(1)?,
            product: c.text(2)?,
            amount: c.float(3)?,
            purchased_at: c.timestamp(4)?,
            date: c.date(5)?,
            year,
            month,
            weekday: c.text(8)?,
        })
    }
}

/// Per-customer view: every cleaned customer, with purchase counters (zero when none).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerStats {
    #[serde(rename = "id_client")]
    pub customer_id: i64,
    #[serde(rename = "nom")]
    pub name: String,
    pub email: String,
    #[serde(rename = "date_inscription", serialize_with = "canonical_timestamp")]
    pub registered_at: NaiveDateTime,
    #[serde(rename = "pays")]
    pub country: String,
    #[serde(rename = "nombre_achats")]
    pub purchase_count: i64,
    #[serde(rename = "montant_total")]
    pub total_amount: f64,
    #[serde(rename = "montant_moyen")]
    pub mean_amount: f64,
    #[serde(rename = "premier_achat", serialize_with = "canonical_opt_timestamp")]
    pub first_purchase: Option<NaiveDateTime>,
    #[serde(rename = "dernier_achat", serialize_with = "canonical_opt_timestamp")]
    pub last_purchase: Option<NaiveDateTime>,
}

impl Record for CustomerStats {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id_client", DataType::Int64),
            Field::new("nom", DataType::Utf8),
            Field::new("email", DataType::Utf8),
            Field::new("date_inscription", DataType::Timestamp),
            Field::new("pays", DataType::Utf8),
            Field::new("nombre_achats", DataType::Int64),
            Field::new("montant_total", DataType::Float64),
            Field::new("montant_moyen", DataType::Float64),
            Field::new("premier_achat", DataType::Timestamp),
            Field::new("dernier_achat", DataType::Timestamp),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.customer_id),
            Value::Utf8(self.name.clone()),
            Value::Utf8(self.email.clone()),
            Value::Timestamp(self.registered_at),
            Value::Utf8(self.country.clone()),
            Value::Int64(self.purchase_count),
            Value::Float64(self.total_amount),
            Value::Float64(self.mean_amount),
            Value::from(self.first_purchase),
            Value::from(self.last_purchase),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        Ok(Self {
            customer_id: c.int(0)?,
            name: c.text(1)?,
            email: c.text(2)?,
            registered_at: c.timestamp(3)?,
            country: c.text(4)?,
            purchase_count: c.int(5)?,
            total_amount: c.float(6)?,
            mean_amount: c.float(7)?,
            first_purchase: c.opt_timestamp(8)?,
            last_purchase: c.opt_timestamp(9)?,
        })
    }
}

/// Per-product view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductStats {
    #[serde(rename = "produit")]
    pub product: String,
    #[serde(rename = "nombre_ventes")]
    pub sale_count: i64,
    #[serde(rename = "chiffre_affaires")]
    pub revenue: f64,
    #[serde(rename = "prix_moyen")]
    pub mean_price: f64,
    #[serde(rename = "prix_min")]
    pub min_price: f64,
    #[serde(rename = "prix_max")]
    pub max_price: f64,
}

impl Record for ProductStats {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("produit", DataType::Utf8),
            Field::new("nombre_ventes", DataType::Int64),
            Field::new("chiffre_affaires", DataType::Float64),
            Field::new("prix_moyen", DataType::Float64),
            Field::new("prix_min", DataType::Float64),
            Field::new("prix_max", DataType::Float64),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Utf8(self.product.clone()),
            Value::Int64(self.sale_count),
            Value::Float64(self.revenue),
            Value::Float64(self.mean_price),
            Value::Float64(self.min_price),
            Value::Float64(self.max_price),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        Ok(Self {
            product: c.text(0)?,
            sale_count: c.int(1)?,
            revenue: c.float(2)?,
            mean_price: c.float(3)?,
            min_price: c.float(4)?,
            max_price: c.float(5)?,
        })
    }
}

/// Per-month view, keyed by `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    #[serde(rename = "annee_mois")]
    pub year_month: String,
    #[serde(rename = "nombre_achats")]
    pub purchase_count: i64,
    #[serde(rename = "chiffre_affaires")]
    pub revenue: f64,
    #[serde(rename = "panier_moyen")]
    pub mean_basket: f64,
    #[serde(rename = "nombre_clients_uniques")]
    pub unique_customers: i64,
}

impl Record for MonthlyStats {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("annee_mois", DataType::Utf8),
            Field::new("nombre_achats", DataType::Int64),
            Field::new("chiffre_affaires", DataType::Float64),
            Field::new("panier_moyen", DataType::Float64),
            Field::new("nombre_clients_uniques", DataType::Int64),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Utf8(self.year_month.clone()),
            Value::Int64(self.purchase_count),
            Value::Float64(self.revenue),
            Value::Float64(self.mean_basket),
            Value::Int64(self.unique_customers),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        Ok(Self {
            year_month: c.text(0)?,
            purchase_count: c.int(1)?,
            revenue: c.float(2)?,
            mean_basket: c.float(3)?,
            unique_customers: c.int(4)?,
        })
    }
}

/// Per-country view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryStats {
    #[serde(rename = "pays")]
    pub country: String,
    #[serde(rename = "nombre_clients")]
    pub customer_count: i64,
    #[serde(rename = "nombre_achats")]
    pub purchase_count: i64,
    #[serde(rename = "chiffre_affaires")]
    pub revenue: f64,
    #[serde(rename = "panier_moyen")]
    pub mean_basket: f64,
}

impl Record for CountryStats {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("pays", DataType::Utf8),
            Field::new("nombre_clients", DataType::Int64),
            Field::new("nombre_achats", DataType::Int64),
            Field::new("chiffre_affaires", DataType::Float64),
            Field::new("panier_moyen", DataType::Float64),
        ])
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Utf8(self.country.clone()),
            Value::Int64(self.customer_count),
            Value::Int64(self.purchase_count),
            Value::Float64(self.revenue),
            Value::Float64(self.mean_basket),
        ]
    }

    fn from_row(row: &[Value], row_num: usize) -> PipelineResult<Self> {
        let c = Cells::new::<Self>(row, row_num)?;
        Ok(Self {
            country: c.text(0)?,
            customer_count: c.int(1)?,
            purchase_count: c.int(2)?,
            revenue: c.float(3)?,
            mean_basket: c.float(4)?,
        })
    }
}

/// The four derived views. Each has one aggregate-tier object and one published collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    CustomerStats,
    ProductStats,
    MonthlyStats,
    CountryStats,
}

impl ViewKind {
    pub const ALL: [ViewKind; 4] = [
        ViewKind::CustomerStats,
        ViewKind::ProductStats,
        ViewKind::MonthlyStats,
        ViewKind::CountryStats,
    ];

    /// Document-store collection name.
    pub fn collection(self) -> &'static str {
        match self {
            ViewKind::CustomerStats => "clients_stats",
            ViewKind::ProductStats => "product_stats",
            ViewKind::MonthlyStats => "monthly_stats",
            ViewKind::CountryStats => "country_stats",
        }
    }

    /// Aggregate-tier object key.
    pub fn object_key(self) -> &'static str {
        match self {
            ViewKind::CustomerStats => "clients_stats.parquet",
            ViewKind::ProductStats => "product_stats.parquet",
            ViewKind::MonthlyStats => "monthly_stats.parquet",
            ViewKind::CountryStats => "country_stats.parquet",
        }
    }

    /// Short name used in unit names and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::CustomerStats => "customer_stats",
            ViewKind::ProductStats => "product_stats",
            ViewKind::MonthlyStats => "monthly_stats",
            ViewKind::CountryStats => "country_stats",
        }
    }

    /// Artifact schema of the view.
    pub fn schema(self) -> Schema {
        match self {
            ViewKind::CustomerStats => CustomerStats::schema(),
            ViewKind::ProductStats => ProductStats::schema(),
            ViewKind::MonthlyStats => MonthlyStats::schema(),
            ViewKind::CountryStats => CountryStats::schema(),
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn purchase_derives_calendar_fields_from_timestamp() {
        let p = Purchase::new(1, 10, "A", 50.0, ts(2024, 1, 5, 9));
        assert_eq!(p.date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!((p.year, p.month), (2024, 1));
        assert_eq!(p.weekday, "Friday");
        assert_eq!(p.year_month(), "2024-01");
    }

    #[test]
    fn purchases_survive_dataset_conversion() {
        let purchases = vec![
            Purchase::new(1, 10, "A", 50.0, ts(2024, 1, 5, 9)),
            Purchase::new(2, 11, "B", 12.5, ts(2024, 2, 29, 23)),
        ];
        let ds = to_dataset(&purchases);
        assert_eq!(ds.schema, Purchase::schema());
        let back: Vec<Purchase> = from_dataset(&ds).unwrap();
        assert_eq!(back, purchases);
    }

    #[test]
    fn from_dataset_rejects_a_foreign_schema() {
        let ds = to_dataset::<ProductStats>(&[]);
        let err = from_dataset::<MonthlyStats>(&ds).unwrap_err();
        assert!(err.to_string().contains("expected columns"));
    }

    #[test]
    fn from_row_reports_the_offending_column() {
        let mut row = ProductStats {
            product: "A".to_string(),
            sale_count: 1,
            revenue: 1.0,
            mean_price: 1.0,
            min_price: 1.0,
            max_price: 1.0,
        }
        .to_row();
        row[1] = Value::Utf8("one".to_string());
        let err = ProductStats::from_row(&row, 3).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("column 'nombre_ventes'"));
    }

    #[test]
    fn customer_stats_document_uses_wire_names_and_canonical_timestamps() {
        let stats = CustomerStats {
            customer_id: 10,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            registered_at: ts(2023, 12, 1, 0),
            country: "FR".to_string(),
            purchase_count: 0,
            total_amount: 0.0,
            mean_amount: 0.0,
            first_purchase: None,
            last_purchase: Some(ts(2024, 1, 5, 14)),
        };
        let doc = serde_json::to_value(&stats).unwrap();
        assert_eq!(doc["id_client"], 10);
        assert_eq!(doc["date_inscription"], "2023-12-01 00:00:00");
        assert_eq!(doc["premier_achat"], serde_json::Value::Null);
        assert_eq!(doc["dernier_achat"], "2024-01-05 14:00:00");
        assert_eq!(doc.as_object().unwrap().len(), CustomerStats::schema().fields.len());
    }

    #[test]
    fn view_names_are_stable() {
        let names: Vec<_> = ViewKind::ALL.iter().map(|v| v.collection()).collect();
        assert_eq!(
            names,
            vec!["clients_stats", "product_stats", "monthly_stats", "country_stats"]
        );
        assert_eq!(ViewKind::MonthlyStats.object_key(), "monthly_stats.parquet");
    }
}
