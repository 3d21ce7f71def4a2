//! Tabular payload exchanged between the codecs and the typed records.
//!
//! A tier artifact is decoded into a [`DataSet`] (a [`Schema`] plus row-major [`Value`] cells)
//! before [`crate::records`] turns it into typed rows, and encoded from one on the way back.
//! Raw-tier tables use an all-text schema; cleaning does the typing.

use chrono::{NaiveDate, NaiveDateTime};

/// Column types an artifact can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int64,
    Float64,
    Utf8,
    Date,
    /// No time zone; stored with microsecond precision.
    Timestamp,
}

/// Column name and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered columns of a table. Column names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// All-text schema over `names`, as used for raw CSV input.
    pub fn utf8(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| Field::new(*n, DataType::Utf8)).collect())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Position of the column called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Empty CSV cell or absent optional column value.
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text of a [`Value::Utf8`] cell; `None` for every other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<NaiveDateTime>> for Value {
    fn from(ts: Option<NaiveDateTime>) -> Self {
        ts.map_or(Value::Null, Value::Timestamp)
    }
}

/// Schema plus rows; every row has one cell per schema field, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    pub schema: Schema,
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DataType, Field, Schema, Value};

    #[test]
    fn columns_are_located_by_name() {
        let schema = Schema::new(vec![
            Field::new("id_client", DataType::Int64),
            Field::new("pays", DataType::Utf8),
        ]);
        assert_eq!(schema.index_of("pays"), Some(1));
        assert_eq!(schema.index_of("segment"), None);
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["id_client", "pays"]
        );
    }

    #[test]
    fn raw_schema_is_all_text() {
        let schema = Schema::utf8(&["id_achat", "montant"]);
        assert!(schema.fields.iter().all(|f| f.data_type == DataType::Utf8));
    }

    #[test]
    fn optional_timestamps_map_to_null() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(Value::from(Some(ts)), Value::Timestamp(ts));
        assert!(Value::from(None).is_null());
        assert_eq!(Value::Utf8("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Int64(1).as_str(), None);
    }
}
