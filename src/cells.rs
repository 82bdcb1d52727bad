use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{
    naive::{NaiveDate, NaiveDateTime, NaiveTime},
    DateTime, TimeZone, Utc,
};

/// The BigQuery column types, as named in a result set schema
///
/// Both the legacy names (`INTEGER`, `FLOAT`, `RECORD`) and the standard SQL
/// names (`INT64`, `FLOAT64`, `STRUCT`) appear in responses.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    Numeric,
    Bignumeric,
    #[serde(alias = "BOOL")]
    Boolean,
    String,
    Bytes,
    Timestamp,
    Date,
    Time,
    Datetime,
    Geography,
    Json,
    Interval,
    #[serde(alias = "STRUCT")]
    Record,
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Convert a scalar value, as BigQuery serializes it in the `v` slot, into a Cell.
    ///
    /// Values that fail to parse for their declared type are kept as `Cell::String`,
    /// so a surprising server response never aborts the whole result set.
    /// `RECORD` values are not scalars and are handled by the schema, not here.
    pub fn to_cell(&self, value: &str) -> Cell {
        let text = || Cell::String(value.to_owned());
        match self {
            FieldType::Integer => value.parse().map(Cell::Int).unwrap_or_else(|_| text()),
            FieldType::Float => value.parse().map(Cell::Float).unwrap_or_else(|_| text()),
            FieldType::Numeric | FieldType::Bignumeric => Cell::Numeric(value.to_owned()),
            FieldType::Boolean => match value.to_ascii_lowercase().as_str() {
                "true" => Cell::Boolean(true),
                "false" => Cell::Boolean(false),
                _ => text(),
            },
            FieldType::Bytes => STANDARD.decode(value).map(Cell::Bytes).unwrap_or_else(|_| text()),
            FieldType::Timestamp => parse_timestamp(value).map(Cell::Timestamp).unwrap_or_else(text),
            FieldType::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(Cell::Date)
                .unwrap_or_else(|_| text()),
            FieldType::Time => NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
                .map(Cell::Time)
                .unwrap_or_else(|_| text()),
            FieldType::Datetime => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(Cell::Datetime)
                .unwrap_or_else(|_| text()),
            FieldType::Json => serde_json::from_str(value).map(Cell::Json).unwrap_or_else(|_| text()),
            FieldType::String
            | FieldType::Geography
            | FieldType::Interval
            | FieldType::Record
            | FieldType::Other => text(),
        }
    }
}

/// Timestamps arrive as int64 microseconds when requested,
/// otherwise as floating point seconds such as `1.6725312E9`.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let micros = match value.parse::<i64>() {
        Ok(micros) => micros,
        Err(_) => {
            let seconds: f64 = value.parse().ok()?;
            (seconds * 1e6).round() as i64
        }
    };
    Utc.timestamp_opt(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .single()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    /// NUMERIC and BIGNUMERIC, kept as decimal text to avoid losing precision
    Numeric(String),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Datetime(NaiveDateTime),
    Json(serde_json::Value),
    Record(Vec<(String, Cell)>),
    Repeated(Vec<Cell>),
}

impl From<Cell> for serde_json::Value {
    fn from(cell: Cell) -> Self {
        use serde_json::json;
        use Cell::*;
        match cell {
            Null => json!(null),
            Int(value) => json!(value),
            // JSON has no non-finite numbers; BigQuery spells them as text
            Float(value) if value.is_nan() => json!("NaN"),
            Float(value) if value.is_infinite() => {
                json!(if value > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Float(value) => json!(value),
            Numeric(value) => serde_json::from_str::<serde_json::Number>(&value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::String(value)),
            Boolean(value) => json!(value),
            String(value) => json!(value),
            Bytes(value) => json!(STANDARD.encode(value)),
            Timestamp(value) => json!(value),
            Date(value) => json!(value),
            Time(value) => json!(value),
            Datetime(value) => json!(value),
            Json(value) => value,
            Record(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(name, cell)| (name, cell.into()))
                    .collect(),
            ),
            Repeated(cells) => serde_json::Value::Array(cells.into_iter().map(Into::into).collect()),
        }
    }
}
