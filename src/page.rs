use std::sync::Arc;

use serde::Deserialize;

use crate::cells::{Cell, FieldType};
use crate::warehouse::Row;

/// The schema of a result set
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// One column of a result set, or one member of a RECORD column
#[derive(Deserialize, Debug, Clone)]
pub struct FieldSchema {
    /// The name of the column
    pub name: String,
    #[serde(rename = "type")]
    /// The type BigQuery reports for the column
    pub field_type: FieldType,
    /// NULLABLE, REQUIRED or REPEATED
    pub mode: Option<String>,
    /// Members of a RECORD column
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    /// Convert the `v` slot of a row into a Cell, following this field's type and mode
    pub fn to_cell(&self, value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Array(items) if self.is_repeated() => Cell::Repeated(
                items
                    .iter()
                    .map(|item| self.to_single_cell(item.get("v").unwrap_or(&serde_json::Value::Null)))
                    .collect(),
            ),
            value => self.to_single_cell(value),
        }
    }

    fn to_single_cell(&self, value: &serde_json::Value) -> Cell {
        match (&self.field_type, value) {
            (_, serde_json::Value::Null) => Cell::Null,
            (FieldType::Record, serde_json::Value::Object(_)) => {
                let members = value
                    .get("f")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                Cell::Record(
                    members
                        .iter()
                        .zip(&self.fields)
                        .map(|(member, field)| {
                            let v = member.get("v").unwrap_or(&serde_json::Value::Null);
                            (field.name.clone(), field.to_cell(v))
                        })
                        .collect(),
                )
            }
            (field_type, serde_json::Value::String(text)) => field_type.to_cell(text),
            (_, other) => Cell::Json(other.clone()),
        }
    }
}

/// A row in the REST `{"f": [{"v": ...}]}` format
#[derive(Deserialize, Debug, Clone)]
pub struct WireRow {
    #[serde(default)]
    pub f: Vec<WireCell>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WireCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

/// One page of a query result
pub struct Page {
    pub(crate) schema: Arc<Schema>,
    pub(crate) rows: Vec<WireRow>,
    pub(crate) index: usize,
}

impl Page {
    pub fn new(schema: Arc<Schema>, rows: Vec<WireRow>, index: usize) -> Page {
        Page {
            schema,
            rows,
            index,
        }
    }

    /// Get the index of this page, counting from zero
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get the number of rows in just this page
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Convert the page into `Cell`s in a list of lists format
    ///
    /// This most closely matches the format of the response from BigQuery
    pub fn cells(&self) -> Vec<Vec<Cell>> {
        self.rows
            .iter()
            .map(|row| {
                row.f
                    .iter()
                    .zip(&self.schema.fields)
                    .map(|(cell, field)| field.to_cell(&cell.v))
                    .collect()
            })
            .collect()
    }

    /// Convert the page into `serde_json::Value`s in a list of lists format
    pub fn json_table(&self) -> Vec<Vec<serde_json::Value>> {
        self.cells()
            .into_iter()
            .map(|row| row.into_iter().map(|cell| cell.into()).collect())
            .collect()
    }

    /// Convert the page into rows keyed by column name, in column order
    pub fn json_objects(&self) -> Vec<Row> {
        self.json_table()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .map(|(i, cell)| (self.schema.fields[i].name.clone(), cell))
                    .collect()
            })
            .collect()
    }
}
