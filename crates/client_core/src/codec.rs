//! Blob encoding for the remote store: one JSON array of columns per table, one
//! JSON object of cell values per row.

use serde_json::{Map, Value};
use shared::{
    domain::{CellValue, Column, ColumnId, Row, RowData, Table},
    protocol::{TableRecord, TableRowRecord},
};

use crate::error::MutationError;

pub fn encode_columns(columns: &[Column]) -> Result<String, MutationError> {
    serde_json::to_string(columns).map_err(|source| MutationError::Encode {
        entity: "columns",
        source,
    })
}

pub fn decode_columns(table_id: &str, blob: &str) -> Result<Vec<Column>, MutationError> {
    serde_json::from_str(blob).map_err(|source| MutationError::Decode {
        entity: "table",
        id: table_id.to_string(),
        source,
    })
}

pub fn encode_row_data(data: &RowData) -> Result<String, MutationError> {
    serde_json::to_string(data).map_err(|source| MutationError::Encode {
        entity: "row data",
        source,
    })
}

/// `null` entries are dropped; arrays and objects are kept as their JSON text.
pub fn decode_row_data(row_id: &str, blob: &str) -> Result<RowData, MutationError> {
    let raw: Map<String, Value> =
        serde_json::from_str(blob).map_err(|source| MutationError::Decode {
            entity: "row",
            id: row_id.to_string(),
            source,
        })?;

    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Bool(b) => CellValue::Bool(b),
                Value::Number(n) => CellValue::Number(n.as_f64()?),
                Value::String(s) => CellValue::Text(s),
                other => CellValue::Text(other.to_string()),
            };
            Some((ColumnId(key), value))
        })
        .collect())
}

pub fn table_from_record(record: TableRecord) -> Result<Table, MutationError> {
    let columns = decode_columns(record.id.as_str(), &record.columns)?;
    Ok(Table {
        id: record.id,
        name: record.name,
        columns,
        rows: Vec::new(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        owner_id: record.owner_id,
    })
}

pub fn row_from_record(record: TableRowRecord) -> Result<Row, MutationError> {
    let data = decode_row_data(record.id.as_str(), &record.data)?;
    Ok(Row {
        id: record.id,
        data,
    })
}
