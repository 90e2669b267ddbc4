use thiserror::Error;

use crate::domain::{ColumnId, ColumnType, RowId, TableId};

/// Rejections raised before any remote call is issued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("table name must not be empty")]
    EmptyTableName,
    #[error("a table needs at least one column")]
    NoColumns,
    #[error("column name must not be empty")]
    EmptyColumnName,
    #[error("unknown table {0}")]
    UnknownTable(TableId),
    #[error("no table is active")]
    NoActiveTable,
    #[error("unknown column {0}")]
    UnknownColumn(ColumnId),
    #[error("unknown row {0}")]
    UnknownRow(RowId),
    #[error("column '{column}' expects a {expected} value, got '{value}'")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        value: String,
    },
    #[error("'{value}' is not a number (column '{column}')")]
    InvalidNumber { column: String, value: String },
    #[error("'{value}' is not a YYYY-MM-DD date (column '{column}')")]
    InvalidDate { column: String, value: String },
    #[error("'{value}' is not one of the options of column '{column}'")]
    OptionNotAllowed { column: String, value: String },
    #[error("column '{column}' requires a value")]
    Required { column: String },
    #[error("unknown column type '{0}'")]
    UnknownColumnType(String),
}
