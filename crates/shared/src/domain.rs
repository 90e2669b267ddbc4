use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TableId);
id_newtype!(ColumnId);
id_newtype!(RowId);

pub const DEFAULT_COLUMN_WIDTH: u32 = 150;
pub const DEFAULT_COLUMN_NAME: &str = "New Column";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Date,
    Boolean,
    Select,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Select => "select",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(ColumnType::Text),
            "number" => Some(ColumnType::Number),
            "date" => Some(ColumnType::Date),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            "select" => Some(ColumnType::Select),
            _ => None,
        }
    }

    /// Boolean and select cells commit on a single gesture instead of a free-form field.
    pub fn commits_immediately(self) -> bool {
        matches!(self, ColumnType::Boolean | ColumnType::Select)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: ColumnId::generate(),
            name: name.into(),
            column_type,
            options: None,
            required: None,
            width: Some(DEFAULT_COLUMN_WIDTH),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    pub fn options(&self) -> &[String] {
        self.options.as_deref().unwrap_or_default()
    }

    /// A select column without options exists but cannot hold a non-empty value.
    pub fn is_usable(&self) -> bool {
        self.column_type != ColumnType::Select || !self.options().is_empty()
    }
}

/// Partial column attributes merged by an update; `None` leaves the attribute untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub column_type: Option<ColumnType>,
    pub options: Option<Vec<String>>,
    pub required: Option<bool>,
    pub width: Option<u32>,
}

impl ColumnUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.column_type.is_none()
            && self.options.is_none()
            && self.required.is_none()
            && self.width.is_none()
    }

    pub fn apply_to(&self, column: &mut Column) {
        if let Some(name) = &self.name {
            column.name = name.clone();
        }
        if let Some(column_type) = self.column_type {
            column.column_type = column_type;
        }
        if let Some(options) = &self.options {
            column.options = Some(options.clone());
        }
        if let Some(required) = self.required {
            column.required = Some(required);
        }
        if let Some(width) = self.width {
            column.width = Some(width);
        }
    }
}

/// A cell value. Serialized untagged so a row blob reads `{"col": "", "flag": false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Text(String::new())
    }
}

impl CellValue {
    pub fn default_for(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Boolean => CellValue::Bool(false),
            ColumnType::Text | ColumnType::Number | ColumnType::Date | ColumnType::Select => {
                CellValue::default()
            }
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Text(s) if s.trim().eq_ignore_ascii_case("true") => Some(true),
            CellValue::Text(s) if s.trim().eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) if !s.trim().is_empty() => {
                s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// Checks and normalizes a value before it is written into a cell of `column`.
    pub fn validate_for(self, column: &Column) -> Result<CellValue, ValidationError> {
        let normalized = match column.column_type {
            ColumnType::Text => CellValue::Text(self.to_string()),
            ColumnType::Number => match &self {
                CellValue::Number(n) if n.is_finite() => self,
                CellValue::Text(s) if s.trim().is_empty() => CellValue::default(),
                CellValue::Text(s) => match self.as_number() {
                    Some(n) => CellValue::Number(n),
                    None => {
                        return Err(ValidationError::InvalidNumber {
                            column: column.name.clone(),
                            value: s.clone(),
                        })
                    }
                },
                _ => return Err(mismatch(column, &self)),
            },
            ColumnType::Date => match &self {
                CellValue::Text(s) if s.trim().is_empty() => CellValue::default(),
                CellValue::Text(s) => match NaiveDate::parse_from_str(s.trim(), DATE_FORMAT) {
                    Ok(date) => CellValue::Text(date.format(DATE_FORMAT).to_string()),
                    Err(_) => {
                        return Err(ValidationError::InvalidDate {
                            column: column.name.clone(),
                            value: s.clone(),
                        })
                    }
                },
                _ => return Err(mismatch(column, &self)),
            },
            ColumnType::Boolean => match self.as_bool() {
                Some(b) => CellValue::Bool(b),
                None => return Err(mismatch(column, &self)),
            },
            ColumnType::Select => match &self {
                CellValue::Text(s) if s.is_empty() => self,
                CellValue::Text(s) if column.options().iter().any(|o| o == s) => self,
                CellValue::Text(s) => {
                    return Err(ValidationError::OptionNotAllowed {
                        column: column.name.clone(),
                        value: s.clone(),
                    })
                }
                _ => return Err(mismatch(column, &self)),
            },
        };

        if column.is_required() && normalized.is_empty() {
            return Err(ValidationError::Required {
                column: column.name.clone(),
            });
        }
        Ok(normalized)
    }

    /// Total order used by grid sorting: empty < boolean < number < text.
    ///
    /// Numeric text compares numerically, everything else lexicographically.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        let rank = |value: &CellValue| -> u8 {
            if value.is_empty() {
                0
            } else if matches!(value, CellValue::Bool(_)) {
                1
            } else if value.as_number().is_some() {
                2
            } else {
                3
            }
        };

        match (rank(self), rank(other)) {
            (1, 1) => self.as_bool().cmp(&other.as_bool()),
            (2, 2) => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => Ordering::Equal,
            },
            (3, 3) => self.to_string().cmp(&other.to_string()),
            (a, b) => a.cmp(&b),
        }
    }
}

fn mismatch(column: &Column, value: &CellValue) -> ValidationError {
    ValidationError::TypeMismatch {
        column: column.name.clone(),
        expected: column.column_type,
        value: value.to_string(),
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

pub type RowData = BTreeMap<ColumnId, CellValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub data: RowData,
}

impl Row {
    pub fn with_defaults(id: RowId, columns: &[Column]) -> Self {
        let data = columns
            .iter()
            .map(|column| (column.id.clone(), CellValue::default_for(column.column_type)))
            .collect();
        Self { id, data }
    }

    /// Stored value for `column`, or the type default when the key is absent.
    pub fn value_for(&self, column: &Column) -> CellValue {
        self.data
            .get(&column.id)
            .cloned()
            .unwrap_or_else(|| CellValue::default_for(column.column_type))
    }

    pub fn has_value(&self, column_id: &ColumnId) -> bool {
        self.data.contains_key(column_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_id: UserId,
}

impl Table {
    pub fn column(&self, column_id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == column_id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn row(&self, row_id: &RowId) -> Option<&Row> {
        self.rows.iter().find(|r| &r.id == row_id)
    }

    pub fn row_mut(&mut self, row_id: &RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| &r.id == row_id)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|r| r.id.clone()).collect()
    }

    /// Every row key belongs to a current column.
    pub fn keys_are_consistent(&self) -> bool {
        self.rows
            .iter()
            .all(|row| row.data.keys().all(|key| self.column(key).is_some()))
    }
}
