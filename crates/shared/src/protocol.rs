//! Record shapes exchanged with the remote store. Columns and row data travel as
//! opaque serialized blobs; only the client decodes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RowId, TableId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedAtAsc,
    CreatedAtDesc,
    UpdatedAtDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: TableId,
    pub name: String,
    pub columns: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRowRecord {
    pub id: RowId,
    pub table_id: TableId,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TablePatch {
    pub fn columns(columns: String, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: None,
            columns: Some(columns),
            updated_at,
        }
    }

    pub fn name(name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: Some(name.into()),
            columns: None,
            updated_at,
        }
    }
}

/// Full row data replacement; the store never merges row blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPatch {
    pub data: String,
    pub updated_at: DateTime<Utc>,
}
