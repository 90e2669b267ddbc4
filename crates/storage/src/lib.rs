use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{RowId, TableId, UserId},
    protocol::{OrderBy, RowPatch, TablePatch, TableRecord, TableRowRecord},
};

/// List/create/update/delete per entity against the backing store.
///
/// Updates are last-write-wins; there is no conflict detection.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_tables(&self, owner_id: &UserId, order: OrderBy) -> Result<Vec<TableRecord>>;
    async fn create_table(&self, record: &TableRecord) -> Result<()>;
    async fn update_table(&self, id: &TableId, patch: &TablePatch) -> Result<()>;
    async fn list_rows(&self, table_id: &TableId, order: OrderBy) -> Result<Vec<TableRowRecord>>;
    async fn create_row(&self, record: &TableRowRecord) -> Result<()>;
    async fn update_row(&self, id: &RowId, patch: &RowPatch) -> Result<()>;
    async fn delete_row(&self, id: &RowId) -> Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory database lives and dies with its single connection.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(database_url, "storage ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for Storage {
    async fn list_tables(&self, owner_id: &UserId, order: OrderBy) -> Result<Vec<TableRecord>> {
        let sql = format!(
            "SELECT id, name, columns, owner_id, created_at, updated_at
             FROM user_tables
             WHERE owner_id = ?
             ORDER BY {}",
            order_clause(order)
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id.as_str())
            .fetch_all(&self.pool)
            .await
            .context("failed to list tables")?;
        rows.iter().map(table_record).collect()
    }

    async fn create_table(&self, record: &TableRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_tables (id, name, columns, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, columns=excluded.columns, updated_at=excluded.updated_at",
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(&record.columns)
        .bind(record.owner_id.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create table {}", record.id))?;
        Ok(())
    }

    async fn update_table(&self, id: &TableId, patch: &TablePatch) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_tables
             SET name = COALESCE(?, name), columns = COALESCE(?, columns), updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.name.as_deref())
        .bind(patch.columns.as_deref())
        .bind(patch.updated_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update table {id}"))?;
        if result.rows_affected() == 0 {
            bail!("table {id} not found");
        }
        Ok(())
    }

    async fn list_rows(&self, table_id: &TableId, order: OrderBy) -> Result<Vec<TableRowRecord>> {
        let sql = format!(
            "SELECT id, table_id, data, created_at, updated_at
             FROM table_rows
             WHERE table_id = ?
             ORDER BY {}",
            order_clause(order)
        );
        let rows = sqlx::query(&sql)
            .bind(table_id.as_str())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list rows of table {table_id}"))?;
        rows.iter().map(row_record).collect()
    }

    async fn create_row(&self, record: &TableRowRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_rows (id, table_id, data, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data=excluded.data, updated_at=excluded.updated_at",
        )
        .bind(record.id.as_str())
        .bind(record.table_id.as_str())
        .bind(&record.data)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create row {}", record.id))?;
        Ok(())
    }

    async fn update_row(&self, id: &RowId, patch: &RowPatch) -> Result<()> {
        let result = sqlx::query("UPDATE table_rows SET data = ?, updated_at = ? WHERE id = ?")
            .bind(&patch.data)
            .bind(patch.updated_at)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update row {id}"))?;
        if result.rows_affected() == 0 {
            bail!("row {id} not found");
        }
        Ok(())
    }

    async fn delete_row(&self, id: &RowId) -> Result<()> {
        let result = sqlx::query("DELETE FROM table_rows WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete row {id}"))?;
        if result.rows_affected() == 0 {
            bail!("row {id} not found");
        }
        Ok(())
    }
}

fn order_clause(order: OrderBy) -> &'static str {
    // rowid breaks ties between records written within the same instant.
    match order {
        OrderBy::CreatedAtAsc => "created_at ASC, rowid ASC",
        OrderBy::CreatedAtDesc => "created_at DESC, rowid DESC",
        OrderBy::UpdatedAtDesc => "updated_at DESC, rowid DESC",
    }
}

fn table_record(r: &SqliteRow) -> Result<TableRecord> {
    Ok(TableRecord {
        id: TableId(r.try_get::<String, _>("id")?),
        name: r.try_get::<String, _>("name")?,
        columns: r.try_get::<String, _>("columns")?,
        owner_id: UserId(r.try_get::<String, _>("owner_id")?),
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_record(r: &SqliteRow) -> Result<TableRowRecord> {
    Ok(TableRowRecord {
        id: RowId(r.try_get::<String, _>("id")?),
        table_id: TableId(r.try_get::<String, _>("table_id")?),
        data: r.try_get::<String, _>("data")?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
