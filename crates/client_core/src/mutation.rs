//! Applies table, column and row changes against the remote store and returns the
//! updated local table once the store has confirmed them.
//!
//! Every operation takes the table it acts on by reference and leaves it untouched;
//! the caller swaps in the returned table only on success, so a failed remote call
//! needs no local revert.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use shared::{
    domain::{
        CellValue, Column, ColumnId, ColumnType, ColumnUpdate, Row, RowData, RowId, Table,
        TableId, DEFAULT_COLUMN_NAME,
    },
    error::ValidationError,
    protocol::{OrderBy, RowPatch, TablePatch, TableRecord, TableRowRecord},
};
use storage::RemoteStore;
use tracing::{debug, error, info, warn};

use crate::{
    codec,
    error::{BatchReport, MutationError, RowFailure},
    session::Session,
};

pub struct MutationService<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    session: Session,
}

impl<S: RemoteStore + ?Sized> Clone for MutationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            session: self.session.clone(),
        }
    }
}

impl<S: RemoteStore + ?Sized> MutationService<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Tables of the signed-in user, newest first, without rows.
    pub async fn load_tables(&self) -> Result<Vec<Table>, MutationError> {
        let ticket = self.session.ticket()?;
        let records = self
            .store
            .list_tables(self.session.user_id(), OrderBy::CreatedAtDesc)
            .await
            .map_err(|err| self.failed("load_tables", err))?;
        self.session.ensure_current(ticket)?;

        let mut tables = Vec::with_capacity(records.len());
        for record in records {
            let table_id = record.id.clone();
            match codec::table_from_record(record) {
                Ok(table) => tables.push(table),
                Err(err) => warn!(%table_id, error = %err, "skipping table with unreadable columns"),
            }
        }
        debug!(count = tables.len(), "loaded tables");
        Ok(tables)
    }

    /// Returns `table` with its rows replaced by the stored rows, in insertion order.
    pub async fn load_rows(&self, table: &Table) -> Result<Table, MutationError> {
        let ticket = self.session.ticket()?;
        let records = self
            .store
            .list_rows(&table.id, OrderBy::CreatedAtAsc)
            .await
            .map_err(|err| self.failed("load_rows", err))?;
        self.session.ensure_current(ticket)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let row_id = record.id.clone();
            match codec::row_from_record(record) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(table_id = %table.id, %row_id, error = %err, "skipping unreadable row"),
            }
        }

        let mut next = table.clone();
        next.rows = rows;
        Ok(next)
    }

    /// Creates a row-free table. Only a closed session discards the result: a new
    /// table belongs to the table list, not to the active table.
    pub async fn create_table(
        &self,
        name: &str,
        columns: Vec<Column>,
    ) -> Result<Table, MutationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyTableName.into());
        }
        if columns.is_empty() {
            return Err(ValidationError::NoColumns.into());
        }
        if columns.iter().any(|c| c.name.trim().is_empty()) {
            return Err(ValidationError::EmptyColumnName.into());
        }
        self.session.ticket()?;

        let now = Utc::now();
        let record = TableRecord {
            id: TableId::generate(),
            name: name.to_string(),
            columns: codec::encode_columns(&columns)?,
            owner_id: self.session.user_id().clone(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_table(&record)
            .await
            .map_err(|err| self.failed("create_table", err))?;
        if !self.session.is_active() {
            return Err(MutationError::SessionClosed);
        }

        info!(table_id = %record.id, name, columns = columns.len(), "table created");
        Ok(Table {
            id: record.id,
            name: record.name,
            columns,
            rows: Vec::new(),
            created_at: now,
            updated_at: now,
            owner_id: record.owner_id,
        })
    }

    pub async fn rename_table(&self, table: &Table, name: &str) -> Result<Table, MutationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyTableName.into());
        }
        let ticket = self.session.ticket()?;

        let updated_at = Utc::now();
        self.store
            .update_table(&table.id, &TablePatch::name(name, updated_at))
            .await
            .map_err(|err| self.failed("rename_table", err))?;
        self.session.ensure_current(ticket)?;

        let mut next = table.clone();
        next.name = name.to_string();
        next.updated_at = updated_at;
        Ok(next)
    }

    /// Appends a text column. Existing rows are not backfilled; an absent key
    /// reads as the column type's default.
    pub async fn add_column(&self, table: &Table) -> Result<Table, MutationError> {
        let ticket = self.session.ticket()?;
        let column = Column::new(DEFAULT_COLUMN_NAME, ColumnType::Text);
        let column_id = column.id.clone();

        let mut columns = table.columns.clone();
        columns.push(column);
        let updated_at = self.write_columns(table, &columns, "add_column").await?;
        self.session.ensure_current(ticket)?;

        debug!(table_id = %table.id, %column_id, "column added");
        Ok(Table {
            columns,
            updated_at,
            ..table.clone()
        })
    }

    pub async fn update_column(
        &self,
        table: &Table,
        column_id: &ColumnId,
        update: ColumnUpdate,
    ) -> Result<Table, MutationError> {
        if matches!(&update.name, Some(name) if name.trim().is_empty()) {
            return Err(ValidationError::EmptyColumnName.into());
        }
        let mut columns = table.columns.clone();
        let column = columns
            .iter_mut()
            .find(|c| &c.id == column_id)
            .ok_or_else(|| ValidationError::UnknownColumn(column_id.clone()))?;
        update.apply_to(column);
        let ticket = self.session.ticket()?;

        let updated_at = self.write_columns(table, &columns, "update_column").await?;
        self.session.ensure_current(ticket)?;

        debug!(table_id = %table.id, %column_id, "column updated");
        Ok(Table {
            columns,
            updated_at,
            ..table.clone()
        })
    }

    /// Removes the column and strips its key from every row that carries it.
    ///
    /// Row writes run concurrently. If any of them, or the final column-list
    /// write, fails, rows already rewritten are restored and the error is
    /// [`MutationError::Partial`] whose report says whether the restore landed;
    /// the local table stays as it was.
    pub async fn delete_column(
        &self,
        table: &Table,
        column_id: &ColumnId,
    ) -> Result<Table, MutationError> {
        if table.column(column_id).is_none() {
            return Err(ValidationError::UnknownColumn(column_id.clone()).into());
        }
        let ticket = self.session.ticket()?;

        let columns: Vec<Column> = table
            .columns
            .iter()
            .filter(|c| &c.id != column_id)
            .cloned()
            .collect();
        let stripped: Vec<(&Row, RowData)> = table
            .rows
            .iter()
            .filter(|row| row.has_value(column_id))
            .map(|row| {
                let mut data = row.data.clone();
                data.remove(column_id);
                (row, data)
            })
            .collect();

        let updated_at = Utc::now();
        let writes = stripped
            .iter()
            .map(|(row, data)| self.write_row(&row.id, data, updated_at));
        let results = join_all(writes).await;

        let mut report = BatchReport::default();
        for ((row, _), result) in stripped.iter().zip(results) {
            match result {
                Ok(()) => report.succeeded.push(row.id.clone()),
                Err(err) => report.failed.push(RowFailure {
                    row_id: row.id.clone(),
                    reason: format!("{err:#}"),
                }),
            }
        }

        if !report.is_complete() {
            error!(table_id = %table.id, %column_id, %report, "column delete: row strip failed");
            report.rolled_back = self.restore_rows(table, &report.succeeded).await;
            return Err(MutationError::Partial {
                operation: "delete_column",
                report,
                reconciled: None,
            });
        }

        let columns_updated_at = match self.write_columns(table, &columns, "delete_column").await {
            Ok(at) => at,
            Err(err) => {
                report.rolled_back = self.restore_rows(table, &report.succeeded).await;
                warn!(table_id = %table.id, %column_id, error = %err, %report, "column list write failed after row strip");
                return Err(MutationError::Partial {
                    operation: "delete_column",
                    report,
                    reconciled: None,
                });
            }
        };
        self.session.ensure_current(ticket)?;

        let rows = table
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.data.remove(column_id);
                row
            })
            .collect();
        info!(table_id = %table.id, %column_id, rows = report.succeeded.len(), "column deleted");
        Ok(Table {
            columns,
            rows,
            updated_at: columns_updated_at,
            ..table.clone()
        })
    }

    /// Appends a row holding the default value of every current column.
    pub async fn add_row(&self, table: &Table) -> Result<Table, MutationError> {
        let ticket = self.session.ticket()?;
        let row = Row::with_defaults(RowId::generate(), &table.columns);

        let now = Utc::now();
        let record = TableRowRecord {
            id: row.id.clone(),
            table_id: table.id.clone(),
            data: codec::encode_row_data(&row.data)?,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_row(&record)
            .await
            .map_err(|err| self.failed("add_row", err))?;
        self.session.ensure_current(ticket)?;

        debug!(table_id = %table.id, row_id = %row.id, "row added");
        let mut next = table.clone();
        next.rows.push(row);
        Ok(next)
    }

    /// Writes one cell. The value is validated against the column first and the
    /// whole row data object is persisted.
    pub async fn update_row(
        &self,
        table: &Table,
        row_id: &RowId,
        column_id: &ColumnId,
        value: CellValue,
    ) -> Result<Table, MutationError> {
        let column = table
            .column(column_id)
            .ok_or_else(|| ValidationError::UnknownColumn(column_id.clone()))?;
        let row = table
            .row(row_id)
            .ok_or_else(|| ValidationError::UnknownRow(row_id.clone()))?;
        let value = value.validate_for(column)?;
        let ticket = self.session.ticket()?;

        let mut data = row.data.clone();
        data.insert(column_id.clone(), value);
        self.write_row(row_id, &data, Utc::now())
            .await
            .map_err(|err| self.failed("update_row", err))?;
        self.session.ensure_current(ticket)?;

        let mut next = table.clone();
        if let Some(row) = next.row_mut(row_id) {
            row.data = data;
        }
        Ok(next)
    }

    pub async fn delete_row(&self, table: &Table, row_id: &RowId) -> Result<Table, MutationError> {
        if table.row(row_id).is_none() {
            return Err(ValidationError::UnknownRow(row_id.clone()).into());
        }
        let ticket = self.session.ticket()?;

        self.store
            .delete_row(row_id)
            .await
            .map_err(|err| self.failed("delete_row", err))?;
        self.session.ensure_current(ticket)?;

        debug!(table_id = %table.id, %row_id, "row deleted");
        let mut next = table.clone();
        next.rows.retain(|r| &r.id != row_id);
        Ok(next)
    }

    /// Deletes several rows with concurrent remote calls; a repeated id is deleted
    /// once. On partial failure the error carries the report and a table without
    /// exactly the confirmed rows.
    pub async fn delete_rows(
        &self,
        table: &Table,
        row_ids: &[RowId],
    ) -> Result<Table, MutationError> {
        if let Some(missing) = row_ids.iter().find(|id| table.row(id).is_none()) {
            return Err(ValidationError::UnknownRow(missing.clone()).into());
        }
        let mut seen = HashSet::new();
        let row_ids: Vec<&RowId> = row_ids.iter().filter(|id| seen.insert(*id)).collect();
        if row_ids.is_empty() {
            return Ok(table.clone());
        }
        let ticket = self.session.ticket()?;

        let results = join_all(row_ids.iter().map(|id| self.store.delete_row(id))).await;
        let mut report = BatchReport::default();
        for (row_id, result) in row_ids.into_iter().zip(results) {
            match result {
                Ok(()) => report.succeeded.push(row_id.clone()),
                Err(err) => report.failed.push(RowFailure {
                    row_id: row_id.clone(),
                    reason: format!("{err:#}"),
                }),
            }
        }
        self.session.ensure_current(ticket)?;

        let mut next = table.clone();
        next.rows.retain(|r| !report.succeeded.contains(&r.id));
        if report.is_complete() {
            info!(table_id = %table.id, rows = report.succeeded.len(), "rows deleted");
            return Ok(next);
        }

        error!(table_id = %table.id, %report, "bulk row delete partially failed");
        Err(MutationError::Partial {
            operation: "delete_rows",
            report,
            reconciled: Some(Box::new(next)),
        })
    }

    async fn write_columns(
        &self,
        table: &Table,
        columns: &[Column],
        operation: &'static str,
    ) -> Result<DateTime<Utc>, MutationError> {
        let updated_at = Utc::now();
        let blob = codec::encode_columns(columns)?;
        self.store
            .update_table(&table.id, &TablePatch::columns(blob, updated_at))
            .await
            .map_err(|err| self.failed(operation, err))?;
        Ok(updated_at)
    }

    async fn write_row(
        &self,
        row_id: &RowId,
        data: &RowData,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let blob = codec::encode_row_data(data)?;
        self.store
            .update_row(row_id, &RowPatch {
                data: blob,
                updated_at,
            })
            .await
    }

    /// Rewrites the original data of `row_ids`; true when every restore landed.
    async fn restore_rows(&self, table: &Table, row_ids: &[RowId]) -> bool {
        let updated_at = Utc::now();
        let restores = table
            .rows
            .iter()
            .filter(|row| row_ids.contains(&row.id))
            .map(|row| async move { (&row.id, self.write_row(&row.id, &row.data, updated_at).await) });

        let mut complete = true;
        for (row_id, result) in join_all(restores).await {
            if let Err(err) = result {
                complete = false;
                error!(table_id = %table.id, %row_id, error = ?err, "failed to restore row");
            }
        }
        complete
    }

    fn failed(&self, operation: &'static str, err: anyhow::Error) -> MutationError {
        error!(operation, error = ?err, "remote call failed");
        MutationError::persistence(operation, err)
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
