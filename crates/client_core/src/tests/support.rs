//! Remote store double: a real in-memory `Storage` with switchable failures.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{RowId, TableId, UserId},
    protocol::{OrderBy, RowPatch, TablePatch, TableRecord, TableRowRecord},
};
use storage::{RemoteStore, Storage};
use tokio::sync::Notify;

pub struct FlakyStore {
    inner: Storage,
    failing_ops: Mutex<HashSet<&'static str>>,
    failing_rows: Mutex<HashSet<RowId>>,
    calls: Mutex<Vec<String>>,
    update_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: Storage::new("sqlite::memory:").await.expect("db"),
            failing_ops: Mutex::new(HashSet::new()),
            failing_rows: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            update_gate: Mutex::new(None),
        }
    }

    pub fn fail_op(&self, op: &'static str) {
        self.failing_ops.lock().expect("lock").insert(op);
    }

    pub fn heal(&self) {
        self.failing_ops.lock().expect("lock").clear();
        self.failing_rows.lock().expect("lock").clear();
    }

    /// `update_row` and `delete_row` fail for this row only.
    pub fn fail_row(&self, row_id: &RowId) {
        self.failing_rows
            .lock()
            .expect("lock")
            .insert(row_id.clone());
    }

    /// Holds `update_row` calls until `release` is notified; `entered` fires when one arrives.
    pub fn hold_row_updates(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.update_gate.lock().expect("lock") = Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("lock").clear();
    }

    fn enter(&self, op: &'static str, row_id: Option<&RowId>) -> Result<()> {
        self.calls.lock().expect("lock").push(op.to_string());
        if self.failing_ops.lock().expect("lock").contains(op) {
            return Err(anyhow!("injected failure in {op}"));
        }
        if let Some(row_id) = row_id {
            if self.failing_rows.lock().expect("lock").contains(row_id) {
                return Err(anyhow!("injected failure for row {row_id}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn list_tables(&self, owner_id: &UserId, order: OrderBy) -> Result<Vec<TableRecord>> {
        self.enter("list_tables", None)?;
        self.inner.list_tables(owner_id, order).await
    }

    async fn create_table(&self, record: &TableRecord) -> Result<()> {
        self.enter("create_table", None)?;
        self.inner.create_table(record).await
    }

    async fn update_table(&self, id: &TableId, patch: &TablePatch) -> Result<()> {
        self.enter("update_table", None)?;
        self.inner.update_table(id, patch).await
    }

    async fn list_rows(&self, table_id: &TableId, order: OrderBy) -> Result<Vec<TableRowRecord>> {
        self.enter("list_rows", None)?;
        self.inner.list_rows(table_id, order).await
    }

    async fn create_row(&self, record: &TableRowRecord) -> Result<()> {
        self.enter("create_row", None)?;
        self.inner.create_row(record).await
    }

    async fn update_row(&self, id: &RowId, patch: &RowPatch) -> Result<()> {
        self.enter("update_row", Some(id))?;
        let gate = self.update_gate.lock().expect("lock").clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        self.inner.update_row(id, patch).await
    }

    async fn delete_row(&self, id: &RowId) -> Result<()> {
        self.enter("delete_row", Some(id))?;
        self.inner.delete_row(id).await
    }
}
