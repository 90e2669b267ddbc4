//! Table list, active-table selection and the table creation flow. The workspace
//! owns the user's tables and routes grid intents through the mutation service.

use std::sync::Arc;

use shared::{
    domain::{Column, ColumnId, ColumnType, Row, RowId, Table, TableId},
    error::ValidationError,
};
use storage::RemoteStore;
use tracing::{debug, info, warn};

use crate::{
    error::MutationError,
    grid::{GridEngine, GridIntent},
    mutation::MutationService,
    session::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// One column of the table creation form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDraft {
    pub name: String,
    pub column_type: ColumnType,
    /// Comma-separated choices, read only for select columns.
    pub options: String,
    pub required: bool,
}

impl ColumnDraft {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Parses `Name:type[:opt1,opt2]`, the form used on the command line.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let mut parts = raw.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyColumnName);
        }
        let column_type = match parts.next() {
            Some(raw) => ColumnType::parse(raw)
                .ok_or_else(|| ValidationError::UnknownColumnType(raw.trim().to_string()))?,
            None => ColumnType::Text,
        };
        Ok(Self {
            name: name.to_string(),
            column_type,
            options: parts.next().unwrap_or_default().to_string(),
            required: false,
        })
    }

    pub fn to_column(&self) -> Column {
        let column = Column::new(self.name.trim(), self.column_type);
        let column = if self.required {
            column.with_required(true)
        } else {
            column
        };
        if self.column_type == ColumnType::Select {
            column.with_options(parse_options(&self.options))
        } else {
            column
        }
    }
}

pub fn parse_options(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableForm {
    pub name: String,
    pub columns: Vec<ColumnDraft>,
}

pub struct Workspace<S: RemoteStore + ?Sized> {
    service: MutationService<S>,
    tables: Vec<Table>,
    active: Option<TableId>,
    grid: GridEngine,
    notifications: Vec<Notification>,
}

impl<S: RemoteStore + ?Sized> Workspace<S> {
    /// Loads the signed-in user's table list; no table is active yet.
    pub async fn open(store: Arc<S>, session: Session) -> Result<Self, MutationError> {
        let service = MutationService::new(store, session);
        let tables = service.load_tables().await?;
        info!(user_id = %service.session().user_id(), tables = tables.len(), "workspace opened");
        Ok(Self {
            service,
            tables,
            active: None,
            grid: GridEngine::new(),
            notifications: Vec::new(),
        })
    }

    pub fn service(&self) -> &MutationService<S> {
        &self.service
    }

    pub fn session(&self) -> &Session {
        self.service.session()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Case-insensitive substring match on table names; an empty query matches all.
    pub fn search(&self, query: &str) -> Vec<&Table> {
        let query = query.trim().to_lowercase();
        self.tables
            .iter()
            .filter(|table| query.is_empty() || table.name.to_lowercase().contains(&query))
            .collect()
    }

    pub fn find_table(&self, id_or_name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.id.as_str() == id_or_name)
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(id_or_name.trim()))
            })
    }

    pub fn active_table(&self) -> Option<&Table> {
        let id = self.active.as_ref()?;
        self.tables.iter().find(|t| &t.id == id)
    }

    pub fn grid(&self) -> &GridEngine {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut GridEngine {
        &mut self.grid
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Makes `table_id` active and loads its rows. Results of calls still in
    /// flight for the previous table are discarded when they resolve.
    pub async fn select_table(&mut self, table_id: &TableId) -> Result<(), MutationError> {
        let Some(table) = self.tables.iter().find(|t| &t.id == table_id).cloned() else {
            return Err(ValidationError::UnknownTable(table_id.clone()).into());
        };
        let generation = self.session().advance();
        self.active = Some(table_id.clone());
        self.grid.reset();
        debug!(%table_id, generation, "table selected");

        let loaded = self.service.load_rows(&table).await;
        let loaded = self.settle("load_rows", loaded)?;
        self.replace(loaded);
        Ok(())
    }

    /// Creates a table from the form, prepends it to the list and makes it active.
    pub async fn create_table(&mut self, form: &TableForm) -> Result<TableId, MutationError> {
        let columns: Vec<Column> = form.columns.iter().map(ColumnDraft::to_column).collect();
        let created = self.service.create_table(&form.name, columns).await;
        let table = self.settle("create_table", created)?;
        let table_id = table.id.clone();

        self.tables.insert(0, table);
        self.session().advance();
        self.active = Some(table_id.clone());
        self.grid.reset();
        self.notify(
            NotificationLevel::Info,
            format!("Table '{}' created", form.name.trim()),
        );
        Ok(table_id)
    }

    pub async fn rename_active_table(&mut self, name: &str) -> Result<(), MutationError> {
        let table = self.require_active()?.clone();
        let renamed = self.service.rename_table(&table, name).await;
        let renamed = self.settle("rename_table", renamed)?;
        self.replace(renamed);
        Ok(())
    }

    /// Routes a grid intent to the mutation service and applies the confirmed result.
    pub async fn dispatch(&mut self, intent: GridIntent) -> Result<(), MutationError> {
        let table = self.require_active()?.clone();
        let service = &self.service;
        let (operation, result) = match &intent {
            GridIntent::UpdateCell {
                row_id,
                column_id,
                value,
            } => (
                "update_row",
                service
                    .update_row(&table, row_id, column_id, value.clone())
                    .await,
            ),
            GridIntent::UpdateColumn { column_id, update } => (
                "update_column",
                service
                    .update_column(&table, column_id, update.clone())
                    .await,
            ),
            GridIntent::AddColumn => ("add_column", service.add_column(&table).await),
            GridIntent::DeleteColumn { column_id } => (
                "delete_column",
                service.delete_column(&table, column_id).await,
            ),
            GridIntent::AddRow => ("add_row", service.add_row(&table).await),
            GridIntent::DeleteRow { row_id } => {
                ("delete_row", service.delete_row(&table, row_id).await)
            }
            GridIntent::DeleteRows { row_ids } => {
                ("delete_rows", service.delete_rows(&table, row_ids).await)
            }
        };

        // A partial bulk delete still applies the rows the store confirmed.
        let result = match result {
            Err(MutationError::Partial {
                operation,
                report,
                reconciled: Some(reconciled),
            }) => {
                self.replace(*reconciled);
                Err(MutationError::Partial {
                    operation,
                    report,
                    reconciled: None,
                })
            }
            other => other,
        };
        let next = self.settle(operation, result)?;
        self.replace(next);
        Ok(())
    }

    /// Rows of the active table in the grid's display order.
    pub fn rows_in_view(&self) -> Vec<&Row> {
        match self.active_table() {
            Some(table) => self.grid.rows_in_view(table),
            None => Vec::new(),
        }
    }

    /// Click on a cell of the active table; boolean toggles are dispatched at once.
    pub async fn activate_cell(
        &mut self,
        row_id: &RowId,
        column_id: &ColumnId,
    ) -> Result<(), MutationError> {
        let intent = match self.active_index() {
            Some(index) => self
                .grid
                .activate_cell(&self.tables[index], row_id, column_id),
            None => None,
        };
        self.dispatch_optional(intent).await
    }

    pub async fn choose_option(&mut self, option: &str) -> Result<(), MutationError> {
        let intent = match self.active_index() {
            Some(index) => self.grid.choose_option(&self.tables[index], option),
            None => None,
        };
        self.dispatch_optional(intent).await
    }

    /// Commits the grid's current edit (blur or submit), if it yields a change.
    pub async fn commit_edit(&mut self) -> Result<(), MutationError> {
        let intent = match self.active_index() {
            Some(index) => self.grid.commit(&self.tables[index]),
            None => None,
        };
        self.dispatch_optional(intent).await
    }

    pub fn begin_rename(&mut self, column_id: &ColumnId) -> bool {
        match self.active_index() {
            Some(index) => self.grid.begin_rename(&self.tables[index], column_id),
            None => false,
        }
    }

    /// Select-all control for the active table.
    pub fn set_all_selected(&mut self, selected: bool) {
        if let Some(index) = self.active_index() {
            self.grid.set_all_selected(&self.tables[index], selected);
        }
    }

    /// Bulk-deletes the selected rows of the active table.
    pub async fn delete_selected(&mut self) -> Result<(), MutationError> {
        let index = self
            .active_index()
            .ok_or(MutationError::Validation(ValidationError::NoActiveTable))?;
        let intent = self.grid.delete_selected(&self.tables[index]);
        self.dispatch_optional(intent).await
    }

    /// Ends the session; every later or in-flight operation fails with `SessionClosed`.
    pub fn sign_out(&mut self) {
        self.session().sign_out();
        self.tables.clear();
        self.active = None;
        self.grid.reset();
        info!("signed out");
    }

    async fn dispatch_optional(&mut self, intent: Option<GridIntent>) -> Result<(), MutationError> {
        match intent {
            Some(intent) => self.dispatch(intent).await,
            None => Ok(()),
        }
    }

    fn active_index(&self) -> Option<usize> {
        let id = self.active.as_ref()?;
        self.tables.iter().position(|t| &t.id == id)
    }

    fn require_active(&self) -> Result<&Table, MutationError> {
        self.active_table()
            .ok_or(MutationError::Validation(ValidationError::NoActiveTable))
    }

    fn replace(&mut self, table: Table) {
        if self.active.as_ref() == Some(&table.id) {
            self.grid.prune(&table);
        }
        if let Some(slot) = self.tables.iter_mut().find(|t| t.id == table.id) {
            *slot = table;
        }
    }

    /// Maps an outcome to the user-facing policy: persistence and partial
    /// failures are announced once, validation and stale results stay quiet.
    fn settle<T>(
        &mut self,
        operation: &'static str,
        result: Result<T, MutationError>,
    ) -> Result<T, MutationError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                match &err {
                    MutationError::Stale { issued, current } => {
                        debug!(operation, issued, current, "discarding stale result")
                    }
                    MutationError::Validation(reason) => {
                        debug!(operation, %reason, "rejected before reaching the store")
                    }
                    _ if err.is_user_visible() => {
                        warn!(operation, error = %err, "mutation failed");
                        self.notify(NotificationLevel::Error, err.to_string());
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    fn notify(&mut self, level: NotificationLevel, message: String) {
        self.notifications.push(Notification { level, message });
    }
}

#[cfg(test)]
#[path = "tests/workspace_tests.rs"]
mod tests;
