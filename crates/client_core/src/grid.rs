//! Transient grid state: sort order, the single cell or header being edited, and
//! the row selection. The grid never owns table data; it reads a [`Table`] and
//! answers gestures with [`GridIntent`]s for the mutation layer.

use std::collections::HashSet;

use shared::domain::{CellValue, ColumnId, ColumnType, ColumnUpdate, Row, RowId, Table};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortState {
    pub column_id: ColumnId,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditState {
    #[default]
    Display,
    Cell {
        row_id: RowId,
        column_id: ColumnId,
        draft: String,
    },
    Header {
        column_id: ColumnId,
        draft: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellMode {
    Display,
    Editing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridIntent {
    UpdateCell {
        row_id: RowId,
        column_id: ColumnId,
        value: CellValue,
    },
    UpdateColumn {
        column_id: ColumnId,
        update: ColumnUpdate,
    },
    AddColumn,
    DeleteColumn {
        column_id: ColumnId,
    },
    AddRow,
    DeleteRow {
        row_id: RowId,
    },
    DeleteRows {
        row_ids: Vec<RowId>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct GridEngine {
    sort: Option<SortState>,
    edit: EditState,
    selection: HashSet<RowId>,
}

impl GridEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all transient state, e.g. when another table becomes active.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sort_state(&self) -> Option<&SortState> {
        self.sort.as_ref()
    }

    /// Same column flips the direction; a new column starts ascending.
    pub fn toggle_sort(&mut self, column_id: &ColumnId) {
        self.sort = Some(match self.sort.take() {
            Some(current) if &current.column_id == column_id => SortState {
                direction: current.direction.flipped(),
                ..current
            },
            _ => SortState {
                column_id: column_id.clone(),
                direction: SortDirection::Ascending,
            },
        });
    }

    /// Rows in display order. Unsorted, or sorted by a column that no longer
    /// exists, means insertion order.
    pub fn rows_in_view<'t>(&self, table: &'t Table) -> Vec<&'t Row> {
        let mut rows: Vec<&Row> = table.rows.iter().collect();
        if let Some(sort) = &self.sort {
            sort_rows(table, &mut rows, &sort.column_id, sort.direction);
        }
        rows
    }

    pub fn edit_state(&self) -> &EditState {
        &self.edit
    }

    pub fn is_editing(&self) -> bool {
        self.edit != EditState::Display
    }

    pub fn cell_mode(&self, row_id: &RowId, column_id: &ColumnId) -> CellMode {
        match &self.edit {
            EditState::Cell {
                row_id: r,
                column_id: c,
                ..
            } if r == row_id && c == column_id => CellMode::Editing,
            _ => CellMode::Display,
        }
    }

    pub fn header_mode(&self, column_id: &ColumnId) -> CellMode {
        match &self.edit {
            EditState::Header { column_id: c, .. } if c == column_id => CellMode::Editing,
            _ => CellMode::Display,
        }
    }

    /// Direct interaction with a cell.
    ///
    /// Boolean cells toggle and commit at once, ending any other edit. Other cells enter editing with
    /// the current value as draft (select cells open their choice list); any
    /// uncommitted edit elsewhere is dropped.
    pub fn activate_cell(
        &mut self,
        table: &Table,
        row_id: &RowId,
        column_id: &ColumnId,
    ) -> Option<GridIntent> {
        let column = table.column(column_id)?;
        let row = table.row(row_id)?;

        if column.column_type == ColumnType::Boolean {
            let current = row.value_for(column).as_bool().unwrap_or(false);
            self.abandon_edit();
            return Some(GridIntent::UpdateCell {
                row_id: row_id.clone(),
                column_id: column_id.clone(),
                value: CellValue::Bool(!current),
            });
        }

        if self.cell_mode(row_id, column_id) == CellMode::Editing {
            return None;
        }
        self.abandon_edit();
        self.edit = EditState::Cell {
            row_id: row_id.clone(),
            column_id: column_id.clone(),
            draft: row.value_for(column).to_string(),
        };
        None
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        match &mut self.edit {
            EditState::Cell { draft, .. } | EditState::Header { draft, .. } => {
                *draft = text.into()
            }
            EditState::Display => {}
        }
    }

    /// Picks an option in the open choice list of a select cell and commits it.
    pub fn choose_option(&mut self, table: &Table, option: &str) -> Option<GridIntent> {
        let EditState::Cell {
            row_id, column_id, ..
        } = &self.edit
        else {
            return None;
        };
        let column = table.column(column_id)?;
        if column.column_type != ColumnType::Select
            || !column.options().iter().any(|o| o == option)
        {
            return None;
        }

        let intent = GridIntent::UpdateCell {
            row_id: row_id.clone(),
            column_id: column_id.clone(),
            value: CellValue::text(option),
        };
        self.edit = EditState::Display;
        Some(intent)
    }

    /// Blur or submit: leaves editing and emits the commit for the edited field.
    ///
    /// A select cell closed without a choice and an unchanged or blank header
    /// name commit nothing.
    pub fn commit(&mut self, table: &Table) -> Option<GridIntent> {
        match std::mem::take(&mut self.edit) {
            EditState::Display => None,
            EditState::Cell {
                row_id,
                column_id,
                draft,
            } => {
                let column = table.column(&column_id)?;
                if column.column_type.commits_immediately() {
                    return None;
                }
                Some(GridIntent::UpdateCell {
                    row_id,
                    column_id,
                    value: CellValue::Text(draft),
                })
            }
            EditState::Header { column_id, draft } => {
                let column = table.column(&column_id)?;
                let name = draft.trim();
                if name.is_empty() || name == column.name {
                    return None;
                }
                Some(GridIntent::UpdateColumn {
                    column_id,
                    update: ColumnUpdate::rename(name),
                })
            }
        }
    }

    /// Escape: back to display without committing.
    pub fn cancel(&mut self) {
        self.edit = EditState::Display;
    }

    pub fn begin_rename(&mut self, table: &Table, column_id: &ColumnId) -> bool {
        let Some(column) = table.column(column_id) else {
            return false;
        };
        if self.header_mode(column_id) == CellMode::Editing {
            return true;
        }
        self.abandon_edit();
        self.edit = EditState::Header {
            column_id: column_id.clone(),
            draft: column.name.clone(),
        };
        true
    }

    /// Header click sorts unless that header is being renamed. Returns whether it sorted.
    pub fn click_header(&mut self, column_id: &ColumnId) -> bool {
        if self.header_mode(column_id) == CellMode::Editing {
            return false;
        }
        self.toggle_sort(column_id);
        true
    }

    pub fn is_selected(&self, row_id: &RowId) -> bool {
        self.selection.contains(row_id)
    }

    pub fn selected_count(&self) -> usize {
        self.selection.len()
    }

    pub fn toggle_row(&mut self, row_id: &RowId) {
        if !self.selection.remove(row_id) {
            self.selection.insert(row_id.clone());
        }
    }

    pub fn all_selected(&self, table: &Table) -> bool {
        !table.rows.is_empty() && table.rows.iter().all(|r| self.selection.contains(&r.id))
    }

    /// Select-all control: selects every loaded row, or clears the selection.
    pub fn set_all_selected(&mut self, table: &Table, selected: bool) {
        self.selection.clear();
        if selected {
            self.selection
                .extend(table.rows.iter().map(|row| row.id.clone()));
        }
    }

    pub fn forget_row(&mut self, row_id: &RowId) {
        self.selection.remove(row_id);
        if matches!(&self.edit, EditState::Cell { row_id: r, .. } if r == row_id) {
            self.edit = EditState::Display;
        }
    }

    /// Keeps selection and edit state pointing at rows and columns that still exist.
    pub fn prune(&mut self, table: &Table) {
        self.selection.retain(|id| table.row(id).is_some());
        let stale_edit = match &self.edit {
            EditState::Display => false,
            EditState::Cell {
                row_id, column_id, ..
            } => table.row(row_id).is_none() || table.column(column_id).is_none(),
            EditState::Header { column_id, .. } => table.column(column_id).is_none(),
        };
        if stale_edit {
            self.edit = EditState::Display;
        }
    }

    /// Bulk delete of the selection in display-independent table order; clears the selection.
    pub fn delete_selected(&mut self, table: &Table) -> Option<GridIntent> {
        let row_ids: Vec<RowId> = table
            .rows
            .iter()
            .filter(|row| self.selection.contains(&row.id))
            .map(|row| row.id.clone())
            .collect();
        self.selection.clear();
        if row_ids.is_empty() {
            return None;
        }
        Some(GridIntent::DeleteRows { row_ids })
    }

    fn abandon_edit(&mut self) {
        if self.is_editing() {
            debug!(edit = ?self.edit, "abandoning uncommitted edit");
            self.edit = EditState::Display;
        }
    }
}

/// Stable sort of `rows` by the raw value of `column_id`. Equal values keep their
/// input order in both directions. An unknown column leaves `rows` untouched.
pub fn sort_rows(table: &Table, rows: &mut [&Row], column_id: &ColumnId, direction: SortDirection) {
    let Some(column) = table.column(column_id) else {
        return;
    };
    rows.sort_by(|a, b| {
        let ordering = a.value_for(column).sort_cmp(&b.value_for(column));
        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

#[cfg(test)]
#[path = "tests/grid_tests.rs"]
mod tests;
