pub mod codec;
pub mod error;
pub mod grid;
pub mod mutation;
pub mod session;
pub mod workspace;

pub use error::{BatchReport, MutationError, RowFailure};
pub use grid::{CellMode, EditState, GridEngine, GridIntent, SortDirection, SortState};
pub use mutation::MutationService;
pub use session::{Session, Ticket};
pub use workspace::{
    parse_options, ColumnDraft, Notification, NotificationLevel, TableForm, Workspace,
};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
