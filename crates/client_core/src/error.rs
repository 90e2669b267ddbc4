use shared::{domain::RowId, error::ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{operation} failed: {source:#}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not encode {entity}: {source}")]
    Encode {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not decode {entity} {id}: {source}")]
    Decode {
        entity: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{operation} partially failed: {report}")]
    Partial {
        operation: &'static str,
        report: BatchReport,
        /// Local state matching what the store confirmed, when it differs from the input.
        reconciled: Option<Box<shared::domain::Table>>,
    },
    #[error("result discarded: issued at generation {issued}, session is at {current}")]
    Stale { issued: u64, current: u64 },
    #[error("session is signed out")]
    SessionClosed,
}

impl MutationError {
    pub(crate) fn persistence(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Persistence { operation, source }
    }

    /// Failures the user should hear about; validation and stale results stay silent.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            MutationError::Persistence { .. }
                | MutationError::Encode { .. }
                | MutationError::Decode { .. }
                | MutationError::Partial { .. }
                | MutationError::SessionClosed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub row_id: RowId,
    pub reason: String,
}

/// Outcome of an operation fanned out into one remote call per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<RowId>,
    pub failed: Vec<RowFailure>,
    /// Whether every succeeded sub-write was undone again.
    pub rolled_back: bool,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        if !self.failed.is_empty() {
            let ids: Vec<&str> = self.failed.iter().map(|f| f.row_id.as_str()).collect();
            write!(f, " ({})", ids.join(", "))?;
        }
        if self.rolled_back {
            write!(f, "; rolled back")?;
        }
        Ok(())
    }
}
