use crate::dayplan::MalformedDocument;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// A day plan changed between read and write. Retried internally.
    #[error("write conflict on {0}")]
    Conflict(String),
    #[error("gave up after {attempts} conflicting attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    MalformedDocument(#[from] MalformedDocument),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PlannerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { id, .. } => PlannerError::Conflict(id),
            other => PlannerError::Store(other),
        }
    }
}
