use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::AppointmentStatus;

use super::grid::GridError;
use super::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("slot no longer available: overlaps appointment {0}")]
    ConflictAppointment(Ulid),
    #[error("slot no longer available: overlaps blocked time {0}")]
    ConflictBlocked(Ulid),
    #[error("malformed duration: {0}")]
    MalformedDuration(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("requested time is outside working hours")]
    OutsideWorkingHours,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::ConflictAppointment(_) | EngineError::ConflictBlocked(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::Conflict(c) => c.into(),
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::InvalidTransition { from, to } => EngineError::InvalidTransition { from, to },
            StoreError::Duplicate(id) => EngineError::InvalidInput(format!("duplicate id {id}")),
            StoreError::Full => EngineError::LimitExceeded("too many records"),
        }
    }
}

impl From<GridError> for EngineError {
    fn from(e: GridError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::MalformedDuration(e.to_string())
    }
}
