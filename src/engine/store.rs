use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

use super::conflict::Conflict;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by overlap constraint: {0:?}")]
    Conflict(Conflict),
    #[error("no such record: {0}")]
    NotFound(Ulid),
    #[error("cannot move {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("record {0} already exists")]
    Duplicate(Ulid),
    #[error("record limit reached")]
    Full,
}

/// Read/write boundary between the engine and wherever schedule rows live.
///
/// Reads may run concurrently. `insert_appointment` must behave as one unit
/// with respect to other inserts: an implementation either runs the overlap
/// check and the write under a single lock/transaction, or relies on an
/// exclusion constraint and reports the rejection as `StoreError::Conflict`.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn working_hours(&self, day_of_week: u8) -> Result<Option<WorkingHours>, StoreError>;
    async fn all_working_hours(&self) -> Result<Vec<WorkingHours>, StoreError>;
    async fn set_working_hours(&self, hours: WorkingHours) -> Result<(), StoreError>;

    /// Confirmed appointments overlapping `window`, sorted by start.
    async fn confirmed_appointments_in(&self, window: Span) -> Result<Vec<Appointment>, StoreError>;
    /// Appointments of any status overlapping `window`, sorted by start.
    async fn appointments_in(&self, window: Span) -> Result<Vec<Appointment>, StoreError>;
    async fn get_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;
    /// Persist a confirmed appointment unless its span overlaps a confirmed
    /// appointment or a blocked time at commit time.
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), StoreError>;
    async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, StoreError>;
    /// Customer directory, one entry per phone, built as bookings are inserted.
    async fn customers(&self) -> Result<Vec<Customer>, StoreError>;

    async fn blocked_in(&self, window: Span) -> Result<Vec<BlockedTime>, StoreError>;
    async fn add_blocked_time(&self, blocked: BlockedTime) -> Result<(), StoreError>;
    async fn remove_blocked_time(&self, id: Ulid) -> Result<(), StoreError>;
}
