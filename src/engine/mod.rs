pub mod availability;
pub mod conflict;
mod error;
pub mod grid;
pub mod hours;
mod mutations;
mod queries;
mod store;
mod wal_store;

pub use availability::{annotate_duration, generate_slots};
pub use conflict::{check_booking, Conflict};
pub use error::EngineError;
pub use grid::BusinessDay;
pub use hours::{resolve, DaySchedule};
pub use mutations::NewAppointment;
pub use store::{ScheduleStore, StoreError};
pub use wal_store::{default_working_hours, WalStore};

use std::sync::Arc;

use chrono_tz::Tz;

/// Availability and booking operations over a schedule store, in one fixed
/// business timezone.
pub struct Engine {
    store: Arc<dyn ScheduleStore>,
    tz: Tz,
}

impl Engine {
    pub fn new(store: Arc<dyn ScheduleStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }
}
