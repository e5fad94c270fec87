use chrono::NaiveDate;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_booking, validate_span};
use super::grid::{minutes_to_ms, BusinessDay, MINUTES_PER_DAY};
use super::{Engine, EngineError};

/// A booking request with its range already computed.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub id: Ulid,
    pub span: Span,
    pub service_ids: Vec<String>,
    pub customer_name: String,
    pub customer_phone: String,
}

fn validate_customer(name: &str, phone: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() || phone.trim().is_empty() {
        return Err(EngineError::InvalidInput("customer name and phone are required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    Ok(())
}

impl Engine {
    /// `[start, start + sum of service durations)` for a booking starting at
    /// local `time` (minutes since midnight) on `date`.
    pub fn booking_span<S: AsRef<str>>(
        &self,
        date: NaiveDate,
        time: Minute,
        service_ids: &[S],
        catalog: &Catalog,
    ) -> Result<Span, EngineError> {
        let total = catalog.total_duration(service_ids)?;
        if u32::from(time) >= MINUTES_PER_DAY {
            return Err(EngineError::InvalidInput(format!("time of day {time} out of range")));
        }
        let start = BusinessDay::new(date, self.tz).instant(u32::from(time));
        Ok(Span::new(start, start + minutes_to_ms(total)))
    }

    /// Guard and persist a confirmed appointment.
    ///
    /// The range must sit inside the open hours of its local day, clear of
    /// lunch. The overlap check runs against a fresh read and again inside
    /// the store's insert, so a concurrent booking for the same window is
    /// reported as a conflict rather than double-booked.
    pub async fn create_booking(&self, request: NewAppointment) -> Result<Ulid, EngineError> {
        let span = request.span;
        if span.end <= span.start {
            return Err(EngineError::MalformedDuration(format!(
                "booking must have positive length, got {} ms",
                span.end - span.start
            )));
        }
        validate_span(&span)?;
        validate_customer(&request.customer_name, &request.customer_phone)?;
        if request.service_ids.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let (day, start_minute) = BusinessDay::locate(span.start, self.tz)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let length_minutes = u32::try_from((span.duration_ms() + 59_999) / 60_000)
            .map_err(|_| EngineError::LimitExceeded("span too wide"))?;
        let (_, schedule) = self.resolve_day(day.date).await?;
        if !schedule.admits(start_minute, start_minute.saturating_add(length_minutes)) {
            return Err(EngineError::OutsideWorkingHours);
        }

        let appointments = self.store.confirmed_appointments_in(span).await?;
        let blocked = self.store.blocked_in(span).await?;
        check_booking(&span, &appointments, &blocked)?;

        let status = AppointmentStatus::Pending;
        if !status.can_transition(AppointmentStatus::Confirmed) {
            return Err(EngineError::InvalidTransition {
                from: status,
                to: AppointmentStatus::Confirmed,
            });
        }
        let appointment = Appointment {
            id: request.id,
            span,
            status: AppointmentStatus::Confirmed,
            service_ids: request.service_ids,
            customer_name: request.customer_name,
            customer_phone: request.customer_phone,
        };
        self.store.insert_appointment(appointment).await?;
        Ok(request.id)
    }

    /// Compute the range from the catalog and create the booking.
    #[allow(clippy::too_many_arguments)]
    pub async fn book(
        &self,
        id: Ulid,
        date: NaiveDate,
        time: Minute,
        service_ids: Vec<String>,
        customer_name: String,
        customer_phone: String,
        catalog: &Catalog,
    ) -> Result<Ulid, EngineError> {
        let span = self.booking_span(date, time, service_ids.as_slice(), catalog)?;
        self.create_booking(NewAppointment {
            id,
            span,
            service_ids,
            customer_name,
            customer_phone,
        })
        .await
    }

    /// `confirmed -> cancelled`. Frees the range immediately.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        Ok(self.store.cancel_appointment(id).await?)
    }

    /// Upsert the record for one weekday. Inverted or half-configured lunch
    /// is stored as given.
    pub async fn set_working_hours(&self, hours: WorkingHours) -> Result<(), EngineError> {
        if hours.day_of_week > 6 {
            return Err(EngineError::InvalidInput(format!(
                "day_of_week must be 0..=6, got {}",
                hours.day_of_week
            )));
        }
        let in_day = |m: Minute| u32::from(m) < MINUTES_PER_DAY;
        let times_ok = in_day(hours.start_time)
            && in_day(hours.end_time)
            && hours.lunch_start.is_none_or(in_day)
            && hours.lunch_end.is_none_or(in_day);
        if !times_ok {
            return Err(EngineError::InvalidInput("time of day out of range".into()));
        }
        Ok(self.store.set_working_hours(hours).await?)
    }

    pub async fn block_time(&self, id: Ulid, span: Span, reason: String) -> Result<(), EngineError> {
        validate_span(&span)?;
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        Ok(self.store.add_blocked_time(BlockedTime { id, span, reason }).await?)
    }

    pub async fn unblock_time(&self, id: Ulid) -> Result<(), EngineError> {
        Ok(self.store.remove_blocked_time(id).await?)
    }
}
