use chrono::NaiveDate;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;

use super::availability::{annotate_duration, generate_slots};
use super::grid::{slots_needed, BusinessDay};
use super::hours::{resolve, DaySchedule};
use super::{Engine, EngineError};

const UPCOMING_WINDOW_MS: Ms = 2 * 60 * 60 * 1000;

fn window_or_all(window: Option<Span>) -> Result<Span, EngineError> {
    match window {
        Some(w) => {
            if w.start >= w.end {
                return Err(EngineError::InvalidInput("window end must be after start".into()));
            }
            if w.duration_ms() > MAX_QUERY_WINDOW_MS {
                return Err(EngineError::LimitExceeded("query window too wide"));
            }
            Ok(w)
        }
        None => Ok(Span::new(MIN_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS)),
    }
}

impl Engine {
    /// The business day for `date` and its resolved schedule.
    pub async fn resolve_day(&self, date: NaiveDate) -> Result<(BusinessDay, DaySchedule), EngineError> {
        let day = BusinessDay::new(date, self.tz);
        let record = self.store.working_hours(day.weekday()).await?;
        Ok((day, resolve(record.as_ref())))
    }

    /// Slot grid for `date`, annotated for a booking of `duration_minutes`.
    pub async fn list_availability(
        &self,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<Vec<Slot>, EngineError> {
        let needed = slots_needed(duration_minutes).ok_or_else(|| {
            EngineError::MalformedDuration(format!("duration must be positive, got {duration_minutes}"))
        })?;

        let (day, schedule) = self.resolve_day(date).await?;
        if !schedule.is_open() {
            return Ok(generate_slots(&day, &schedule, &[], &[]));
        }

        let window = day.span();
        let appointments = self.store.confirmed_appointments_in(window).await?;
        let blocked = self.store.blocked_in(window).await?;
        let slots = generate_slots(&day, &schedule, &appointments, &blocked);
        Ok(annotate_duration(&slots, needed))
    }

    /// Same as `list_availability` with the duration taken from the catalog.
    pub async fn list_availability_for_services<S: AsRef<str>>(
        &self,
        date: NaiveDate,
        catalog: &Catalog,
        service_ids: &[S],
    ) -> Result<Vec<Slot>, EngineError> {
        let total = catalog.total_duration(service_ids)?;
        self.list_availability(date, total).await
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.store
            .get_appointment(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Appointments of every status overlapping `window` (everything when `None`).
    pub async fn list_appointments(&self, window: Option<Span>) -> Result<Vec<Appointment>, EngineError> {
        let window = window_or_all(window)?;
        Ok(self.store.appointments_in(window).await?)
    }

    pub async fn list_blocked(&self, window: Option<Span>) -> Result<Vec<BlockedTime>, EngineError> {
        let window = window_or_all(window)?;
        Ok(self.store.blocked_in(window).await?)
    }

    pub async fn working_hours(&self) -> Result<Vec<WorkingHours>, EngineError> {
        Ok(self.store.all_working_hours().await?)
    }

    /// Customers whose name or phone contains `search` (case-insensitive),
    /// most recent visit first.
    pub async fn list_customers(&self, search: Option<&str>) -> Result<Vec<Customer>, EngineError> {
        let needle = match search.map(str::trim) {
            Some(s) if s.len() > MAX_NAME_LEN => return Err(EngineError::LimitExceeded("search too long")),
            Some(s) if !s.is_empty() => Some(s.to_lowercase()),
            _ => None,
        };
        let mut customers = self.store.customers().await?;
        if let Some(needle) = &needle {
            customers.retain(|c| {
                c.name.to_lowercase().contains(needle.as_str()) || c.phone.to_lowercase().contains(needle.as_str())
            });
        }
        customers.sort_by(|a, b| b.last_visit.cmp(&a.last_visit).then_with(|| a.phone.cmp(&b.phone)));
        Ok(customers)
    }

    /// Counts for the business day containing `now`. Services missing from
    /// the catalog add nothing to revenue.
    pub async fn stats(&self, now: Ms, catalog: &Catalog) -> Result<DashboardStats, EngineError> {
        let (today, _) =
            BusinessDay::locate(now, self.tz).ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let day = today.span();
        let mut stats = DashboardStats::default();
        for appointment in self.store.confirmed_appointments_in(day).await? {
            if appointment.span.start < day.start {
                continue;
            }
            stats.today_bookings += 1;
            stats.today_revenue += appointment
                .service_ids
                .iter()
                .filter_map(|id| catalog.get(id))
                .map(|s| s.price)
                .sum::<i64>();
        }

        let horizon = Span::new(now, now + UPCOMING_WINDOW_MS + 1);
        stats.upcoming = self
            .store
            .confirmed_appointments_in(horizon)
            .await?
            .iter()
            .filter(|a| a.span.start >= now)
            .count() as u64;
        stats.total_customers = self.store.customers().await?.len() as u64;
        Ok(stats)
    }
}
