use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only absolute time type.
pub type Ms = i64;

/// Minutes since local midnight, 0..=1439.
pub type Minute = u16;

/// Half-open overlap test shared by slot marking, duration checks and the
/// booking guard: `[a_start, a_end)` and `[b_start, b_end)` intersect.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Unchecked; `engine::conflict::validate_span` rejects empty or
    /// inverted spans at the boundary.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    #[cfg(test)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Per-weekday opening configuration. `day_of_week` is 0 = Sunday .. 6 = Saturday.
///
/// Lunch bounds are stored independently so that a half-configured lunch
/// survives a round trip; the resolver treats it as "no lunch".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub day_of_week: u8,
    pub start_time: Minute,
    pub end_time: Minute,
    pub is_active: bool,
    pub lunch_start: Option<Minute>,
    pub lunch_end: Option<Minute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// `pending -> confirmed` and `confirmed -> cancelled` are the only legal moves.
    pub fn can_transition(self, to: AppointmentStatus) -> bool {
        matches!(
            (self, to),
            (AppointmentStatus::Pending, AppointmentStatus::Confirmed)
                | (AppointmentStatus::Confirmed, AppointmentStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub service_ids: Vec<String>,
    pub customer_name: String,
    pub customer_phone: String,
}

impl Appointment {
    /// Only confirmed appointments occupy the grid.
    pub fn is_blocking(&self) -> bool {
        self.status == AppointmentStatus::Confirmed
    }
}

/// Administrator closure. Blocks unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: Ulid,
    pub span: Span,
    pub reason: String,
}

/// Directory entry keyed by phone. Every booking refreshes the name and
/// counts toward `total_bookings`, whether or not it is later cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub phone: String,
    pub name: String,
    pub total_bookings: u32,
    /// Start of the latest appointment booked.
    pub last_visit: Ms,
}

/// Why a slot is not bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReason {
    Closed,
    Booked,
    Blocked,
    InsufficientDuration,
}

impl SlotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotReason::Closed => "closed",
            SlotReason::Booked => "booked",
            SlotReason::Blocked => "blocked",
            SlotReason::InsufficientDuration => "insufficient duration",
        }
    }
}

/// One grid cell of a day. Derived on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub time: Minute,
    pub available: bool,
    pub is_lunch: bool,
    pub reason: Option<SlotReason>,
}

/// Front-desk summary for the business day containing "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStats {
    /// Confirmed appointments starting today.
    pub today_bookings: u64,
    /// Catalog price of the services of those appointments.
    pub today_revenue: i64,
    pub total_customers: u64,
    /// Confirmed appointments starting within the next two hours, inclusive.
    pub upcoming: u64,
}

/// Anything placed on the timeline.
pub trait Timed {
    fn span(&self) -> Span;
}

impl Timed for Appointment {
    fn span(&self) -> Span {
        self.span
    }
}

impl Timed for BlockedTime {
    fn span(&self) -> Span {
        self.span
    }
}

/// Insert keeping `items` sorted by span start.
fn insert_sorted<T: Timed>(items: &mut Vec<T>, item: T) {
    let start = item.span().start;
    let pos = items.partition_point(|i| i.span().start <= start);
    items.insert(pos, item);
}

/// Items whose span overlaps the query window. Binary search skips
/// everything starting at or after `query.end`.
fn overlapping<'a, T: Timed>(items: &'a [T], query: &Span) -> impl Iterator<Item = &'a T> {
    let right_bound = items.partition_point(|i| i.span().start < query.end);
    let query = *query;
    items[..right_bound]
        .iter()
        .filter(move |i| i.span().overlaps(&query))
}

/// The full persisted schedule of the business.
#[derive(Debug, Clone, Default)]
pub struct ScheduleState {
    /// Indexed by `day_of_week`.
    pub working_hours: [Option<WorkingHours>; 7],
    /// All appointments regardless of status, sorted by `span.start`.
    pub appointments: Vec<Appointment>,
    /// Sorted by `span.start`.
    pub blocked: Vec<BlockedTime>,
    /// Keyed by phone.
    pub customers: BTreeMap<String, Customer>,
}

impl ScheduleState {
    pub fn set_working_hours(&mut self, hours: WorkingHours) {
        if let Some(slot) = self.working_hours.get_mut(hours.day_of_week as usize) {
            *slot = Some(hours);
        }
    }

    pub fn working_hours_for(&self, day_of_week: u8) -> Option<&WorkingHours> {
        self.working_hours
            .get(day_of_week as usize)
            .and_then(|h| h.as_ref())
    }

    pub fn insert_appointment(&mut self, appointment: Appointment) {
        insert_sorted(&mut self.appointments, appointment);
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) -> Option<&Appointment> {
        let appt = self.appointments.iter_mut().find(|a| a.id == id)?;
        appt.status = status;
        Some(appt)
    }

    pub fn insert_blocked(&mut self, blocked: BlockedTime) {
        insert_sorted(&mut self.blocked, blocked);
    }

    pub fn remove_blocked(&mut self, id: Ulid) -> Option<BlockedTime> {
        let pos = self.blocked.iter().position(|b| b.id == id)?;
        Some(self.blocked.remove(pos))
    }

    pub fn appointments_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        overlapping(&self.appointments, query)
    }

    pub fn confirmed_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        self.appointments_overlapping(query).filter(|a| a.is_blocking())
    }

    pub fn blocked_overlapping(&self, query: &Span) -> impl Iterator<Item = &BlockedTime> {
        overlapping(&self.blocked, query)
    }

    /// Upsert the booking's customer: latest name wins, count goes up by one.
    pub fn record_visit(&mut self, appointment: &Appointment) {
        let customer = self
            .customers
            .entry(appointment.customer_phone.clone())
            .or_insert_with(|| Customer {
                phone: appointment.customer_phone.clone(),
                name: String::new(),
                total_bookings: 0,
                last_visit: appointment.span.start,
            });
        customer.name.clone_from(&appointment.customer_name);
        customer.total_bookings = customer.total_bookings.saturating_add(1);
        customer.last_visit = customer.last_visit.max(appointment.span.start);
    }

    pub fn put_customer(&mut self, customer: Customer) {
        self.customers.insert(customer.phone.clone(), customer);
    }

    pub fn record_count(&self) -> usize {
        self.appointments.len() + self.blocked.len()
    }
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WorkingHoursSet(WorkingHours),
    AppointmentBooked(Appointment),
    AppointmentCancelled { id: Ulid },
    TimeBlocked(BlockedTime),
    TimeUnblocked { id: Ulid },
    /// Directory snapshot written by compaction; replaces whatever the
    /// replayed bookings built for that phone.
    CustomerRecorded(Customer),
}
