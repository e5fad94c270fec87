use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_RECORDS;
use crate::model::*;
use crate::wal::Wal;

use super::conflict::check_booking;
use super::store::{ScheduleStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Apply an event to the schedule (no locking; caller holds the lock).
fn apply_event(state: &mut ScheduleState, event: &Event) {
    match event {
        Event::WorkingHoursSet(hours) => state.set_working_hours(hours.clone()),
        Event::AppointmentBooked(appointment) => {
            state.record_visit(appointment);
            state.insert_appointment(appointment.clone());
        }
        Event::AppointmentCancelled { id } => {
            state.set_status(*id, AppointmentStatus::Cancelled);
        }
        Event::TimeBlocked(blocked) => state.insert_blocked(blocked.clone()),
        Event::TimeUnblocked { id } => {
            state.remove_blocked(*id);
        }
        Event::CustomerRecorded(customer) => state.put_customer(customer.clone()),
    }
}

/// Hours a fresh store starts with: Monday to Saturday 09:00–18:00, Sunday closed.
pub fn default_working_hours() -> Vec<WorkingHours> {
    (0..7u8)
        .map(|day| WorkingHours {
            day_of_week: day,
            start_time: 9 * 60,
            end_time: 18 * 60,
            is_active: day != 0,
            lunch_start: None,
            lunch_end: None,
        })
        .collect()
}

/// Schedule held in memory and made durable through the WAL.
pub struct WalStore {
    state: RwLock<ScheduleState>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `path`, cutting off a torn tail (seeding default hours
    /// on first open), and start the group-commit writer. Must be called inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (mut events, dropped) = Wal::recover(path)?;
        if dropped > 0 {
            warn!("truncated {dropped} bytes of torn WAL tail in {}", path.display());
        }
        let mut wal = Wal::open(path)?;
        if events.is_empty() {
            events = default_working_hours()
                .into_iter()
                .map(Event::WorkingHoursSet)
                .collect();
            for event in &events {
                wal.append_buffered(event)?;
            }
            wal.flush_sync()?;
            info!("seeded default working hours in {}", path.display());
        }

        let mut state = ScheduleState::default();
        for event in &events {
            apply_event(&mut state, event);
        }
        info!(
            "replayed {} events from {} ({} records)",
            events.len(),
            path.display(),
            state.record_count()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL write failed: {e}")))
    }

    /// WAL-append then apply. The caller holds the write lock.
    async fn persist_and_apply(&self, state: &mut ScheduleState, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        apply_event(state, &event);
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        // Held across the swap so no append lands between snapshot and rename.
        let guard = self.state.write().await;
        let mut events: Vec<Event> = guard
            .working_hours
            .iter()
            .flatten()
            .cloned()
            .map(Event::WorkingHoursSet)
            .collect();
        events.extend(guard.appointments.iter().cloned().map(Event::AppointmentBooked));
        events.extend(guard.blocked.iter().cloned().map(Event::TimeBlocked));
        // After the bookings, so the snapshot overrides what their replay rebuilds.
        events.extend(guard.customers.values().cloned().map(Event::CustomerRecorded));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL compaction failed: {e}")));
        drop(guard);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ScheduleStore for WalStore {
    async fn working_hours(&self, day_of_week: u8) -> Result<Option<WorkingHours>, StoreError> {
        Ok(self.state.read().await.working_hours_for(day_of_week).cloned())
    }

    async fn all_working_hours(&self) -> Result<Vec<WorkingHours>, StoreError> {
        let guard = self.state.read().await;
        Ok(guard.working_hours.iter().flatten().cloned().collect())
    }

    async fn set_working_hours(&self, hours: WorkingHours) -> Result<(), StoreError> {
        let mut guard = self.state.write().await;
        self.persist_and_apply(&mut guard, Event::WorkingHoursSet(hours)).await
    }

    async fn confirmed_appointments_in(&self, window: Span) -> Result<Vec<Appointment>, StoreError> {
        let guard = self.state.read().await;
        Ok(guard.confirmed_overlapping(&window).cloned().collect())
    }

    async fn appointments_in(&self, window: Span) -> Result<Vec<Appointment>, StoreError> {
        let guard = self.state.read().await;
        Ok(guard.appointments_overlapping(&window).cloned().collect())
    }

    async fn get_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state.read().await.appointment(id).cloned())
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), StoreError> {
        // The write lock covers read, check, append and apply: a second insert
        // for the same window only sees the state after this one committed.
        let mut guard = self.state.write().await;
        if guard.record_count() >= MAX_RECORDS {
            return Err(StoreError::Full);
        }
        if guard.appointment(appointment.id).is_some() {
            return Err(StoreError::Duplicate(appointment.id));
        }
        let appointments: Vec<Appointment> =
            guard.confirmed_overlapping(&appointment.span).cloned().collect();
        let blocked: Vec<BlockedTime> = guard.blocked_overlapping(&appointment.span).cloned().collect();
        check_booking(&appointment.span, &appointments, &blocked).map_err(StoreError::Conflict)?;

        self.persist_and_apply(&mut guard, Event::AppointmentBooked(appointment)).await
    }

    async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, StoreError> {
        let mut guard = self.state.write().await;
        let from = guard.appointment(id).ok_or(StoreError::NotFound(id))?.status;
        if !from.can_transition(AppointmentStatus::Cancelled) {
            return Err(StoreError::InvalidTransition {
                from,
                to: AppointmentStatus::Cancelled,
            });
        }
        self.persist_and_apply(&mut guard, Event::AppointmentCancelled { id }).await?;
        guard.appointment(id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self.state.read().await.customers.values().cloned().collect())
    }

    async fn blocked_in(&self, window: Span) -> Result<Vec<BlockedTime>, StoreError> {
        let guard = self.state.read().await;
        Ok(guard.blocked_overlapping(&window).cloned().collect())
    }

    async fn add_blocked_time(&self, blocked: BlockedTime) -> Result<(), StoreError> {
        let mut guard = self.state.write().await;
        if guard.record_count() >= MAX_RECORDS {
            return Err(StoreError::Full);
        }
        if guard.blocked.iter().any(|b| b.id == blocked.id) {
            return Err(StoreError::Duplicate(blocked.id));
        }
        self.persist_and_apply(&mut guard, Event::TimeBlocked(blocked)).await
    }

    async fn remove_blocked_time(&self, id: Ulid) -> Result<(), StoreError> {
        let mut guard = self.state.write().await;
        if !guard.blocked.iter().any(|b| b.id == id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_and_apply(&mut guard, Event::TimeUnblocked { id }).await
    }
}
