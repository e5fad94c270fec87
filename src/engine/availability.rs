use crate::model::*;

use super::grid::{first_tick_at_or_after, BusinessDay, GRANULARITY};
use super::hours::DaySchedule;

/// Window rendered for a closed day so callers always have a grid to show.
pub const CLOSED_DISPLAY_START: Minute = 9 * 60;
pub const CLOSED_DISPLAY_END: Minute = 18 * 60;

// ── Slot Generator ────────────────────────────────────────────────

/// Build the day's slot grid.
///
/// Closed day: every tick of the 09:00–18:00 display window, all unavailable.
/// Open day: one slot per tick in `[start, end)`. Lunch ticks are emitted as
/// lunch and skip the occupancy check; every other tick is unavailable when
/// its own 15-minute range overlaps a confirmed appointment or a block.
pub fn generate_slots(
    day: &BusinessDay,
    schedule: &DaySchedule,
    appointments: &[Appointment],
    blocked: &[BlockedTime],
) -> Vec<Slot> {
    let (start, end) = match schedule {
        DaySchedule::Closed => {
            return ticks(u32::from(CLOSED_DISPLAY_START), u32::from(CLOSED_DISPLAY_END))
                .map(|t| Slot {
                    time: t as Minute,
                    available: false,
                    is_lunch: false,
                    reason: Some(SlotReason::Closed),
                })
                .collect();
        }
        DaySchedule::Open { start, end, .. } => (u32::from(*start), u32::from(*end)),
    };

    ticks(start, end)
        .map(|t| {
            if schedule.is_lunch(t) {
                return Slot {
                    time: t as Minute,
                    available: false,
                    is_lunch: true,
                    reason: None,
                };
            }
            let range = day.slot_span(t);
            let reason = if appointments
                .iter()
                .any(|a| a.is_blocking() && a.span.overlaps(&range))
            {
                Some(SlotReason::Booked)
            } else if blocked.iter().any(|b| b.span.overlaps(&range)) {
                Some(SlotReason::Blocked)
            } else {
                None
            };
            Slot {
                time: t as Minute,
                available: reason.is_none(),
                is_lunch: false,
                reason,
            }
        })
        .collect()
}

fn ticks(start: u32, end: u32) -> impl Iterator<Item = u32> {
    (first_tick_at_or_after(start)..end).step_by(usize::from(GRANULARITY))
}

// ── Duration Consecutiveness Checker ──────────────────────────────

/// Disqualify start slots that lack `slots_needed - 1` bookable follow-on
/// slots. Pure forward lookahead over the input grid: a slot is judged only by
/// the slots after it, and always against the unannotated input.
pub fn annotate_duration(slots: &[Slot], slots_needed: usize) -> Vec<Slot> {
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            if !slot.available || slot.is_lunch || slots_needed <= 1 {
                return slot.clone();
            }
            if has_consecutive_run(slots, i, slots_needed) {
                slot.clone()
            } else {
                Slot {
                    available: false,
                    reason: Some(SlotReason::InsufficientDuration),
                    ..slot.clone()
                }
            }
        })
        .collect()
}

fn has_consecutive_run(slots: &[Slot], start: usize, slots_needed: usize) -> bool {
    (start + 1..start + slots_needed).all(|idx| {
        let (Some(prev), Some(next)) = (slots.get(idx - 1), slots.get(idx)) else {
            return false;
        };
        next.available && !next.is_lunch && next.time.checked_sub(prev.time) == Some(GRANULARITY)
    })
}
