use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// What a proposed range ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    Appointment(Ulid),
    Blocked(Ulid),
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::Appointment(_) => "appointment",
            Conflict::Blocked(_) => "blocked",
        }
    }
}

impl From<Conflict> for EngineError {
    fn from(c: Conflict) -> Self {
        match c {
            Conflict::Appointment(id) => EngineError::ConflictAppointment(id),
            Conflict::Blocked(id) => EngineError::ConflictBlocked(id),
        }
    }
}

/// Final overlap check for a proposed booking range. Feed it a fresh read of
/// the store, not the grid the client rendered. Confirmed appointments are
/// checked first, then blocks; the first overlap found is reported.
pub fn check_booking(
    span: &Span,
    appointments: &[Appointment],
    blocked: &[BlockedTime],
) -> Result<(), Conflict> {
    if let Some(a) = appointments
        .iter()
        .find(|a| a.is_blocking() && a.span.overlaps(span))
    {
        return Err(Conflict::Appointment(a.id));
    }
    if let Some(b) = blocked.iter().find(|b| b.span.overlaps(span)) {
        return Err(Conflict::Blocked(b.id));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("span end must be after start".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}
