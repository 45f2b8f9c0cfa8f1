use crate::limits::*;
use crate::model::*;

use super::{ConflictScope, EngineError};

/// Shape checks shared by slots and bookings: ordered, in range, not too
/// wide, and strictly in the future.
pub(crate) fn validate_span(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::Validation("interval too long"));
    }
    if span.start <= now {
        return Err(EngineError::Validation("interval must start in the future"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    text: Option<&str>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    match text {
        Some(t) if t.len() > max => Err(EngineError::Validation(what)),
        _ => Ok(()),
    }
}

/// First booking in `bookings` that still claims its interval and overlaps `span`.
pub(crate) fn check_no_booking_overlap(
    bookings: &[Booking],
    span: &Span,
    scope: ConflictScope,
) -> Result<(), EngineError> {
    match bookings
        .iter()
        .find(|b| b.status.holds_interval() && b.span.overlaps(span))
    {
        Some(hit) => Err(EngineError::Conflict {
            scope,
            with: hit.id,
        }),
        None => Ok(()),
    }
}

/// Published slots (booked or free) may never overlap. Retired slots are ignored.
pub(crate) fn check_no_slot_overlap(slots: &[AvailableSlot], span: &Span) -> Result<(), EngineError> {
    match slots.iter().find(|s| !s.retired && s.span.overlaps(span)) {
        Some(hit) => Err(EngineError::Conflict {
            scope: ConflictScope::Slot,
            with: hit.id,
        }),
        None => Ok(()),
    }
}

/// Free slot containing `span`; soonest start wins, then lowest id.
/// `slots` must be sorted by `(start, id)`.
pub(crate) fn free_slot_containing<'a>(
    slots: &'a [AvailableSlot],
    span: &Span,
) -> Option<&'a AvailableSlot> {
    slots
        .iter()
        .find(|s| s.is_free() && s.span.contains_span(span))
}

/// The slot a booking occupies, recomputed by containment rather than a stored id.
pub(crate) fn occupied_slot<'a>(
    slots: &'a [AvailableSlot],
    span: &Span,
) -> Option<&'a AvailableSlot> {
    slots
        .iter()
        .find(|s| !s.retired && s.span.contains_span(span))
}
