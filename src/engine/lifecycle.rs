use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::occupied_slot;
use super::{Engine, EngineError};

// Time-driven transitions. The reconciliation worker only reaches the
// store through these.

impl Engine {
    /// Confirmed bookings starting in `[from, to)` that have not been reminded yet.
    pub fn bookings_due_for_reminder(&self, from: Ms, to: Ms) -> Vec<Booking> {
        self.store.bookings_matching(|b| {
            b.status == BookingStatus::Confirmed
                && b.reminder_sent_at.is_none()
                && b.span.start >= from
                && b.span.start < to
        })
    }

    /// Stamp the booking as reminded. Returns `false` if someone already did,
    /// or it is no longer confirmed; the caller must not send in that case.
    pub async fn claim_reminder(&self, id: Ulid) -> Result<bool, EngineError> {
        let expert_id = self.get_booking(id)?.expert_id;
        let _scope = self.lock_scopes(&[expert_id]).await?;
        let booking = self.get_booking(id)?;
        if booking.status != BookingStatus::Confirmed || booking.reminder_sent_at.is_some() {
            return Ok(false);
        }
        self.commit(Event::ReminderSent { id, at: self.now() }).await?;
        Ok(true)
    }

    /// Pending bookings whose end has already passed.
    pub fn overdue_pending_bookings(&self) -> Vec<Booking> {
        let now = self.now();
        self.store
            .bookings_matching(|b| b.status == BookingStatus::Pending && b.span.end < now)
    }

    /// Move an overdue pending booking to missed and release its slot.
    /// Returns `false` if the booking no longer qualifies.
    pub async fn expire_booking(&self, id: Ulid) -> Result<bool, EngineError> {
        let expert_id = self.get_booking(id)?.expert_id;
        let scope = self.lock_scopes(&[expert_id]).await?;
        let booking = self.get_booking(id)?;
        if booking.status != BookingStatus::Pending || booking.span.end >= self.now() {
            return Ok(false);
        }
        let freed_slot = occupied_slot(&self.store.expert_slots(&expert_id), &booking.span)
            .filter(|s| s.is_booked)
            .map(|s| s.id);
        self.commit(Event::BookingMissed { id, freed_slot }).await?;
        drop(scope);

        self.cache.invalidate(&expert_id).await;
        info!("booking {id} missed, slot {freed_slot:?} released");
        Ok(true)
    }
}
