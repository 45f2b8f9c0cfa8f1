use std::time::Instant;

use tracing::{info, warn};
use ulid::Ulid;

use crate::auth::Caller;
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, record_operation};

use super::conflict::{
    check_no_booking_overlap, free_slot_containing, occupied_slot, validate_span, validate_text,
};
use super::{ConflictScope, Engine, EngineError};

/// Caller-supplied booking request.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: Ulid,
    pub expert_id: Ulid,
    pub span: Span,
    pub notes: Option<String>,
    pub format: Option<ConsultationFormat>,
}

impl NewBooking {
    pub fn new(user_id: Ulid, expert_id: Ulid, span: Span) -> Self {
        Self {
            user_id,
            expert_id,
            span,
            notes: None,
            format: None,
        }
    }
}

impl Engine {
    /// Reserve a free slot for a user.
    ///
    /// The user and expert conflict checks, the slot match and the write all
    /// run while holding exclusive scopes on both the user and the expert,
    /// so two racing requests can never both pass validation.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_locked(req).await;
        if let Err(EngineError::Conflict { scope, .. }) = &result {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "scope" => scope.as_str())
                .increment(1);
        }
        record_operation("create_booking", started, &result);
        result
    }

    async fn create_booking_locked(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let NewBooking {
            user_id,
            expert_id,
            span,
            notes,
            format,
        } = req;
        validate_span(&span, self.now())?;
        validate_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;

        let scopes = self.lock_scopes(&[user_id, expert_id]).await?;

        let expert = self.get_expert(expert_id)?;
        if !expert.is_available {
            return Err(EngineError::Unavailable(expert_id));
        }

        check_no_booking_overlap(&self.store.user_bookings(&user_id), &span, ConflictScope::User)?;
        check_no_booking_overlap(
            &self.store.expert_bookings(&expert_id),
            &span,
            ConflictScope::Expert,
        )?;
        let slots = self.store.expert_slots(&expert_id);
        let slot = free_slot_containing(&slots, &span)
            .ok_or(EngineError::NoFreeSlot { expert_id, span })?;

        let booking = Booking {
            id: Ulid::new(),
            user_id,
            expert_id,
            span,
            status: BookingStatus::Pending,
            notes,
            format,
            cancel_reason: None,
            created_at: self.now(),
            reminder_sent_at: None,
        };
        self.commit(Event::BookingCreated {
            booking: booking.clone(),
            slot_id: Some(slot.id),
        })
        .await?;
        drop(scopes);

        self.cache.invalidate(&expert_id).await;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} created: user {user_id} with expert {expert_id} in slot {}",
            booking.id, slot.id
        );
        Ok(booking)
    }

    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.booking(&id).ok_or(EngineError::NotFound {
            entity: "booking",
            id,
        })
    }

    /// Cancel on behalf of the booking's user or its expert. Refused inside
    /// the cancellation window before the start.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        actor_id: Ulid,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.cancel_booking_locked(id, actor_id, reason).await;
        record_operation("cancel_booking", started, &result);
        result
    }

    async fn cancel_booking_locked(
        &self,
        id: Ulid,
        actor_id: Ulid,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        validate_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let expert_id = self.get_booking(id)?.expert_id;
        let scope = self.lock_scopes(&[expert_id]).await?;
        let booking = self.get_booking(id)?;

        let expert_user = self.store.expert(&expert_id).map(|e| e.user_id);
        let is_owner = actor_id == booking.user_id;
        if !is_owner && expert_user != Some(actor_id) {
            return Err(EngineError::Unauthorized(actor_id));
        }
        if self.now() + self.config.cancel_window_ms > booking.span.start {
            return Err(EngineError::Policy(
                "bookings cannot be cancelled this close to their start",
            ));
        }
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let freed_slot = occupied_slot(&self.store.expert_slots(&expert_id), &booking.span)
            .map(|s| s.id);
        self.commit(Event::BookingCancelled {
            id,
            reason: reason.clone(),
            freed_slot,
        })
        .await?;
        drop(scope);

        self.cache.invalidate(&expert_id).await;
        info!("booking {id} cancelled by {actor_id}");

        let other_party = if is_owner { expert_user } else { Some(booking.user_id) };
        if let Some(recipient) = other_party {
            let message = match &reason {
                Some(r) => format!("A consultation was cancelled: {r}"),
                None => "A consultation was cancelled".to_string(),
            };
            self.notify_ledger(recipient, "Booking Cancelled", message, NotificationKind::Cancellation)
                .await;
        }
        Ok(())
    }

    /// Drive the approval flow. Only `pending → confirmed`, `pending → rejected`
    /// and `confirmed → completed` are accepted here; cancellation and expiry
    /// have their own operations.
    pub async fn update_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.update_booking_status_locked(id, status).await;
        record_operation("update_booking_status", started, &result);
        result
    }

    async fn update_booking_status_locked(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let expert_id = self.get_booking(id)?.expert_id;
        let scope = self.lock_scopes(&[expert_id]).await?;
        let booking = self.get_booking(id)?;

        let approval_flow = matches!(
            status,
            BookingStatus::Confirmed | BookingStatus::Rejected | BookingStatus::Completed
        );
        if !approval_flow || !booking.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: status,
            });
        }
        self.commit(Event::BookingStatusChanged { id, status }).await?;
        drop(scope);
        info!("booking {id}: {} -> {status}", booking.status);

        let notice = match status {
            BookingStatus::Confirmed => Some(("Booking Confirmed", "Your consultation has been confirmed")),
            BookingStatus::Rejected => Some(("Booking Rejected", "Your consultation request was declined")),
            _ => None,
        };
        if let Some((title, message)) = notice {
            self.notify_ledger(booking.user_id, title, message.to_string(), NotificationKind::Booking)
                .await;
        }
        Ok(())
    }

    /// [`Engine::update_booking_status`] for an authenticated caller: the
    /// booking's expert or an admin.
    pub async fn review_booking(
        &self,
        caller: &Caller,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let booking = self.get_booking(id)?;
        let expert_user = self.store.expert(&booking.expert_id).map(|e| e.user_id);
        if !caller.is_admin() && expert_user != Some(caller.user_id) {
            return Err(EngineError::Unauthorized(caller.user_id));
        }
        self.update_booking_status(id, status).await
    }

    /// A user's booking history, ascending by start.
    pub fn list_user_bookings(&self, user_id: Ulid) -> Vec<Booking> {
        self.store.user_bookings(&user_id)
    }

    /// An expert's bookings, ascending by start.
    pub fn list_expert_bookings(&self, expert_id: Ulid) -> Vec<Booking> {
        self.store.expert_bookings(&expert_id)
    }

    /// Pending or confirmed bookings starting in `(now, now + within)`.
    pub fn upcoming_bookings(&self, within: Ms) -> Vec<Booking> {
        let now = self.now();
        self.store.bookings_matching(|b| {
            matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed)
                && b.span.start > now
                && b.span.start < now + within
        })
    }

    /// Best-effort ledger entry after a committed state change.
    async fn notify_ledger(&self, user_id: Ulid, title: &str, message: String, kind: NotificationKind) {
        if let Err(e) = self.append_notification(user_id, title, &message, kind).await {
            warn!("could not record '{title}' for user {user_id}: {e}");
        }
    }
}
