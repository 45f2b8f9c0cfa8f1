use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::auth::Caller;
use crate::limits::*;
use crate::model::*;
use crate::observability::record_operation;

use super::conflict::{check_no_slot_overlap, free_slot_containing, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Publish a free slot. Fails with a slot conflict if it overlaps any of
    /// the expert's live slots, booked or not.
    pub async fn add_slot(&self, expert_id: Ulid, span: Span) -> Result<Ulid, EngineError> {
        let started = Instant::now();
        let result = self.add_slot_locked(expert_id, span).await;
        record_operation("add_slot", started, &result);
        result
    }

    async fn add_slot_locked(&self, expert_id: Ulid, span: Span) -> Result<Ulid, EngineError> {
        validate_span(&span, self.now())?;
        let _scope = self.lock_scopes(&[expert_id]).await?;
        self.get_expert(expert_id)?;
        if self.store.expert_slot_count(&expert_id) >= MAX_SLOTS_PER_EXPERT {
            return Err(EngineError::Validation("too many slots for expert"));
        }
        check_no_slot_overlap(&self.store.expert_slots(&expert_id), &span)?;

        let slot = AvailableSlot {
            id: Ulid::new(),
            expert_id,
            span,
            is_booked: false,
            retired: false,
        };
        let id = slot.id;
        self.commit(Event::SlotAdded { slot }).await?;
        self.cache.invalidate(&expert_id).await;
        info!("slot {id} added for expert {expert_id}: [{}, {})", span.start, span.end);
        Ok(id)
    }

    /// [`Engine::add_slot`] on behalf of `caller`, who must be an admin or the expert's own user.
    pub async fn add_slot_as(
        &self,
        caller: &Caller,
        expert_id: Ulid,
        span: Span,
    ) -> Result<Ulid, EngineError> {
        let expert = self.get_expert(expert_id)?;
        if !caller.is_admin() && caller.user_id != expert.user_id {
            return Err(EngineError::Unauthorized(caller.user_id));
        }
        self.add_slot(expert_id, span).await
    }

    pub fn find_free_slot_containing(
        &self,
        expert_id: Ulid,
        span: Span,
    ) -> Result<AvailableSlot, EngineError> {
        free_slot_containing(&self.store.expert_slots(&expert_id), &span)
            .cloned()
            .ok_or(EngineError::NoFreeSlot { expert_id, span })
    }

    pub async fn mark_booked(&self, slot_id: Ulid) -> Result<(), EngineError> {
        self.set_slot_booked(slot_id, true).await
    }

    pub async fn mark_free(&self, slot_id: Ulid) -> Result<(), EngineError> {
        self.set_slot_booked(slot_id, false).await
    }

    /// Idempotent: a slot already in the target state is left alone.
    async fn set_slot_booked(&self, slot_id: Ulid, booked: bool) -> Result<(), EngineError> {
        let expert_id = self.slot_owner(slot_id)?;
        let _scope = self.lock_scopes(&[expert_id]).await?;
        let slot = self.get_slot(slot_id)?;
        if slot.is_booked == booked {
            return Ok(());
        }
        let event = if booked {
            Event::SlotBooked { id: slot_id }
        } else {
            Event::SlotFreed { id: slot_id }
        };
        self.commit(event).await?;
        self.cache.invalidate(&expert_id).await;
        Ok(())
    }

    /// Soft-delete a free slot. Booked slots carry history and stay.
    pub async fn retire_slot(&self, slot_id: Ulid) -> Result<(), EngineError> {
        let expert_id = self.slot_owner(slot_id)?;
        let _scope = self.lock_scopes(&[expert_id]).await?;
        let slot = self.get_slot(slot_id)?;
        if slot.retired {
            return Ok(());
        }
        if slot.is_booked {
            return Err(EngineError::Policy("booked slots cannot be retired"));
        }
        self.commit(Event::SlotRetired { id: slot_id }).await?;
        self.cache.invalidate(&expert_id).await;
        info!("slot {slot_id} retired");
        Ok(())
    }

    pub fn get_slot(&self, slot_id: Ulid) -> Result<AvailableSlot, EngineError> {
        self.store.slot(&slot_id).ok_or(EngineError::NotFound {
            entity: "slot",
            id: slot_id,
        })
    }

    fn slot_owner(&self, slot_id: Ulid) -> Result<Ulid, EngineError> {
        self.get_slot(slot_id).map(|s| s.expert_id)
    }

    /// Uncached registry read: free slots starting strictly after `after`,
    /// ascending by start.
    pub fn list_free(&self, expert_id: Ulid, after: Ms) -> Vec<AvailableSlot> {
        self.store
            .expert_slots(&expert_id)
            .into_iter()
            .filter(|s| s.is_free() && s.span.start > after)
            .collect()
    }

    /// Free future slots for an expert, served from the slot cache when possible.
    pub async fn list_free_slots(&self, expert_id: Ulid) -> Vec<SlotInfo> {
        let now = self.now();
        let slots = match self.cache.get(&expert_id).await {
            Some(cached) => cached,
            None => {
                let seen = self.cache.generation(&expert_id);
                let fresh = self.list_free(expert_id, now);
                self.cache.fill(&expert_id, &fresh, seen).await;
                fresh
            }
        };
        // A cached listing may have aged past some of its slots.
        slots
            .iter()
            .filter(|s| s.span.start > now)
            .map(SlotInfo::from)
            .collect()
    }
}
