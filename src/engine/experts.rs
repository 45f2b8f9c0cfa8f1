use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{ConflictScope, Engine, EngineError};

impl Engine {
    /// Record the scheduling-relevant facts about an expert whose profile
    /// lives elsewhere.
    pub async fn register_expert(
        &self,
        id: Ulid,
        user_id: Ulid,
        is_available: bool,
    ) -> Result<Expert, EngineError> {
        let _scope = self.lock_scopes(&[id]).await?;
        if self.store.expert(&id).is_some() {
            return Err(EngineError::Conflict {
                scope: ConflictScope::Duplicate,
                with: id,
            });
        }
        let expert = Expert {
            id,
            user_id,
            is_available,
        };
        self.commit(Event::ExpertRegistered {
            expert: expert.clone(),
        })
        .await?;
        info!("registered expert {id} for user {user_id}");
        Ok(expert)
    }

    pub fn get_expert(&self, id: Ulid) -> Result<Expert, EngineError> {
        self.store.expert(&id).ok_or(EngineError::NotFound {
            entity: "expert",
            id,
        })
    }

    /// Open or close an expert's book. Existing bookings are untouched.
    pub async fn set_expert_availability(
        &self,
        id: Ulid,
        is_available: bool,
    ) -> Result<(), EngineError> {
        let _scope = self.lock_scopes(&[id]).await?;
        let expert = self.get_expert(id)?;
        if expert.is_available == is_available {
            return Ok(());
        }
        self.commit(Event::ExpertAvailabilityChanged { id, is_available })
            .await?;
        info!("expert {id} availability -> {is_available}");
        Ok(())
    }
}
