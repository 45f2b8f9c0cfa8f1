use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn append_notification(
        &self,
        user_id: Ulid,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<Notification, EngineError> {
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(EngineError::Validation("bad notification title"));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::Validation("notification message too long"));
        }
        let notification = Notification {
            id: Ulid::new(),
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            kind,
            is_read: false,
            created_at: self.now(),
        };
        self.commit(Event::NotificationAppended {
            notification: notification.clone(),
        })
        .await?;
        Ok(notification)
    }

    /// Newest first, at most `limit` (capped).
    pub fn list_notifications(&self, user_id: Ulid, limit: usize) -> Vec<Notification> {
        let mut list = self.store.user_notifications(&user_id);
        list.truncate(limit.min(MAX_NOTIFICATION_PAGE));
        list
    }

    pub fn unread_count(&self, user_id: Ulid) -> usize {
        self.store
            .user_notifications(&user_id)
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Idempotent. Another user's notification looks the same as a missing one.
    pub async fn mark_notification_read(&self, id: Ulid, user_id: Ulid) -> Result<(), EngineError> {
        let notification = self
            .store
            .notification(&id)
            .filter(|n| n.user_id == user_id)
            .ok_or(EngineError::NotFound {
                entity: "notification",
                id,
            })?;
        if notification.is_read {
            return Ok(());
        }
        self.commit(Event::NotificationRead { id }).await
    }

    /// Drop every ledger entry created before `cutoff`. Returns how many went.
    pub async fn purge_notifications(&self, cutoff: Ms) -> Result<usize, EngineError> {
        let ids = self.store.notification_ids_created_before(cutoff);
        let count = ids.len();
        if count > 0 {
            self.commit(Event::NotificationsPurged { ids }).await?;
        }
        Ok(count)
    }
}
