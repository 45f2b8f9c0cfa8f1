use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub user_id: Ulid,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Out-of-band delivery to a user (email, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: Ulid, title: &str, body: &str) -> Result<(), NotifyError>;

    /// Periodic housekeeping, run once per reconciliation pass.
    async fn maintain(&self) {}
}

/// Broadcast hub with one channel per user. Live subscribers get every
/// message sent to that user.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Message>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to messages for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Message> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Users with an open channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    /// Delivering to a user nobody listens for is a successful no-op.
    async fn send(&self, user_id: Ulid, title: &str, body: &str) -> Result<(), NotifyError> {
        let Some(tx) = self.channels.get(&user_id) else {
            debug!("no listener for user {user_id}, dropping '{title}'");
            return Ok(());
        };
        let msg = Message {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
        };
        if tx.send(msg).is_err() {
            debug!("listeners for user {user_id} went away, dropping '{title}'");
        }
        Ok(())
    }

    /// Drop every channel nobody listens on any more.
    async fn maintain(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);

        hub.send(uid, "Consultation Reminder", "starting in 1 hour")
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.user_id, uid);
        assert_eq!(received.title, "Consultation Reminder");
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        assert!(hub.send(Ulid::new(), "t", "b").await.is_ok());
    }

    #[tokio::test]
    async fn messages_stay_with_their_user() {
        let hub = NotifyHub::new();
        let (alice, bob) = (Ulid::new(), Ulid::new());
        let mut alice_rx = hub.subscribe(alice);
        let mut bob_rx = hub.subscribe(bob);

        hub.send(bob, "for bob", "").await.unwrap();
        assert_eq!(bob_rx.recv().await.unwrap().title, "for bob");
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn maintain_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        drop(hub.subscribe(uid));
        let _kept = hub.subscribe(Ulid::new());
        hub.maintain().await;
        assert_eq!(hub.channel_count(), 1);
    }
}
