use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{ChangeEvent, EventChannel, Subscription, SubscriptionHandle, Topic};

struct Registration {
    topic: Topic,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// In-process [`EventChannel`] fanning notifications out to registered
/// subscribers filtered by topic and session.
#[derive(Default)]
pub struct BroadcastChannel {
    registrations: DashMap<SubscriptionHandle, Registration>,
    presence: DashMap<Uuid, DashSet<String>>,
}

impl BroadcastChannel {
    /// Build an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, across every session.
    pub fn subscription_count(&self) -> usize {
        self.registrations.len()
    }

    /// Drop every subscription scoped to a session, as a transport
    /// disconnect would. Subscribers observe the end of their stream.
    pub fn disconnect_session(&self, session_id: Uuid) -> usize {
        let before = self.registrations.len();
        self.registrations
            .retain(|_, registration| registration.session_id != session_id);
        before - self.registrations.len()
    }
}

impl EventChannel for BroadcastChannel {
    fn subscribe(&self, topic: Topic, session_id: Uuid) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();
        self.registrations.insert(
            handle,
            Registration {
                topic,
                session_id,
                tx,
            },
        );
        debug!(%handle, %topic, %session_id, "subscription registered");
        Subscription {
            handle,
            topic,
            receiver,
        }
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.registrations.remove(&handle).is_some()
    }

    fn publish(&self, event: ChangeEvent) {
        let mut closed = Vec::new();
        for entry in self.registrations.iter() {
            let registration = entry.value();
            if registration.topic != event.topic || registration.session_id != event.session_id {
                continue;
            }
            if registration.tx.send(event.clone()).is_err() {
                closed.push(*entry.key());
            }
        }
        // Receivers dropped without unsubscribing.
        for handle in closed {
            self.registrations.remove(&handle);
        }
    }

    fn track(&self, session_id: Uuid, key: &str) {
        self.presence
            .entry(session_id)
            .or_default()
            .insert(key.to_owned());
    }

    fn untrack(&self, session_id: Uuid, key: &str) {
        if let Some(keys) = self.presence.get(&session_id) {
            keys.remove(key);
        }
        self.presence.remove_if(&session_id, |_, keys| keys.is_empty());
    }

    fn present(&self, session_id: Uuid) -> usize {
        self.presence
            .get(&session_id)
            .map(|keys| keys.len())
            .unwrap_or(0)
    }
}
