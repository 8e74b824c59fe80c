//! Event channel abstraction: filtered row-change subscriptions plus an
//! advisory presence set per session.

mod broadcast;

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

pub use self::broadcast::BroadcastChannel;

/// Logical topics a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Updates to the session row.
    SessionUpdates,
    /// Player rows inserted or deleted.
    PlayerChanges,
    /// Answer rows inserted.
    AnswerInserts,
}

impl Topic {
    /// Every topic a reconciliation loop listens to.
    pub const ALL: [Topic; 3] = [Topic::SessionUpdates, Topic::PlayerChanges, Topic::AnswerInserts];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::SessionUpdates => "session-updates",
            Topic::PlayerChanges => "player-changes",
            Topic::AnswerInserts => "answer-inserts",
        };
        f.write_str(name)
    }
}

/// Row-level change notification. Carries no payload beyond identifiers:
/// receivers re-read the store instead of applying deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChangeEvent {
    /// Topic the change belongs to.
    pub topic: Topic,
    /// Session the changed row is scoped to.
    pub session_id: Uuid,
    /// Identifier of the changed row, when a single row is concerned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

/// Opaque handle identifying a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Receiving side of a subscription. `recv` yields `None` once the
/// subscription has been dropped by the channel (unsubscribe or disconnect).
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    topic: Topic,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    /// Handle to pass to [`EventChannel::unsubscribe`].
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Topic this subscription listens to.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe transport for change notifications.
///
/// Delivery is best effort: notifications may be duplicated, reordered or
/// dropped, and a subscription may end at any time.
pub trait EventChannel: Send + Sync {
    /// Register interest in one topic scoped to a session.
    fn subscribe(&self, topic: Topic, session_id: Uuid) -> Subscription;
    /// Release a subscription. Returns false when it was already gone.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool;
    /// Fan a notification out to every matching subscription.
    fn publish(&self, event: ChangeEvent);
    /// Mark a client as connected to a session.
    fn track(&self, session_id: Uuid, key: &str);
    /// Remove a client from the presence set of a session.
    fn untrack(&self, session_id: Uuid, key: &str);
    /// Number of clients currently tracked for a session.
    fn present(&self, session_id: Uuid) -> usize;
}
