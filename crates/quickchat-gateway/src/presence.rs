use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use quickchat_types::events::GatewayEvent;

/// Delivery channel of one realtime session.
#[derive(Debug, Clone)]
pub struct PresenceChannel {
    id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl PresenceChannel {
    /// Create a channel with a fresh id. The receiver half belongs to the
    /// session's socket writer.
    pub fn open() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: Uuid::new_v4(), tx }, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fire-and-forget. Returns false if the session is already gone.
    pub fn push(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Who is online and where to reach them.
pub trait Presence: Send + Sync {
    /// Track `channel` as the user's session. Last writer wins.
    fn mark_online(&self, user_id: Uuid, channel: PresenceChannel);

    /// Drop the user's entry if `channel_id` is still the tracked session.
    /// Returns true if the user went offline.
    fn mark_offline(&self, user_id: Uuid, channel_id: Uuid) -> bool;

    fn is_online(&self, user_id: Uuid) -> Option<PresenceChannel>;

    fn snapshot(&self) -> HashSet<Uuid>;
}

/// In-process presence map. Every change to the online set is broadcast to
/// all subscribers as `GatewayEvent::OnlineUsers`.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
    channels: RwLock<HashMap<Uuid, PresenceChannel>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(TrackerInner {
                broadcast_tx,
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to events sent to every session.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    fn announce(&self, channels: &HashMap<Uuid, PresenceChannel>) {
        let user_ids: HashSet<Uuid> = channels.keys().copied().collect();
        debug!("Presence changed: {} online", user_ids.len());
        // No subscribers is fine
        let _ = self
            .inner
            .broadcast_tx
            .send(GatewayEvent::OnlineUsers { user_ids });
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Presence for PresenceTracker {
    fn mark_online(&self, user_id: Uuid, channel: PresenceChannel) {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Announce under the lock so broadcasts go out in mutation order
        if channels.insert(user_id, channel).is_none() {
            self.announce(&channels);
        }
    }

    fn mark_offline(&self, user_id: Uuid, channel_id: Uuid) -> bool {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let is_current = channels
            .get(&user_id)
            .is_some_and(|c| c.id == channel_id);
        if !is_current {
            // A newer session has taken over
            return false;
        }

        channels.remove(&user_id);
        self.announce(&channels);
        true
    }

    fn is_online(&self, user_id: Uuid) -> Option<PresenceChannel> {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    fn snapshot(&self) -> HashSet<Uuid> {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
