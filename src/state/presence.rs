//! Process-local record of who holds a live realtime connection to each room.
//!
//! When the last connection of a room drops, a grace timer is armed. Any new
//! registration for the room cancels it; if it fires with the room still empty, the
//! room key is emitted once on the abandonment channel.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, info};

use crate::state::room::RoomKey;

/// Receiving half of the abandonment channel.
pub type AbandonedRooms = mpsc::UnboundedReceiver<RoomKey>;

/// Injectable presence tracker; clones share the same state.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    rooms: DashMap<RoomKey, RoomPresence>,
    grace: Duration,
    next_epoch: AtomicU64,
    abandoned: mpsc::UnboundedSender<RoomKey>,
}

#[derive(Default)]
struct RoomPresence {
    users: HashMap<String, usize>,
    timer: Option<GraceTimer>,
}

struct GraceTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

impl RoomPresence {
    fn total(&self) -> usize {
        self.users.values().sum()
    }

    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

impl PresenceTracker {
    /// Create a tracker with grace period `grace` and the receiver of abandoned rooms.
    pub fn new(grace: Duration) -> (Self, AbandonedRooms) {
        let (abandoned, receiver) = mpsc::unbounded_channel();
        let tracker = Self {
            inner: Arc::new(PresenceInner {
                rooms: DashMap::new(),
                grace,
                next_epoch: AtomicU64::new(0),
                abandoned,
            }),
        };
        (tracker, receiver)
    }

    /// Record a new connection of `user_id` to the room and cancel any pending grace
    /// timer. Returns the user's connection count after the call.
    pub fn register(&self, key: &RoomKey, user_id: &str) -> usize {
        let mut presence = self.inner.rooms.entry(key.clone()).or_default();
        if presence.cancel_timer() {
            info!(room = %key, %user_id, "reconnection cancelled abandonment");
        }
        let count = presence.users.entry(user_id.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one connection of `user_id`. Returns `true` when this call emptied the room
    /// and armed the grace timer.
    pub fn unregister(&self, key: &RoomKey, user_id: &str) -> bool {
        let Some(mut presence) = self.inner.rooms.get_mut(key) else {
            return false;
        };

        let Some(count) = presence.users.get_mut(user_id) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            presence.users.remove(user_id);
        }

        if presence.total() > 0 || presence.timer.is_some() {
            return false;
        }

        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            sleep(inner.grace).await;
            inner.expire(timer_key, epoch);
        });
        presence.timer = Some(GraceTimer { epoch, handle });
        debug!(room = %key, grace_ms = self.inner.grace.as_millis(), "room empty; grace timer armed");
        true
    }

    /// Live connections to the room across every user.
    pub fn connection_count(&self, key: &RoomKey) -> usize {
        self.inner
            .rooms
            .get(key)
            .map(|presence| presence.total())
            .unwrap_or(0)
    }

    /// Live connections across every room.
    pub fn total_connections(&self) -> usize {
        self.inner
            .rooms
            .iter()
            .map(|presence| presence.total())
            .sum()
    }

    /// Live connections of one user to the room.
    pub fn user_connections(&self, key: &RoomKey, user_id: &str) -> usize {
        self.inner
            .rooms
            .get(key)
            .and_then(|presence| presence.users.get(user_id).copied())
            .unwrap_or(0)
    }

    /// Whether a grace timer is currently armed for the room.
    pub fn has_pending_timer(&self, key: &RoomKey) -> bool {
        self.inner
            .rooms
            .get(key)
            .is_some_and(|presence| presence.timer.is_some())
    }

    /// Drop every record of a room, cancelling its timer. Used once the room is terminal.
    pub fn forget(&self, key: &RoomKey) {
        if let Some((_, mut presence)) = self.inner.rooms.remove(key) {
            presence.cancel_timer();
        }
    }
}

impl PresenceInner {
    fn expire(&self, key: RoomKey, epoch: u64) {
        let fired = match self.rooms.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let presence = entry.get();
                let armed = presence.timer.as_ref().map(|timer| timer.epoch) == Some(epoch);
                if armed && presence.total() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        if fired {
            info!(room = %key, "grace period expired; room abandoned");
            let _ = self.abandoned.send(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, timeout};

    use super::*;
    use crate::state::room::GameType;

    const GRACE: Duration = Duration::from_secs(15);

    fn key() -> RoomKey {
        RoomKey::new(GameType::TicTacToe, "123456")
    }

    #[tokio::test(start_paused = true)]
    async fn last_disconnect_fires_once_after_grace() {
        let (tracker, mut abandoned) = PresenceTracker::new(GRACE);
        tracker.register(&key(), "host");
        tracker.register(&key(), "guest");

        assert!(!tracker.unregister(&key(), "guest"));
        assert!(tracker.unregister(&key(), "host"));
        assert!(tracker.has_pending_timer(&key()));

        let fired = timeout(GRACE * 2, abandoned.recv()).await.unwrap();
        assert_eq!(fired, Some(key()));
        assert!(!tracker.has_pending_timer(&key()));
        assert!(
            timeout(GRACE * 4, abandoned.recv()).await.is_err(),
            "timer fired twice"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_cancels_abandonment() {
        let (tracker, mut abandoned) = PresenceTracker::new(GRACE);
        tracker.register(&key(), "guest");
        tracker.unregister(&key(), "guest");

        advance(GRACE / 2).await;
        tracker.register(&key(), "guest");
        assert!(!tracker.has_pending_timer(&key()));

        assert!(timeout(GRACE * 4, abandoned.recv()).await.is_err());
        assert_eq!(tracker.connection_count(&key()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_tabs_keep_a_user_present() {
        let (tracker, _abandoned) = PresenceTracker::new(GRACE);
        assert_eq!(tracker.register(&key(), "host"), 1);
        assert_eq!(tracker.register(&key(), "host"), 2);

        assert!(!tracker.unregister(&key(), "host"));
        assert_eq!(tracker.user_connections(&key(), "host"), 1);
        assert!(!tracker.has_pending_timer(&key()));

        assert_eq!(tracker.total_connections(), 1);
        assert!(tracker.unregister(&key(), "host"));
        assert_eq!(tracker.connection_count(&key()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_disconnects_never_arm_a_timer() {
        let (tracker, _abandoned) = PresenceTracker::new(GRACE);
        assert!(!tracker.unregister(&key(), "ghost"));
        tracker.register(&key(), "host");
        assert!(!tracker.unregister(&key(), "ghost"));
        assert_eq!(tracker.connection_count(&key()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forgotten_room_does_not_fire() {
        let (tracker, mut abandoned) = PresenceTracker::new(GRACE);
        tracker.register(&key(), "host");
        tracker.unregister(&key(), "host");
        tracker.forget(&key());

        assert!(timeout(GRACE * 4, abandoned.recv()).await.is_err());
    }
}
