//! [`StateStore`] – latest decoded value per inbound topic, plus the
//! connection and command flags external consumers read.
//!
//! Writes are last-write-wins single assignments: no merging, no history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use courier_types::{ConnectionState, Pose, TopicValue};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::registry::TopicKey;

#[derive(Debug, Clone)]
struct Slot {
    value: TopicValue,
    /// `None` for seeded defaults that never came off the bus.
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct StateStore {
    slots: RwLock<HashMap<TopicKey, Slot>>,
    connection: watch::Sender<ConnectionState>,
    last_error: RwLock<Option<String>>,
    estop_engaged: AtomicBool,
    teleop_enabled: AtomicBool,
}

impl StateStore {
    pub fn new() -> Self {
        let mut slots = HashMap::new();
        slots.insert(
            TopicKey::CurrentPoint,
            Slot { value: TopicValue::Pose(Pose::default()), updated_at: None },
        );
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            slots: RwLock::new(slots),
            connection,
            last_error: RwLock::new(None),
            estop_engaged: AtomicBool::new(false),
            teleop_enabled: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Topic slots
    // -----------------------------------------------------------------------

    /// Replace the value cached for `key`.
    pub fn set(&self, key: TopicKey, value: TopicValue) {
        self.slots
            .write()
            .insert(key, Slot { value, updated_at: Some(Utc::now()) });
    }

    pub fn get(&self, key: TopicKey) -> Option<TopicValue> {
        self.slots.read().get(&key).map(|s| s.value.clone())
    }

    /// When `key` last received a value from the bus.
    pub fn updated_at(&self, key: TopicKey) -> Option<DateTime<Utc>> {
        self.slots.read().get(&key).and_then(|s| s.updated_at)
    }

    /// Latest camera frame as a `data:` URI.
    pub fn camera_frame(&self) -> Option<String> {
        match self.get(TopicKey::Camera) {
            Some(TopicValue::Image(uri)) => Some(uri),
            _ => None,
        }
    }

    /// Last reported robot pose; the origin until the robot reports one.
    pub fn current_pose(&self) -> Pose {
        match self.get(TopicKey::CurrentPoint) {
            Some(TopicValue::Pose(p)) => p,
            _ => Pose::default(),
        }
    }

    /// Last reported robot status, e.g. `"idle"` or `"teleop"`.
    pub fn current_status(&self) -> Option<String> {
        match self.get(TopicKey::CurrentState) {
            Some(TopicValue::Status(s)) => Some(s),
            _ => None,
        }
    }

    pub fn goal_reached(&self) -> Option<bool> {
        match self.get(TopicKey::GoalReached) {
            Some(TopicValue::Flag(b)) => Some(b),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Connection state
    // -----------------------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// A receiver that observes every connection state transition.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub(crate) fn set_connection(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        *self.last_error.write() = error;
    }

    // -----------------------------------------------------------------------
    // Command flags
    // -----------------------------------------------------------------------

    pub fn estop_engaged(&self) -> bool {
        self.estop_engaged.load(Ordering::SeqCst)
    }

    pub fn set_estop_engaged(&self, engaged: bool) {
        self.estop_engaged.store(engaged, Ordering::SeqCst);
    }

    pub fn teleop_enabled(&self) -> bool {
        self.teleop_enabled.load(Ordering::SeqCst)
    }

    pub fn set_teleop_enabled(&self, enabled: bool) {
        self.teleop_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Point, Quaternion};

    #[test]
    fn seeded_pose_is_origin_without_timestamp() {
        let store = StateStore::new();
        assert_eq!(store.current_pose(), Pose::default());
        assert!(store.updated_at(TopicKey::CurrentPoint).is_none());
        assert!(store.camera_frame().is_none());
        assert!(store.current_status().is_none());
    }

    #[test]
    fn last_write_wins() {
        let store = StateStore::new();
        store.set(TopicKey::CurrentState, TopicValue::Status("idle".into()));
        store.set(TopicKey::CurrentState, TopicValue::Status("teleop".into()));
        assert_eq!(store.current_status().as_deref(), Some("teleop"));
        assert!(store.updated_at(TopicKey::CurrentState).is_some());
    }

    #[test]
    fn typed_accessors() {
        let store = StateStore::new();
        let pose = Pose::new(Point::new(3.0, 4.0, 1.0), Quaternion::from_yaw(0.3));
        store.set(TopicKey::CurrentPoint, TopicValue::Pose(pose));
        store.set(TopicKey::Camera, TopicValue::Image("data:image/jpeg;base64,AA".into()));
        store.set(TopicKey::GoalReached, TopicValue::Flag(true));

        assert_eq!(store.current_pose(), pose);
        assert_eq!(store.camera_frame().as_deref(), Some("data:image/jpeg;base64,AA"));
        assert_eq!(store.goal_reached(), Some(true));
    }

    #[tokio::test]
    async fn connection_watch_sees_transitions() {
        let store = StateStore::new();
        let mut rx = store.watch_connection();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        store.set_connection(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
        assert_eq!(store.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn command_flags_default_off() {
        let store = StateStore::new();
        assert!(!store.estop_engaged());
        assert!(!store.teleop_enabled());
        store.set_estop_engaged(true);
        assert!(store.estop_engaged());
    }
}
