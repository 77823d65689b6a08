//! Subscription management and inbound routing.
//!
//! After each successful connect the registry is walked once: the bus is
//! asked which topics currently exist and every enabled subscribe-role topic
//! that is present gets a [`LiveSubscriptionHandle`](crate::LiveSubscriptionHandle).
//! Topics that are absent are skipped with a warning; they are not retried
//! until the next walk.

use courier_types::BridgeError;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Bridge, LiveSubscriptionHandle};
use crate::protocol::{self, ClientOp, TOPICS_SERVICE};
use crate::registry::TopicKey;

impl Bridge {
    /// Re-run the registry walk on the live connection.
    pub async fn subscribe_all(&self) -> Result<(), BridgeError> {
        let generation = self.live_generation()?;
        self.subscribe_registry(generation).await;
        Ok(())
    }

    /// Subscribe a single topic if the bus currently carries it.
    pub async fn subscribe_one(&self, key: TopicKey) -> Result<(), BridgeError> {
        let generation = self.live_generation()?;
        let listing = self.list_topics(generation).await?;
        self.subscribe_listed(generation, key, &listing)
    }

    /// Drop the subscription for `key`, if any.
    ///
    /// The handle is released even when the unsubscribe frame cannot be
    /// sent.
    pub fn unsubscribe(&self, key: TopicKey) -> Result<(), BridgeError> {
        let mut s = self.session();
        let Some(handle) = s.subscriptions.remove(&key) else {
            return Ok(());
        };
        let result = s.send(&ClientOp::Unsubscribe { id: &handle.id, topic: &handle.wire_name });
        match &result {
            Ok(()) => info!(topic = %handle.wire_name, "unsubscribed"),
            Err(e) => warn!(topic = %handle.wire_name, error = %e, "unsubscribe failed; handle released"),
        }
        result
    }

    /// Switch a subscribe-role topic on or off.
    ///
    /// Disabling unsubscribes immediately and keeps the topic out of future
    /// walks.  Enabling subscribes again in the background when connected.
    pub fn set_topic_enabled(&self, key: TopicKey, enabled: bool) {
        if enabled {
            let resubscribe = {
                let mut s = self.session();
                s.disabled.remove(&key) && s.outbound.is_some() && !s.subscriptions.contains_key(&key)
            };
            let subscribable = self.registry().get(key).is_some_and(|t| t.is_subscriber());
            if resubscribe && subscribable {
                let bridge = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = bridge.subscribe_one(key).await {
                        debug!(topic = %key, error = %e, "re-enable did not subscribe");
                    }
                });
            }
        } else {
            if self.session().disabled.insert(key) {
                info!(topic = %key, "topic disabled");
            }
            let _ = self.unsubscribe(key);
        }
    }

    pub fn is_topic_enabled(&self, key: TopicKey) -> bool {
        !self.session().disabled.contains(&key)
    }

    /// One pass over the registry for connection `generation`.
    pub(crate) async fn subscribe_registry(&self, generation: u64) {
        let _walk = self.walk_guard().await;

        let listing = match self.list_topics(generation).await {
            Ok(listing) => listing,
            Err(BridgeError::StaleCallback(_)) => return,
            Err(e) => {
                warn!(error = %e, "could not list bus topics; nothing subscribed");
                return;
            }
        };

        for topic in self.registry().subscriptions() {
            if let Err(BridgeError::StaleCallback(_)) = self.subscribe_listed(generation, topic.key, &listing) {
                debug!(generation, "registry walk superseded");
                return;
            }
        }
        info!(
            generation,
            subscribed = self.session().subscriptions.len(),
            "registry walk complete"
        );
    }

    /// Ask the bus which topics exist, retrying unanswered queries.
    pub(crate) async fn list_topics(&self, generation: u64) -> Result<Vec<String>, BridgeError> {
        let (attempts, wait) = {
            let s = self.session();
            match s.config.as_ref() {
                Some(c) => (c.max_retries.max(1), c.retry_timeout()),
                None => return Err(BridgeError::StaleCallback(generation)),
            }
        };

        for attempt in 1..=attempts {
            let id = format!("topics:{}", Uuid::new_v4());
            let (tx, rx) = oneshot::channel();
            {
                let mut s = self.session();
                if !s.is_live(generation) {
                    return Err(BridgeError::StaleCallback(generation));
                }
                s.send(&ClientOp::CallService { id: &id, service: TOPICS_SERVICE })?;
                s.pending.insert(id.clone(), tx);
            }

            match tokio::time::timeout(wait, rx).await {
                Ok(Ok(reply)) if reply.result => return protocol::topics_from_listing(&reply.values),
                Ok(Ok(_)) => {
                    return Err(BridgeError::Protocol("topic listing service reported failure".into()));
                }
                Ok(Err(_)) => return Err(BridgeError::StaleCallback(generation)),
                Err(_) => {
                    self.session().pending.remove(&id);
                    warn!(attempt, attempts, "topic listing timed out");
                }
            }
        }
        Err(BridgeError::Transport(format!("no topic listing after {attempts} attempts")))
    }

    /// Subscribe `key` on connection `generation` if `listing` contains it.
    pub(crate) fn subscribe_listed(
        &self,
        generation: u64,
        key: TopicKey,
        listing: &[String],
    ) -> Result<(), BridgeError> {
        let topic = self
            .registry()
            .get(key)
            .ok_or_else(|| BridgeError::TopicNotPresent(key.to_string()))?;
        if topic.is_publisher() {
            return Err(BridgeError::Protocol(format!("'{}' is publish-only", topic.wire_name)));
        }

        let mut s = self.session();
        if !s.is_live(generation) {
            return Err(BridgeError::StaleCallback(generation));
        }
        if s.disabled.contains(&key) {
            debug!(topic = %topic.wire_name, "topic disabled; not subscribing");
            return Ok(());
        }
        if s.subscriptions.contains_key(&key) {
            return Ok(());
        }
        if !listing.iter().any(|t| *t == topic.wire_name) {
            warn!(topic = %topic.wire_name, "topic does not exist or is not being published");
            return Err(BridgeError::TopicNotPresent(topic.wire_name.clone()));
        }

        let (throttle_rate, queue_length) = s
            .config
            .as_ref()
            .map_or((0, 1), |c| (c.subscription_throttle_ms, c.queue_depth));
        let id = format!("subscribe:{}:{}", topic.wire_name, Uuid::new_v4());
        s.send(&ClientOp::Subscribe {
            id: &id,
            topic: &topic.wire_name,
            msg_type: &topic.schema_tag,
            throttle_rate,
            queue_length,
        })?;
        s.subscriptions.insert(
            key,
            LiveSubscriptionHandle { key, wire_name: topic.wire_name.clone(), id, generation },
        );
        info!(topic = %topic.wire_name, "subscribed");
        Ok(())
    }

    /// Decode an inbound message and store it.
    ///
    /// Messages for a superseded generation, or for a topic without a live
    /// handle, are rejected as stale.  The store write happens under the
    /// session lock so teardown cannot interleave with it.
    pub(crate) fn route_inbound(&self, generation: u64, wire_name: &str, msg: &Value) -> Result<(), BridgeError> {
        let s = self.session();
        if s.generation != generation {
            return Err(BridgeError::StaleCallback(generation));
        }
        let topic = self
            .registry()
            .by_wire_name(wire_name)
            .ok_or_else(|| BridgeError::TopicNotPresent(wire_name.to_string()))?;
        let decoder = topic
            .decoder()
            .ok_or_else(|| BridgeError::Protocol(format!("'{wire_name}' is publish-only")))?;
        if !s.subscriptions.contains_key(&topic.key) {
            return Err(BridgeError::StaleCallback(generation));
        }
        let value = decoder.decode(msg)?;
        self.store().set(topic.key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_types::{ConnectionState, Point, TopicValue};
    use serde_json::json;

    use super::*;
    use crate::registry::TopicRegistry;
    use crate::test_support::{ADDR, all_topics, bridge_with, config, connected};
    use crate::transport::mock::{MockConnector, eventually};

    const CAMERA: &str = "/camera/color/image_compressed/compressed";

    #[tokio::test]
    async fn subscribes_every_present_topic_with_throttle() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;

        let keys: Vec<_> = bridge.live_subscriptions().iter().map(|h| h.key).collect();
        assert_eq!(
            keys,
            vec![TopicKey::Camera, TopicKey::CurrentPoint, TopicKey::CurrentState, TopicKey::GoalReached]
        );
        for frame in connector.last_link().ops("subscribe") {
            assert_eq!(frame["throttle_rate"], 50);
            assert_eq!(frame["queue_length"], 64);
        }
    }

    #[tokio::test]
    async fn absent_topic_gets_no_handle() {
        let present: Vec<&str> = all_topics().into_iter().filter(|t| *t != CAMERA).collect();
        let connector = MockConnector::with_topics(&present);
        let bridge = bridge_with(&connector);
        bridge.open(config(ADDR));
        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 3).await;

        assert!(bridge.live_subscriptions().iter().all(|h| h.key != TopicKey::Camera));
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
        assert_eq!(
            bridge.subscribe_one(TopicKey::Camera).await,
            Err(BridgeError::TopicNotPresent(CAMERA.into()))
        );
    }

    #[tokio::test]
    async fn inbound_messages_reach_the_store() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let link = connector.last_link();

        link.inject(CAMERA, json!({"format": "png", "data": "iVBORw0KGgo="})).await;
        link.inject(
            "/current_point",
            json!({"position": {"x": 1.5, "y": -2.0, "z": 0.0},
                   "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}}),
        )
        .await;
        link.inject("/current_state", json!({"data": "idle"})).await;
        link.inject("/goal_reached", json!({"data": true})).await;

        let b = bridge.clone();
        eventually(move || b.store().goal_reached() == Some(true)).await;
        assert_eq!(
            bridge.store().camera_frame().as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );
        assert_eq!(bridge.store().current_pose().position, Point::new(1.5, -2.0, 0.0));
        assert_eq!(bridge.store().current_status().as_deref(), Some("idle"));
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_and_store_unchanged() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let generation = bridge.generation();

        let result = bridge.route_inbound(generation, "/current_state", &json!({"data": 7}));
        assert!(matches!(result, Err(BridgeError::Protocol(_))));
        assert!(bridge.store().current_status().is_none());
    }

    #[tokio::test]
    async fn disabling_camera_unsubscribes_and_drops_frames() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let link = connector.last_link();

        bridge.set_topic_enabled(TopicKey::Camera, false);
        assert!(!bridge.is_topic_enabled(TopicKey::Camera));
        assert_eq!(bridge.live_subscriptions().len(), 3);
        let l = link.clone();
        eventually(move || l.ops("unsubscribe").len() == 1).await;
        assert_eq!(link.ops("unsubscribe")[0]["topic"], CAMERA);

        let stale = bridge.route_inbound(bridge.generation(), CAMERA, &json!({"format": "jpeg", "data": "AA"}));
        assert!(matches!(stale, Err(BridgeError::StaleCallback(_))));
        assert!(bridge.store().camera_frame().is_none());

        bridge.set_topic_enabled(TopicKey::Camera, true);
        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 4).await;
    }

    #[tokio::test]
    async fn disabled_topic_stays_off_across_reconnect() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = bridge_with(&connector);
        bridge.set_topic_enabled(TopicKey::Camera, false);
        bridge.open(config(ADDR));

        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bridge.live_subscriptions().iter().all(|h| h.key != TopicKey::Camera));
    }

    #[tokio::test]
    async fn unsubscribe_releases_handle_even_if_send_fails() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;

        connector.last_link().sever_outbound().await;
        let result = bridge.unsubscribe(TopicKey::CurrentState);

        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(bridge.live_subscriptions().iter().all(|h| h.key != TopicKey::CurrentState));
    }

    #[tokio::test]
    async fn publish_role_topic_cannot_be_subscribed() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        assert!(matches!(
            bridge.subscribe_one(TopicKey::Estop).await,
            Err(BridgeError::Protocol(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_listing_is_retried() {
        let connector = MockConnector::with_topics(&all_topics()).ignore_listings(2);
        let bridge = bridge_with(&connector);
        bridge.open(config(ADDR));

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(bridge.live_subscriptions().len(), 4);
        assert_eq!(connector.last_link().ops("call_service").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn listing_gives_up_after_max_retries_but_stays_connected() {
        let connector = MockConnector::with_topics(&all_topics()).ignore_listings(3);
        let bridge = bridge_with(&connector);
        bridge.open(config(ADDR));

        tokio::time::sleep(Duration::from_millis(7_000)).await;
        assert!(bridge.live_subscriptions().is_empty());
        assert_eq!(connector.last_link().ops("call_service").len(), 3);
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn custom_wire_names_are_honoured() {
        let registry = TopicRegistry::default()
            .with_wire_name(TopicKey::CurrentState, "/robot/state")
            .unwrap();
        let connector = MockConnector::with_topics(&["/robot/state"]);
        let bridge = crate::Bridge::new(registry, std::sync::Arc::new(connector.clone()));
        bridge.open(config(ADDR));

        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 1).await;
        connector.last_link().inject("/robot/state", json!({"data": "teleop"})).await;
        let b = bridge.clone();
        eventually(move || b.store().get(TopicKey::CurrentState) == Some(TopicValue::Status("teleop".into()))).await;
    }
}
