//! [`Bridge`] – the dashboard session's single owner of the bridge connection.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected --open--> Connecting --link up--> Connected
//!      ^                     |                      |
//!      |                     +--- error/timeout ----+--> Erroring
//!      +-------- close / peer hang-up --------------+
//! ```
//!
//! Every connection attempt gets a fresh *generation*.  Teardown bumps the
//! generation, so callbacks still in flight for an older link (a late
//! connect, an inbound message, a topic listing reply) notice they are stale
//! and drop their result instead of touching the session or the store.
//!
//! Transport failures are reported into the observable state and never
//! retried here; reconnect decisions belong to
//! [`ReconnectPolicy`](crate::policy::ReconnectPolicy).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use courier_types::{BridgeError, ConnectionConfig, ConnectionState};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::protocol::{self, ClientOp, ServerOp};
use crate::registry::{TopicKey, TopicRegistry};
use crate::store::StateStore;
use crate::transport::{Connector, Inbound, Link, Outbound, WebSocketConnector};

/// Proof that a subscribe-role topic is currently subscribed on the live
/// connection.  Owned by the session; surrendered on unsubscribe or teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSubscriptionHandle {
    pub key: TopicKey,
    pub wire_name: String,
    /// Request id used for the subscribe (and matching unsubscribe) frame.
    pub id: String,
    /// Connection generation the subscription belongs to.
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PublisherHandle {
    pub(crate) id: String,
    pub(crate) wire_name: String,
}

#[derive(Debug)]
pub(crate) struct ServiceReply {
    pub(crate) values: Value,
    pub(crate) result: bool,
}

/// Mutable per-session state.  Guarded by one lock so that generation checks
/// and the writes they protect happen atomically.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) generation: u64,
    pub(crate) config: Option<ConnectionConfig>,
    pub(crate) outbound: Option<mpsc::Sender<Outbound>>,
    pub(crate) subscriptions: HashMap<TopicKey, LiveSubscriptionHandle>,
    pub(crate) publishers: HashMap<TopicKey, PublisherHandle>,
    /// Topics administratively switched off (e.g. camera disabled).
    pub(crate) disabled: HashSet<TopicKey>,
    pub(crate) pending: HashMap<String, oneshot::Sender<ServiceReply>>,
}

impl Session {
    /// Queue one frame on the live link without blocking.
    pub(crate) fn send(&self, op: &ClientOp<'_>) -> Result<(), BridgeError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| BridgeError::Transport("not connected".into()))?;
        let frame = op.to_frame()?;
        outbound.try_send(Outbound::Frame(frame)).map_err(|e| {
            BridgeError::Transport(match e {
                TrySendError::Full(_) => "outbound queue full".into(),
                TrySendError::Closed(_) => "transport closed".into(),
            })
        })
    }

    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.outbound.is_some()
    }

    /// Forget everything tied to the current link without talking to it and
    /// invalidate its generation.
    fn discard(&mut self) {
        self.outbound = None;
        self.subscriptions.clear();
        self.publishers.clear();
        self.pending.clear();
        self.generation += 1;
    }
}

struct Inner {
    registry: TopicRegistry,
    connector: Arc<dyn Connector>,
    store: StateStore,
    session: Mutex<Session>,
    /// Serialises registry walks.
    walk: tokio::sync::Mutex<()>,
}

/// Cheaply clonable handle to the dashboard's bridge session.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.connection_state())
            .field("generation", &self.generation())
            .finish()
    }
}

impl Bridge {
    pub fn new(registry: TopicRegistry, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                connector,
                store: StateStore::new(),
                session: Mutex::new(Session::default()),
                walk: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// A session that reaches the bridge over WebSocket.
    pub fn websocket(registry: TopicRegistry) -> Self {
        Self::new(registry, Arc::new(WebSocketConnector))
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.store.connection_state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.store.watch_connection()
    }

    /// Generation of the current (or most recently torn down) connection.
    pub fn generation(&self) -> u64 {
        self.session().generation
    }

    /// Config of the connection currently open or being opened.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.session().config.clone()
    }

    /// Snapshot of the open subscriptions, ordered by key.
    pub fn live_subscriptions(&self) -> Vec<LiveSubscriptionHandle> {
        let mut handles: Vec<_> = self.session().subscriptions.values().cloned().collect();
        handles.sort_by_key(|h| h.key);
        handles
    }

    pub fn has_publisher(&self, key: TopicKey) -> bool {
        self.session().publishers.contains_key(&key)
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock()
    }

    pub(crate) async fn walk_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.walk.lock().await
    }

    /// Generation of the live connection, or a transport error if there is
    /// none.
    pub(crate) fn live_generation(&self) -> Result<u64, BridgeError> {
        let s = self.session();
        if s.outbound.is_some() && self.connection_state() == ConnectionState::Connected {
            Ok(s.generation)
        } else {
            Err(BridgeError::Transport("not connected".into()))
        }
    }

    // -----------------------------------------------------------------------
    // open / close
    // -----------------------------------------------------------------------

    /// Start connecting with `config`.
    ///
    /// Any existing connection is torn down first; two connections never
    /// coexist.  Returns a receiver that observes the resulting state
    /// transitions.
    pub fn open(&self, config: ConnectionConfig) -> watch::Receiver<ConnectionState> {
        let generation = {
            let mut s = self.session();
            self.teardown(&mut s);
            s.config = Some(config.clone());
            self.inner.store.set_error(None);
            self.inner.store.set_connection(ConnectionState::Connecting);
            s.generation
        };
        info!(address = %config.address, generation, "opening bridge connection");

        let bridge = self.clone();
        tokio::spawn(async move { bridge.run_connection(generation, config).await });
        self.watch_connection()
    }

    /// Unsubscribe everything and close the transport.  Safe to call at any
    /// time, any number of times.
    pub fn close(&self) {
        let mut s = self.session();
        let had_link = s.outbound.is_some();
        self.teardown(&mut s);
        s.config = None;
        self.inner.store.set_connection(ConnectionState::Disconnected);
        if had_link {
            info!("bridge connection closed");
        }
    }

    /// Unsubscribe live handles, withdraw publishers, then sever the link.
    /// Individual send failures are logged and do not stop the teardown.
    fn teardown(&self, s: &mut Session) {
        let subscriptions: Vec<_> = s.subscriptions.drain().map(|(_, h)| h).collect();
        for handle in subscriptions {
            match s.send(&ClientOp::Unsubscribe { id: &handle.id, topic: &handle.wire_name }) {
                Ok(()) => debug!(topic = %handle.wire_name, "unsubscribed"),
                Err(e) => warn!(topic = %handle.wire_name, error = %e, "unsubscribe failed; continuing teardown"),
            }
        }
        let publishers: Vec<_> = s.publishers.drain().map(|(_, h)| h).collect();
        for handle in publishers {
            if let Err(e) = s.send(&ClientOp::Unadvertise { id: &handle.id, topic: &handle.wire_name }) {
                debug!(topic = %handle.wire_name, error = %e, "unadvertise failed");
            }
        }
        if let Some(outbound) = s.outbound.take()
            && outbound.try_send(Outbound::Close).is_err()
        {
            debug!("close request not queued; dropping the link instead");
        }
        s.discard();
    }

    // -----------------------------------------------------------------------
    // Connection task
    // -----------------------------------------------------------------------

    async fn run_connection(self, generation: u64, config: ConnectionConfig) {
        let connect = self.inner.connector.connect(&config.address, config.queue_depth);
        let link = match tokio::time::timeout(config.connect_timeout(), connect).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                self.fail(generation, e.to_string());
                return;
            }
            Err(_) => {
                self.fail(
                    generation,
                    format!(
                        "timed out after {} ms connecting to {}",
                        config.connect_timeout_ms, config.address
                    ),
                );
                return;
            }
        };

        let Link { outbound, inbound } = link;
        {
            let mut s = self.session();
            if s.generation != generation {
                debug!(generation, "connection superseded while connecting; closing it");
                let _ = outbound.try_send(Outbound::Close);
                return;
            }
            s.outbound = Some(outbound);
            self.inner.store.set_error(None);
            self.inner.store.set_connection(ConnectionState::Connected);
            self.advertise_publishers(&mut s);
        }
        info!(address = %config.address, generation, "connected to bridge");

        let reader = self.clone();
        tokio::spawn(async move { reader.read_loop(generation, inbound).await });

        self.subscribe_registry(generation).await;
    }

    /// Publish-role topics get their handle right away; no existence check.
    fn advertise_publishers(&self, s: &mut Session) {
        for topic in self.inner.registry.publishers() {
            let id = format!("advertise:{}:{}", topic.wire_name, Uuid::new_v4());
            let op = ClientOp::Advertise {
                id: &id,
                topic: &topic.wire_name,
                msg_type: &topic.schema_tag,
            };
            match s.send(&op) {
                Ok(()) => {
                    s.publishers.insert(
                        topic.key,
                        PublisherHandle { id, wire_name: topic.wire_name.clone() },
                    );
                }
                Err(e) => warn!(topic = %topic.wire_name, error = %e, "advertise failed"),
            }
        }
    }

    async fn read_loop(self, generation: u64, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Frame(text) => self.handle_frame(generation, &text),
                Inbound::Closed(reason) => {
                    self.on_closed(generation, reason);
                    return;
                }
                Inbound::Error(e) => {
                    self.fail(generation, e);
                    return;
                }
            }
        }
        self.on_closed(generation, None);
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        match protocol::parse_frame(text) {
            Ok(ServerOp::Publish { topic, msg }) => match self.route_inbound(generation, &topic, &msg) {
                Ok(()) => {}
                Err(BridgeError::StaleCallback(_)) => trace!(topic = %topic, "stale message dropped"),
                Err(e) => warn!(topic = %topic, error = %e, "inbound message dropped"),
            },
            Ok(ServerOp::ServiceResponse { id, values, result }) => {
                let waiter = id.and_then(|id| {
                    let mut s = self.session();
                    if s.generation == generation { s.pending.remove(&id) } else { None }
                });
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(ServiceReply { values, result });
                    }
                    None => debug!("unsolicited service response"),
                }
            }
            Ok(ServerOp::Status { level, msg }) => {
                debug!(level = level.as_deref().unwrap_or("-"), msg = msg.as_deref().unwrap_or(""), "bridge status");
            }
            Ok(ServerOp::Other) => trace!("ignoring unsupported bridge op"),
            Err(e) => warn!(error = %e, "dropping unparseable frame"),
        }
    }

    fn fail(&self, generation: u64, error: String) {
        let mut s = self.session();
        if s.generation != generation {
            debug!(generation, error = %error, "ignoring failure of superseded connection");
            return;
        }
        s.discard();
        warn!(error = %error, "bridge connection error");
        self.inner.store.set_error(Some(error));
        self.inner.store.set_connection(ConnectionState::Erroring);
    }

    /// The transport went away on its own; handles are already meaningless,
    /// so they are dropped without unsubscribing.
    fn on_closed(&self, generation: u64, reason: Option<String>) {
        let mut s = self.session();
        if s.generation != generation {
            return;
        }
        s.discard();
        let text = match reason {
            Some(r) => format!("Connection to robot closed: {r}"),
            None => "Connection to robot closed.".to_string(),
        };
        info!(reason = %text, "bridge connection closed by peer");
        self.inner.store.set_error(Some(text));
        self.inner.store.set_connection(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{ADDR, all_topics, bridge_with, config, connected};
    use crate::transport::mock::{CLOSE_MARKER, MockConnector, eventually};

    #[tokio::test]
    async fn open_reaches_connected_and_advertises_publishers() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = bridge_with(&connector);

        let mut rx = bridge.open(config(ADDR));
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);

        for key in [TopicKey::CmdVel, TopicKey::GoalPoint, TopicKey::Estop] {
            assert!(bridge.has_publisher(key), "{key} should be advertised");
        }
        let link = connector.last_link();
        assert_eq!(link.ops("advertise").len(), 7);
        assert!(bridge.store().last_error().is_none());
    }

    #[tokio::test]
    async fn reopen_tears_down_previous_connection_first() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let first = connector.link(0);

        bridge.open(config("ws://other:9090"));
        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 4 && b.config().unwrap().address == "ws://other:9090").await;
        let f = first.clone();
        eventually(move || f.was_closed()).await;

        let first_frames = first.frames();
        assert_eq!(first.ops("unsubscribe").len(), 4);
        assert_eq!(first_frames.last().unwrap()["op"], CLOSE_MARKER);
        assert_eq!(connector.link_count(), 2);
        assert!(bridge.live_subscriptions().iter().all(|h| h.generation == bridge.generation()));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_safe_without_connection() {
        let connector = MockConnector::with_topics(&[]);
        let bridge = bridge_with(&connector);
        bridge.close();
        bridge.close();
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn close_leaves_no_handles_even_when_unsubscribe_fails() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;

        connector.last_link().sever_outbound().await;
        bridge.close();

        assert!(bridge.live_subscriptions().is_empty());
        assert!(!bridge.has_publisher(TopicKey::Estop));
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_not_retried() {
        let connector = MockConnector::with_topics(&[]).unreachable(ADDR);
        let bridge = bridge_with(&connector);
        bridge.open(config(ADDR));

        let b = bridge.clone();
        eventually(move || b.connection_state() == ConnectionState::Erroring).await;
        assert!(bridge.store().last_error().unwrap().contains("refused"));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(connector.attempts(), vec![ADDR.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_moves_to_erroring() {
        let connector = MockConnector::with_topics(&[]).hanging(ADDR);
        let bridge = bridge_with(&connector);
        bridge.open(config(ADDR));

        tokio::time::sleep(std::time::Duration::from_millis(5_100)).await;
        assert_eq!(bridge.connection_state(), ConnectionState::Erroring);
        assert!(bridge.store().last_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn peer_hang_up_discards_handles_without_unsubscribing() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let link = connector.last_link();

        link.hang_up().await;
        let b = bridge.clone();
        eventually(move || b.connection_state() == ConnectionState::Disconnected).await;

        assert!(bridge.live_subscriptions().is_empty());
        assert!(link.ops("unsubscribe").is_empty());
        assert!(bridge.store().last_error().unwrap().contains("robot went away"));
    }

    #[tokio::test]
    async fn transport_error_moves_to_erroring() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;

        connector.last_link().fail("connection reset").await;
        let b = bridge.clone();
        eventually(move || b.connection_state() == ConnectionState::Erroring).await;
        assert_eq!(bridge.store().last_error().as_deref(), Some("connection reset"));
        assert!(bridge.live_subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_link_from_a_superseded_attempt_is_closed() {
        let connector = MockConnector::with_topics(&all_topics())
            .delayed(ADDR, std::time::Duration::from_secs(1));
        let bridge = bridge_with(&connector);

        bridge.open(config(ADDR));
        let mut rx = bridge.open(config("ws://other:9090"));
        rx.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let c = connector.clone();
        eventually(move || c.link_count() == 2).await;
        let late = (0..2)
            .map(|i| connector.link(i))
            .find(|l| l.url == ADDR)
            .expect("late link opened");
        let l = late.clone();
        eventually(move || l.was_closed()).await;

        let frames = late.frames();
        assert_eq!(frames.len(), 1, "late link saw traffic: {frames:?}");
        assert_eq!(frames[0]["op"], CLOSE_MARKER);
        assert_eq!(bridge.config().unwrap().address, "ws://other:9090");
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
        let b = bridge.clone();
        eventually(move || b.live_subscriptions().len() == 4).await;
        assert!(bridge.live_subscriptions().iter().all(|h| h.generation == bridge.generation()));
    }

    #[tokio::test]
    async fn messages_from_a_superseded_connection_are_dropped() {
        let connector = MockConnector::with_topics(&all_topics());
        let bridge = connected(&connector).await;
        let old_generation = bridge.generation();

        bridge.open(config(ADDR));
        let result = bridge.route_inbound(old_generation, "/current_state", &json!({"data": "idle"}));

        assert_eq!(result, Err(BridgeError::StaleCallback(old_generation)));
        assert!(bridge.store().current_status().is_none());
    }
}
