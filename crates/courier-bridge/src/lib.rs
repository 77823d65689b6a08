//! `courier-bridge` – the dashboard's link to the robot's message bus.
//!
//! Owns the single WebSocket connection to the bridge service, keeps the
//! topic subscriptions in step with configuration, caches decoded telemetry
//! and relays operator commands.
//!
//! # Modules
//!
//! - [`registry`] – closed table of topics: wire names, schemas, roles and
//!   decoders.
//! - [`protocol`] – JSON frames of the bridge protocol.
//! - [`transport`] – [`Connector`] seam and its WebSocket implementation.
//! - [`connection`] – [`Bridge`], the session object: open/close lifecycle
//!   and generation-checked teardown.
//! - `dispatcher` – registry walk, subscribe/unsubscribe and inbound routing.
//! - [`gateway`] – generic and typed publish operations.
//! - [`store`] – [`StateStore`], latest value per inbound topic.
//! - [`scheduler`] – generation-tokened delayed actions.
//! - [`policy`] – [`ReconnectPolicy`]: connection modes, fallback and
//!   settings-driven reconnect.
//! - [`teleop`] – [`TeleopGate`]: e-stop, teleop gating and driving.

pub mod connection;
mod dispatcher;
pub mod gateway;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod teleop;
pub mod transport;

pub use connection::{Bridge, LiveSubscriptionHandle};
pub use gateway::{AxisInput, VelocityLimits, velocity_command};
pub use policy::{ApplyOutcome, PolicyTiming, ReconnectPolicy};
pub use registry::{Decoder, TopicDescriptor, TopicKey, TopicRegistry, TopicRole};
pub use scheduler::{Generation, Scheduler};
pub use store::StateStore;
pub use teleop::TeleopGate;
pub use transport::{Connector, WebSocketConnector};
