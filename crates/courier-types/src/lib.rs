//! `courier-types` – shared vocabulary of the courier dashboard bridge.
//!
//! - [`msgs`] – serde mirrors of the bus-level message schemas carried over
//!   the bridge (poses, velocity commands, flags, compressed images).
//! - [`settings`] – operator [`Settings`] and the immutable per-attempt
//!   [`ConnectionConfig`] derived from them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod msgs;
pub mod settings;

pub use msgs::{
    BoolMsg, CompressedImage, Header, Point, Pose, PoseStamped, Quaternion, StringMsg, Time,
    Twist, Vector3,
};
pub use settings::{
    ConnectionConfig, ConnectionTuning, DiagnosticsLevel, Settings, DEFAULT_BRIDGE_PORT,
};

/// Lifecycle of the single bridge connection owned by a dashboard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The transport reported an error; see the session's last error text.
    Erroring,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Erroring => write!(f, "erroring"),
        }
    }
}

/// How the session reaches the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Connect immediately to the configured address.
    #[default]
    Auto,
    /// Never connect on its own; wait for an explicit connect.
    Manual,
    /// Try the primary address, then the fallback address after a grace window.
    Fallback,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Auto => write!(f, "auto"),
            ConnectionMode::Manual => write!(f, "manual"),
            ConnectionMode::Fallback => write!(f, "fallback"),
        }
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ConnectionMode::Auto),
            "manual" => Ok(ConnectionMode::Manual),
            "fallback" => Ok(ConnectionMode::Fallback),
            other => Err(BridgeError::Validation(format!(
                "unknown connection mode '{other}' (expected auto, manual or fallback)"
            ))),
        }
    }
}

/// A decoded inbound value as cached by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum TopicValue {
    /// Browser-displayable `data:` URI of a camera frame.
    Image(String),
    Pose(Pose),
    /// Free-form status text, e.g. `"idle"` or `"teleop"`.
    Status(String),
    Flag(bool),
}

/// Every failure the bridge layer can report.
///
/// None of these are fatal: the session recovers locally and reflects the
/// problem into its observable connection/error state.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Topic '{0}' is not currently published on the bus")]
    TopicNotPresent(String),

    #[error("No publisher for '{0}'")]
    PublishTargetMissing(String),

    #[error("Invalid settings: {0}")]
    Validation(String),

    #[error("Dropped message from superseded connection generation {0}")]
    StaleCallback(u64),

    #[error("Bridge protocol error: {0}")]
    Protocol(String),

    #[error("Teleop {action} rejected while robot status is '{status}'")]
    TeleopRejected { action: String, status: String },
}
