//! Operator settings and the connection configuration derived from them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BridgeError, ConnectionMode, Point};

/// Port the bridge service listens on unless the address names another.
pub const DEFAULT_BRIDGE_PORT: u16 = 9090;

/// Upper bound accepted for `max_linear_velocity` (m/s).
pub const MAX_LINEAR_VELOCITY_LIMIT: f64 = 2.0;
/// Upper bound accepted for `max_angular_velocity` (rad/s).
pub const MAX_ANGULAR_VELOCITY_LIMIT: f64 = 1.5;
/// Upper bound accepted for `update_frequency` (Hz).
pub const MAX_UPDATE_FREQUENCY: u32 = 100;

/// How chatty the dashboard's own logging is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsLevel {
    Minimal,
    #[default]
    Standard,
    Verbose,
}

impl DiagnosticsLevel {
    /// Default `tracing` filter directive for this level.
    pub fn log_filter(&self) -> &'static str {
        match self {
            DiagnosticsLevel::Minimal => "warn",
            DiagnosticsLevel::Standard => "info",
            DiagnosticsLevel::Verbose => "debug",
        }
    }
}

/// Transport tuning knobs.  Rarely touched by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTuning {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for each topic-listing reply.
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    /// Topic-listing attempts before subscribe-all gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Outbound frame queue capacity and per-subscription queue length.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_retry_timeout_ms() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_queue_depth() -> usize {
    64
}

impl Default for ConnectionTuning {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_timeout_ms: default_retry_timeout_ms(),
            max_retries: default_max_retries(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Everything the settings page lets an operator change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_robot_name")]
    pub robot_name: String,

    /// Teleop speed at full stick deflection (m/s).
    #[serde(default = "default_max_linear_velocity")]
    pub max_linear_velocity: f64,

    /// Teleop yaw rate at full stick deflection (rad/s).
    #[serde(default = "default_max_angular_velocity")]
    pub max_angular_velocity: f64,

    #[serde(default = "default_true")]
    pub camera_enabled: bool,

    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// Teleop command rate (Hz).
    #[serde(default = "default_update_frequency")]
    pub update_frequency: u32,

    #[serde(default)]
    pub diagnostics_level: DiagnosticsLevel,

    /// Host (optionally `scheme://host:port`) of the bridge service.
    #[serde(default = "default_bridge_address")]
    pub bridge_address: String,

    /// Secondary bridge address used in [`ConnectionMode::Fallback`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_address: Option<String>,

    /// Minimum interval between inbound messages per subscription.
    #[serde(default = "default_throttle_rate_ms")]
    pub throttle_rate_ms: u64,

    /// Pending home point; published to the robot when settings are applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<Point>,

    #[serde(default)]
    pub connection: ConnectionTuning,
}

fn default_robot_name() -> String {
    "Robot-1".to_string()
}
fn default_max_linear_velocity() -> f64 {
    1.0
}
fn default_max_angular_velocity() -> f64 {
    0.8
}
fn default_true() -> bool {
    true
}
fn default_update_frequency() -> u32 {
    50
}
fn default_bridge_address() -> String {
    "10.108.36.115".to_string()
}
fn default_throttle_rate_ms() -> u64 {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            robot_name: default_robot_name(),
            max_linear_velocity: default_max_linear_velocity(),
            max_angular_velocity: default_max_angular_velocity(),
            camera_enabled: true,
            connection_mode: ConnectionMode::default(),
            update_frequency: default_update_frequency(),
            diagnostics_level: DiagnosticsLevel::default(),
            bridge_address: default_bridge_address(),
            fallback_address: None,
            throttle_rate_ms: default_throttle_rate_ms(),
            home: None,
            connection: ConnectionTuning::default(),
        }
    }
}

impl Settings {
    /// Reject out-of-bounds values.  Invalid settings are never applied.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let v = self.max_linear_velocity;
        if !(v > 0.0 && v <= MAX_LINEAR_VELOCITY_LIMIT) {
            return Err(BridgeError::Validation(format!(
                "linear velocity must be between 0 and {MAX_LINEAR_VELOCITY_LIMIT} m/s (got {v})"
            )));
        }
        let w = self.max_angular_velocity;
        if !(w > 0.0 && w <= MAX_ANGULAR_VELOCITY_LIMIT) {
            return Err(BridgeError::Validation(format!(
                "angular velocity must be between 0 and {MAX_ANGULAR_VELOCITY_LIMIT} rad/s (got {w})"
            )));
        }
        if self.robot_name.trim().is_empty() {
            return Err(BridgeError::Validation("robot name cannot be empty".into()));
        }
        if self.update_frequency == 0 || self.update_frequency > MAX_UPDATE_FREQUENCY {
            return Err(BridgeError::Validation(format!(
                "update frequency must be between 1 and {MAX_UPDATE_FREQUENCY} Hz (got {})",
                self.update_frequency
            )));
        }
        if self.bridge_address.trim().is_empty() {
            return Err(BridgeError::Validation("bridge address cannot be empty".into()));
        }
        if self.connection_mode == ConnectionMode::Fallback
            && self
                .fallback_address
                .as_deref()
                .is_none_or(|a| a.trim().is_empty())
        {
            return Err(BridgeError::Validation(
                "fallback mode requires a fallback address".into(),
            ));
        }
        if self.connection.queue_depth == 0 {
            return Err(BridgeError::Validation("queue depth must be at least 1".into()));
        }
        if let Some(home) = &self.home
            && !(home.x.is_finite() && home.y.is_finite() && home.z.is_finite())
        {
            return Err(BridgeError::Validation("home point must be finite".into()));
        }
        Ok(())
    }
}

/// Parameters of one connection attempt.
///
/// Never mutated while a connection built from it is live; a new value means
/// teardown and reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: String,
    pub connect_timeout_ms: u64,
    pub retry_timeout_ms: u64,
    pub max_retries: u32,
    pub queue_depth: usize,
    pub mode: ConnectionMode,
    pub fallback_address: Option<String>,
    pub subscription_throttle_ms: u64,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            address: bridge_url(&settings.bridge_address),
            connect_timeout_ms: settings.connection.connect_timeout_ms,
            retry_timeout_ms: settings.connection.retry_timeout_ms,
            max_retries: settings.connection.max_retries,
            queue_depth: settings.connection.queue_depth.max(1),
            mode: settings.connection_mode,
            fallback_address: settings
                .fallback_address
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .map(bridge_url),
            subscription_throttle_ms: settings.throttle_rate_ms,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// Same parameters, aimed at `address`.
    pub fn with_address(&self, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..self.clone()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Normalise a bridge address into `scheme://host:port` form.
///
/// `10.0.0.5` → `ws://10.0.0.5:9090`; an explicit scheme or port is kept.
pub fn bridge_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("ws", address),
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let has_port = match authority.rfind(']') {
        // Bracketed IPv6 literal: a port can only follow the bracket.
        Some(close) => authority[close..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        format!("{scheme}://{authority}{path}")
    } else {
        format!("{scheme}://{authority}:{DEFAULT_BRIDGE_PORT}{path}")
    }
}
