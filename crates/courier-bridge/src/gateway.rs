//! Outbound command gateway.
//!
//! Commands go out only through a live publisher handle.  Without one the
//! command is dropped with a warning and reported as
//! [`BridgeError::PublishTargetMissing`]; nothing is queued for later.

use courier_types::{
    BoolMsg, BridgeError, Point, Pose, PoseStamped, Quaternion, Settings, StringMsg, Twist,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::Bridge;
use crate::protocol::ClientOp;
use crate::registry::TopicKey;

/// Joystick deflection; each axis is clamped to `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisInput {
    /// Left/right deflection, positive to the right.
    pub x: f64,
    /// Up/down deflection, positive downwards (screen coordinates).
    pub y: f64,
}

/// Speeds reached at full deflection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityLimits {
    pub max_linear: f64,
    pub max_angular: f64,
}

impl VelocityLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_linear: settings.max_linear_velocity,
            max_angular: settings.max_angular_velocity,
        }
    }
}

impl Default for VelocityLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn clamp_axis(v: f64) -> f64 {
    if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 }
}

/// Shape a stick deflection into a planar velocity command.
///
/// Pushing the stick up (negative `y`) drives forward; pushing it right
/// (positive `x`) turns clockwise.
pub fn velocity_command(input: AxisInput, limits: VelocityLimits) -> Twist {
    let linear = -clamp_axis(input.y) * limits.max_linear;
    let angular = -clamp_axis(input.x) * limits.max_angular;
    // Normalise -0.0 so an idle stick serialises as a plain zero.
    Twist::planar(linear + 0.0, angular + 0.0)
}

impl Bridge {
    /// Publish a raw message on a publish-role topic.
    pub fn publish(&self, key: TopicKey, message: Value) -> Result<(), BridgeError> {
        let Some(topic) = self.registry().get(key) else {
            warn!(topic = %key, "command for unknown topic dropped");
            return Err(BridgeError::PublishTargetMissing(key.to_string()));
        };
        if !topic.is_publisher() {
            warn!(topic = %topic.wire_name, "command for subscribe-only topic dropped");
            return Err(BridgeError::PublishTargetMissing(topic.wire_name.clone()));
        }

        let s = self.session();
        if !s.publishers.contains_key(&key) {
            warn!(topic = %topic.wire_name, "no live publisher; command dropped");
            return Err(BridgeError::PublishTargetMissing(topic.wire_name.clone()));
        }
        s.send(&ClientOp::Publish { topic: &topic.wire_name, msg: &message })
            .inspect(|_| debug!(topic = %topic.wire_name, "published"))
            .inspect_err(|e| warn!(topic = %topic.wire_name, error = %e, "publish failed"))
    }

    fn publish_typed<T: Serialize>(&self, key: TopicKey, message: &T) -> Result<(), BridgeError> {
        let value = serde_json::to_value(message).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        self.publish(key, value)
    }

    pub fn publish_twist(&self, twist: &Twist) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::CmdVel, twist)
    }

    /// Shape and publish a teleop velocity command.
    pub fn publish_velocity(&self, input: AxisInput, limits: VelocityLimits) -> Result<Twist, BridgeError> {
        let twist = velocity_command(input, limits);
        self.publish_twist(&twist)?;
        Ok(twist)
    }

    /// Send the robot to `pose` in the map frame.
    pub fn publish_goal(&self, pose: Pose) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::GoalPoint, &PoseStamped::in_map(pose))
    }

    pub fn publish_home(&self, point: Point) -> Result<(), BridgeError> {
        let pose = Pose::new(point, Quaternion::default());
        self.publish_typed(TopicKey::HomePoint, &PoseStamped::in_map(pose))
    }

    pub fn publish_estop(&self, engaged: bool) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::Estop, &BoolMsg { data: engaged })
    }

    pub fn publish_teleop_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::TeleopEnable, &BoolMsg { data: enabled })
    }

    pub fn publish_cancel_move(&self, cancel: bool) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::CancelMove, &BoolMsg { data: cancel })
    }

    pub fn publish_destination_email(&self, email: &str) -> Result<(), BridgeError> {
        self.publish_typed(TopicKey::DestinationEmail, &StringMsg { data: email.to_string() })
    }
}
