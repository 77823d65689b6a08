//! Table of named logical channels ("topics") the dashboard knows about.
//!
//! Every topic is addressed by a [`TopicKey`] from a closed set.  The
//! descriptor's [`TopicRole`] carries the decoder for inbound topics, so a
//! subscribe-role topic without a decoder (or a publish-role topic with one)
//! cannot be expressed.
//!
//! | Key | Default wire name | Role |
//! |---|---|---|
//! | [`TopicKey::Camera`] | `/camera/color/image_compressed/compressed` | subscribe |
//! | [`TopicKey::CurrentPoint`] | `/current_point` | subscribe |
//! | [`TopicKey::CurrentState`] | `/current_state` | subscribe |
//! | [`TopicKey::GoalReached`] | `/goal_reached` | subscribe |
//! | [`TopicKey::CmdVel`] | `/cmd_vel` | publish |
//! | [`TopicKey::GoalPoint`] | `/goal_point` | publish |
//! | [`TopicKey::HomePoint`] | `/home_point` | publish |
//! | [`TopicKey::Estop`] | `/estop` | publish |
//! | [`TopicKey::TeleopEnable`] | `/teleop_enable` | publish |
//! | [`TopicKey::CancelMove`] | `/cancel_move` | publish |
//! | [`TopicKey::DestinationEmail`] | `/destination_email` | publish |

use std::collections::HashSet;

use courier_types::{BoolMsg, BridgeError, CompressedImage, Pose, StringMsg, TopicValue};
use serde_json::Value;

pub const COMPRESSED_IMAGE: &str = "sensor_msgs/CompressedImage";
pub const POSE: &str = "geometry_msgs/Pose";
pub const POSE_STAMPED: &str = "geometry_msgs/PoseStamped";
pub const TWIST: &str = "geometry_msgs/Twist";
pub const BOOL: &str = "std_msgs/Bool";
pub const STRING: &str = "std_msgs/String";

/// Identifier of every channel the dashboard can talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKey {
    Camera,
    CurrentPoint,
    CurrentState,
    GoalReached,
    CmdVel,
    GoalPoint,
    HomePoint,
    Estop,
    TeleopEnable,
    CancelMove,
    DestinationEmail,
}

impl TopicKey {
    pub const ALL: [TopicKey; 11] = [
        TopicKey::Camera,
        TopicKey::CurrentPoint,
        TopicKey::CurrentState,
        TopicKey::GoalReached,
        TopicKey::CmdVel,
        TopicKey::GoalPoint,
        TopicKey::HomePoint,
        TopicKey::Estop,
        TopicKey::TeleopEnable,
        TopicKey::CancelMove,
        TopicKey::DestinationEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKey::Camera => "camera",
            TopicKey::CurrentPoint => "current_point",
            TopicKey::CurrentState => "current_state",
            TopicKey::GoalReached => "goal_reached",
            TopicKey::CmdVel => "cmd_vel",
            TopicKey::GoalPoint => "goal_point",
            TopicKey::HomePoint => "home_point",
            TopicKey::Estop => "estop",
            TopicKey::TeleopEnable => "teleop_enable",
            TopicKey::CancelMove => "cancel_move",
            TopicKey::DestinationEmail => "destination_email",
        }
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an inbound message becomes a cached [`TopicValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Compressed camera frame → `data:` URI.
    CompressedImage,
    /// Pose → `{position, orientation}`.
    Pose,
    /// String message → raw status text.
    Status,
    /// Bool message → raw flag.
    Flag,
}

impl Decoder {
    pub fn decode(&self, msg: &Value) -> Result<TopicValue, BridgeError> {
        fn parse<T: serde::de::DeserializeOwned>(msg: &Value) -> Result<T, BridgeError> {
            T::deserialize(msg).map_err(|e| BridgeError::Protocol(format!("malformed message: {e}")))
        }

        Ok(match self {
            Decoder::CompressedImage => TopicValue::Image(parse::<CompressedImage>(msg)?.to_data_uri()),
            Decoder::Pose => TopicValue::Pose(parse::<Pose>(msg)?),
            Decoder::Status => TopicValue::Status(parse::<StringMsg>(msg)?.data),
            Decoder::Flag => TopicValue::Flag(parse::<BoolMsg>(msg)?.data),
        })
    }
}

/// Direction of a topic relative to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    /// Outbound: the dashboard publishes, never subscribes.
    Publish,
    /// Inbound: the dashboard subscribes and decodes, never publishes.
    Subscribe(Decoder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub key: TopicKey,
    /// Bus-level channel name.
    pub wire_name: String,
    /// Bus-level message type, e.g. `geometry_msgs/Pose`.
    pub schema_tag: String,
    pub role: TopicRole,
}

impl TopicDescriptor {
    pub fn publisher(key: TopicKey, wire_name: &str, schema_tag: &str) -> Self {
        Self {
            key,
            wire_name: wire_name.to_string(),
            schema_tag: schema_tag.to_string(),
            role: TopicRole::Publish,
        }
    }

    pub fn subscriber(key: TopicKey, wire_name: &str, schema_tag: &str, decoder: Decoder) -> Self {
        Self {
            key,
            wire_name: wire_name.to_string(),
            schema_tag: schema_tag.to_string(),
            role: TopicRole::Subscribe(decoder),
        }
    }

    /// The decoder, present exactly for subscribe-role topics.
    pub fn decoder(&self) -> Option<Decoder> {
        match self.role {
            TopicRole::Subscribe(d) => Some(d),
            TopicRole::Publish => None,
        }
    }

    pub fn is_publisher(&self) -> bool {
        self.role == TopicRole::Publish
    }

    pub fn is_subscriber(&self) -> bool {
        !self.is_publisher()
    }
}

#[derive(Debug, Clone)]
pub struct TopicRegistry {
    topics: Vec<TopicDescriptor>,
}

impl TopicRegistry {
    /// Build a registry from `topics`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if a key or a wire name appears twice.
    pub fn new(topics: Vec<TopicDescriptor>) -> Result<Self, BridgeError> {
        let mut keys = HashSet::new();
        let mut wires = HashSet::new();
        for t in &topics {
            if !keys.insert(t.key) {
                return Err(BridgeError::Validation(format!("duplicate topic key '{}'", t.key)));
            }
            if !wires.insert(t.wire_name.as_str()) {
                return Err(BridgeError::Validation(format!(
                    "duplicate wire name '{}'",
                    t.wire_name
                )));
            }
        }
        Ok(Self { topics })
    }

    /// Rename the bus channel behind `key`.
    pub fn with_wire_name(mut self, key: TopicKey, wire_name: &str) -> Result<Self, BridgeError> {
        let Some(topic) = self.topics.iter_mut().find(|t| t.key == key) else {
            return Err(BridgeError::Validation(format!("unknown topic key '{key}'")));
        };
        topic.wire_name = wire_name.to_string();
        Self::new(self.topics)
    }

    pub fn get(&self, key: TopicKey) -> Option<&TopicDescriptor> {
        self.topics.iter().find(|t| t.key == key)
    }

    pub fn by_wire_name(&self, wire_name: &str) -> Option<&TopicDescriptor> {
        self.topics.iter().find(|t| t.wire_name == wire_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicDescriptor> {
        self.topics.iter()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &TopicDescriptor> {
        self.topics.iter().filter(|t| t.is_subscriber())
    }

    pub fn publishers(&self) -> impl Iterator<Item = &TopicDescriptor> {
        self.topics.iter().filter(|t| t.is_publisher())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        use TopicKey::*;
        Self {
            topics: vec![
                TopicDescriptor::subscriber(
                    Camera,
                    "/camera/color/image_compressed/compressed",
                    COMPRESSED_IMAGE,
                    Decoder::CompressedImage,
                ),
                TopicDescriptor::subscriber(CurrentPoint, "/current_point", POSE, Decoder::Pose),
                TopicDescriptor::subscriber(CurrentState, "/current_state", STRING, Decoder::Status),
                TopicDescriptor::subscriber(GoalReached, "/goal_reached", BOOL, Decoder::Flag),
                TopicDescriptor::publisher(CmdVel, "/cmd_vel", TWIST),
                TopicDescriptor::publisher(GoalPoint, "/goal_point", POSE_STAMPED),
                TopicDescriptor::publisher(HomePoint, "/home_point", POSE_STAMPED),
                TopicDescriptor::publisher(Estop, "/estop", BOOL),
                TopicDescriptor::publisher(TeleopEnable, "/teleop_enable", BOOL),
                TopicDescriptor::publisher(CancelMove, "/cancel_move", BOOL),
                TopicDescriptor::publisher(DestinationEmail, "/destination_email", STRING),
            ],
        }
    }
}
