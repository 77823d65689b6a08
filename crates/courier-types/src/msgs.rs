//! Message schemas exchanged with the robot's bus through the bridge.
//!
//! Field names follow the bus definitions exactly so that values serialise
//! straight into the `msg` member of a bridge frame.

use serde::{Deserialize, Serialize};

/// Reference frame stamped onto goal and home poses.
pub const MAP_FRAME: &str = "map";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Floor index on multi-storey sites.
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    /// The identity rotation.
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quaternion {
    /// Rotation of `yaw_rad` about the vertical axis.
    pub fn from_yaw(yaw_rad: f64) -> Self {
        let half = yaw_rad / 2.0;
        Self { x: 0.0, y: 0.0, z: half.sin(), w: half.cos() }
    }

    /// Heading in radians, in `(-π, π]`.
    pub fn yaw(&self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Point, orientation: Quaternion) -> Self {
        Self { position, orientation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

impl PoseStamped {
    /// Wrap `pose` in the map frame with a zero stamp; the robot fills in
    /// its own clock on receipt.
    pub fn in_map(pose: Pose) -> Self {
        Self {
            header: Header {
                stamp: Time::default(),
                frame_id: MAP_FRAME.to_string(),
            },
            pose,
        }
    }
}

/// Generic motion command: linear and angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl Twist {
    /// Planar command: forward speed (m/s) and yaw rate (rad/s).
    pub fn planar(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear: Vector3 { x: linear_x, y: 0.0, z: 0.0 },
            angular: Vector3 { x: 0.0, y: 0.0, z: angular_z },
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoolMsg {
    pub data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

/// A camera frame; `data` is already base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressedImage {
    #[serde(default)]
    pub format: String,
    pub data: String,
}

impl CompressedImage {
    /// Render the frame as a `data:` URI an `<img>` element can display.
    pub fn to_data_uri(&self) -> String {
        let mime = if self.format.to_ascii_lowercase().contains("png") {
            "png"
        } else {
            "jpeg"
        };
        format!("data:image/{mime};base64,{}", self.data)
    }
}
