//! Operator command gate: e-stop, teleop mode and driving.
//!
//! The bridge publishes whatever it is asked to.  [`TeleopGate`] is the
//! caller-side state machine that decides *whether* to ask:
//!
//! - teleop can only be enabled while the robot reports `idle`, and only be
//!   disabled while it reports `teleop`;
//! - velocity commands flow only while teleop is on and the e-stop is off,
//!   at no more than the configured update frequency;
//! - disabling teleop always sends one final zero-velocity command before
//!   the disabled state becomes observable.

use std::num::NonZeroU32;

use courier_types::{BridgeError, Point, Pose, Quaternion, Settings, Twist};
use courier_types::settings::MAX_UPDATE_FREQUENCY;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connection::Bridge;
use crate::gateway::{AxisInput, VelocityLimits};

/// Robot status required before teleop may be enabled.
pub const STATUS_IDLE: &str = "idle";
/// Robot status required before teleop may be disabled.
pub const STATUS_TELEOP: &str = "teleop";

fn drive_limiter(update_frequency: u32) -> DefaultDirectRateLimiter {
    let hz = NonZeroU32::new(update_frequency.clamp(1, MAX_UPDATE_FREQUENCY)).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(hz).allow_burst(NonZeroU32::MIN))
}

pub struct TeleopGate {
    bridge: Bridge,
    limits: Mutex<VelocityLimits>,
    limiter: Mutex<DefaultDirectRateLimiter>,
}

impl TeleopGate {
    pub fn new(bridge: Bridge, settings: &Settings) -> Self {
        Self {
            bridge,
            limits: Mutex::new(VelocityLimits::from_settings(settings)),
            limiter: Mutex::new(drive_limiter(settings.update_frequency)),
        }
    }

    /// Pick up new velocity limits and drive rate.
    pub fn update_limits(&self, settings: &Settings) {
        *self.limits.lock() = VelocityLimits::from_settings(settings);
        *self.limiter.lock() = drive_limiter(settings.update_frequency);
    }

    pub fn limits(&self) -> VelocityLimits {
        *self.limits.lock()
    }

    fn status(&self) -> String {
        self.bridge.store().current_status().unwrap_or_default()
    }

    /// Flip the e-stop flag and publish its new value.  Returns the new value.
    pub fn toggle_estop(&self) -> bool {
        let engaged = !self.bridge.store().estop_engaged();
        self.set_estop(engaged);
        engaged
    }

    /// Force the e-stop to `engaged` and publish it.
    pub fn set_estop(&self, engaged: bool) {
        self.bridge.store().set_estop_engaged(engaged);
        info!(engaged, "emergency stop");
        // Publish failures are logged by the gateway.
        let _ = self.bridge.publish_estop(engaged);
    }

    pub fn enable_teleop(&self) -> Result<(), BridgeError> {
        let status = self.status();
        if status != STATUS_IDLE {
            return Err(BridgeError::TeleopRejected { action: "enable".into(), status });
        }
        self.bridge.store().set_teleop_enabled(true);
        info!("teleop enabled");
        let _ = self.bridge.publish_teleop_enabled(true);
        Ok(())
    }

    pub fn disable_teleop(&self) -> Result<(), BridgeError> {
        let status = self.status();
        if status != STATUS_TELEOP {
            return Err(BridgeError::TeleopRejected { action: "disable".into(), status });
        }
        let _ = self.bridge.publish_twist(&Twist::zero());
        self.bridge.store().set_teleop_enabled(false);
        info!("teleop disabled");
        let _ = self.bridge.publish_teleop_enabled(false);
        Ok(())
    }

    /// Turn a stick sample into a velocity command.
    ///
    /// Returns `Ok(false)` when the sample is dropped: teleop off, e-stop
    /// engaged, or arriving faster than the update frequency.
    pub fn drive(&self, input: AxisInput) -> Result<bool, BridgeError> {
        let store = self.bridge.store();
        if !store.teleop_enabled() || store.estop_engaged() {
            debug!("drive sample ignored; teleop off or e-stop engaged");
            return Ok(false);
        }
        if self.limiter.lock().check().is_err() {
            return Ok(false);
        }
        self.bridge.publish_velocity(input, self.limits())?;
        Ok(true)
    }

    /// Navigate to `(x, y)` facing `yaw` radians.
    pub fn go_to(&self, x: f64, y: f64, yaw: f64) -> Result<(), BridgeError> {
        self.bridge
            .publish_goal(Pose::new(Point::new(x, y, 0.0), Quaternion::from_yaw(yaw)))
    }

    /// Abort the current move; the robot heads back to its home point.
    pub fn return_home(&self) -> Result<(), BridgeError> {
        self.bridge.publish_cancel_move(true)
    }

    pub fn set_destination_email(&self, email: &str) -> Result<(), BridgeError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(BridgeError::Validation("destination email must not be blank".into()));
        }
        self.bridge.publish_destination_email(email)
    }
}
