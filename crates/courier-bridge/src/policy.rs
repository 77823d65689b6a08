//! Connection-mode selection and settings-driven re-provisioning.
//!
//! | Mode       | On start                        | Primary not up after grace     |
//! |------------|---------------------------------|--------------------------------|
//! | `auto`     | connect to the primary address  | nothing                        |
//! | `manual`   | wait for an explicit connect    | nothing                        |
//! | `fallback` | connect to the primary address  | connect to the fallback, once  |
//!
//! Every timer is scheduled against the scheduler's current generation, and
//! every connect, disconnect or change of connection parameters advances it,
//! so a timer from an older configuration can never reconnect to a stale
//! address.

use std::sync::Arc;
use std::time::Duration;

use courier_types::{BridgeError, ConnectionConfig, ConnectionMode, ConnectionState, Settings};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::connection::Bridge;
use crate::registry::TopicKey;
use crate::scheduler::{Generation, Scheduler};

pub const FALLBACK_GRACE: Duration = Duration::from_secs(3);
/// Pause between accepting new settings and closing the transport, so that
/// anything published just before (the home point) is flushed.
pub const CLOSE_GRACE: Duration = Duration::from_millis(100);
/// Pause between close and reopen.
pub const REOPEN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTiming {
    pub fallback_grace: Duration,
    pub close_grace: Duration,
    pub reopen_grace: Duration,
}

impl Default for PolicyTiming {
    fn default() -> Self {
        Self {
            fallback_grace: FALLBACK_GRACE,
            close_grace: CLOSE_GRACE,
            reopen_grace: REOPEN_GRACE,
        }
    }
}

/// Result of a successful [`ReconnectPolicy::apply_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Settings stored; the connection was left alone.
    Applied,
    /// Connection parameters changed; close and reopen are scheduled.
    ReconnectScheduled,
}

#[derive(Clone)]
pub struct ReconnectPolicy {
    bridge: Bridge,
    scheduler: Scheduler,
    settings: Arc<Mutex<Settings>>,
    timing: PolicyTiming,
}

impl ReconnectPolicy {
    pub fn new(bridge: Bridge, settings: Settings) -> Self {
        Self {
            bridge,
            scheduler: Scheduler::new(),
            settings: Arc::new(Mutex::new(settings)),
            timing: PolicyTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: PolicyTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Latest accepted settings.
    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Apply the stored settings' mode: connect unless manual.
    pub fn start(&self) {
        let settings = self.settings();
        self.bridge.set_topic_enabled(TopicKey::Camera, settings.camera_enabled);
        match settings.connection_mode {
            ConnectionMode::Manual => {
                info!(robot = %settings.robot_name, "manual connection mode; waiting for connect");
            }
            ConnectionMode::Auto | ConnectionMode::Fallback => self.connect(),
        }
    }

    /// Connect with the stored settings, superseding pending timers.
    pub fn connect(&self) {
        let generation = self.scheduler.advance();
        let settings = self.settings();
        self.open_for(generation, &settings);
    }

    /// Close the connection and cancel pending timers.
    pub fn disconnect(&self) {
        self.scheduler.advance();
        self.bridge.close();
    }

    fn open_for(&self, generation: Generation, settings: &Settings) {
        let config = ConnectionConfig::from_settings(settings);
        let fallback = match config.mode {
            ConnectionMode::Fallback => config.fallback_address.clone(),
            _ => None,
        };
        self.bridge.open(config.clone());

        if let Some(address) = fallback {
            let bridge = self.bridge.clone();
            self.scheduler.schedule(self.timing.fallback_grace, generation, move || {
                if bridge.connection_state() == ConnectionState::Connected {
                    info!("primary bridge connected; fallback not needed");
                    return;
                }
                warn!(primary = %config.address, fallback = %address, "primary bridge not connected in time; trying fallback");
                bridge.open(config.with_address(address));
            });
        }
    }

    /// Validate and apply operator settings.
    ///
    /// Rejected settings change nothing.  Accepted settings are stored at
    /// once; a changed home point is published and the camera toggle takes
    /// effect right away.  Only a change of connection parameters touches the
    /// connection: it supersedes pending timers, then closes and reopens on
    /// two grace timers.  Any other change leaves a pending reopen or
    /// fallback check in place.
    pub fn apply_settings(&self, new: Settings) -> Result<ApplyOutcome, BridgeError> {
        new.validate()?;
        if self.bridge.store().teleop_enabled() {
            return Err(BridgeError::Validation(
                "settings cannot be changed while teleop is enabled".into(),
            ));
        }
        let previous = std::mem::replace(&mut *self.settings.lock(), new.clone());

        if new.home != previous.home
            && let Some(home) = new.home
        {
            // Failure is already logged by the gateway; the reconnect goes ahead.
            let _ = self.bridge.publish_home(home);
        }
        self.bridge.set_topic_enabled(TopicKey::Camera, new.camera_enabled);

        if ConnectionConfig::from_settings(&previous) == ConnectionConfig::from_settings(&new) {
            info!("settings applied");
            return Ok(ApplyOutcome::Applied);
        }

        let generation = self.scheduler.advance();
        info!(address = %new.bridge_address, mode = %new.connection_mode, "connection settings changed; reconnecting");
        let manual = new.connection_mode == ConnectionMode::Manual;
        let policy = self.clone();
        self.scheduler.schedule(self.timing.close_grace, generation, move || {
            policy.bridge.close();
            if manual {
                info!("manual connection mode; not reconnecting");
                return;
            }
            let reopen = policy.clone();
            policy.scheduler.schedule(policy.timing.reopen_grace, generation, move || {
                let settings = reopen.settings();
                reopen.open_for(generation, &settings);
            });
        });
        Ok(ApplyOutcome::ReconnectScheduled)
    }
}
