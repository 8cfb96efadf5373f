//! Top-level driver for the PI C-887 hexapod controller.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::axes::{Axis, AxisValues};
use crate::config::{HexapodConfig, RetryPolicy};
use crate::coords::CoordinateSystems;
use crate::gcs::{reply, DeviceChannel, GcsError, GcsResult, TransportKind};
use crate::records::Records;
use crate::trigger::Triggers;
use crate::wave::WaveTables;

/// High-level driver for the C-887 hexapod controller.
///
/// Owns the device channel behind a mutex: the firmware cannot interleave
/// conversations, so every command/query round-trip is serialized, and the
/// driver can be shared across threads behind an `Arc`.
pub struct Hexapod {
    channel: Mutex<Box<dyn DeviceChannel>>,
    config: HexapodConfig,
}

impl Hexapod {
    /// Connect over the selected transport and verify the controller
    /// identifies itself.
    pub fn connect(transport: &TransportKind, config: HexapodConfig) -> GcsResult<Self> {
        let mut channel = transport.connect()?;
        let idn = channel.query("*IDN?")?;
        info!("Connected to: {}", idn.trim());
        Ok(Self {
            channel: Mutex::new(channel),
            config,
        })
    }

    /// Wrap an already-open channel.
    ///
    /// Used by tests with a scripted channel; also handy for callers that
    /// construct their own transport.
    pub fn with_channel(channel: Box<dyn DeviceChannel>, config: HexapodConfig) -> Self {
        Self {
            channel: Mutex::new(channel),
            config,
        }
    }

    pub fn config(&self) -> &HexapodConfig {
        &self.config
    }

    /// Close the underlying transport.
    pub fn close(&self) -> GcsResult<()> {
        self.channel().close()
    }

    fn channel(&self) -> MutexGuard<'_, Box<dyn DeviceChannel>> {
        // A poisoned lock only means another thread panicked mid-command;
        // the channel itself is still usable.
        self.channel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Low-level fire-and-forget write.
    pub fn send(&self, cmd: &str) -> GcsResult<()> {
        self.channel().send(cmd)
    }

    /// Low-level query round-trip.
    pub fn query(&self, cmd: &str) -> GcsResult<String> {
        self.channel().query(cmd)
    }

    /// Low-level checked command (`ERR?` verified).
    pub fn command(&self, cmd: &str) -> GcsResult<()> {
        self.channel().command(cmd)
    }

    // ==================== Subsystems ====================

    /// Coordinate-system management (`KEN`/`KSD`/`KLN`/`KRM`/`KET?`/`KLT?`).
    pub fn coords(&self) -> CoordinateSystems<'_> {
        CoordinateSystems::new(self)
    }

    /// Wave-table building and generator binding.
    pub fn waves(&self) -> WaveTables<'_> {
        WaveTables::new(self)
    }

    /// Trigger table and trigger output control.
    pub fn triggers(&self) -> Triggers<'_> {
        Triggers::new(self)
    }

    /// Data-recorder configuration and readback.
    pub fn records(&self) -> Records<'_> {
        Records::new(self)
    }

    // ==================== Motion & Status ====================

    /// Current positions of all axes.
    pub fn position(&self) -> GcsResult<AxisValues> {
        let reply = self.query("POS?")?;
        let mut out = AxisValues::new();
        for (key, value) in reply::key_value_lines(&reply) {
            let Ok(axis) = Axis::from_str(&key) else {
                debug!("ignoring unknown axis {key:?} in POS? reply");
                continue;
            };
            let value: f64 = value
                .parse()
                .map_err(|_| GcsError::Parse(format!("bad position for {key}: {value:?}")))?;
            out.set(axis, value);
        }
        if out.is_empty() {
            return Err(GcsError::Parse(format!("no axes in POS? reply {reply:?}")));
        }
        Ok(out)
    }

    /// Move the given axes to absolute positions.
    pub fn move_to(&self, targets: &AxisValues) -> GcsResult<()> {
        match targets.to_axis_args() {
            Some(args) => self.command(&format!("MOV {args}")),
            None => Ok(()),
        }
    }

    /// Per-axis on-target flags, with bounded retry on transient failures.
    pub fn on_target(&self) -> GcsResult<AxisFlags> {
        self.retry_status(|hex| {
            let flags = hex.on_target_once()?;
            if flags.is_empty() {
                return Err(GcsError::Parse("no axes in ONT? reply".to_string()));
            }
            Ok(flags)
        })
    }

    /// On-target flag for a single axis.
    pub fn axis_on_target(&self, axis: Axis) -> GcsResult<bool> {
        let flags = self.on_target()?;
        flags
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, flag)| *flag)
            .ok_or_else(|| GcsError::Parse(format!("axis {axis} missing from ONT? reply")))
    }

    /// Block until the given axes all report on-target.
    ///
    /// Polls `ONT?` under the staging retry policy; transient query failures
    /// consume attempts like not-settled polls do. Exhaustion yields
    /// [`GcsError::Timeout`].
    pub fn wait_on_target(&self, axes: &[Axis]) -> GcsResult<()> {
        let policy = self.config.stage_retry;
        for _ in 0..policy.max_attempts {
            match self.on_target_once() {
                Ok(flags) => {
                    let settled = axes.iter().all(|axis| {
                        flags
                            .iter()
                            .any(|(a, flag)| a == axis && *flag)
                    });
                    if settled {
                        return Ok(());
                    }
                }
                Err(e) => debug!("ONT? poll failed, retrying: {e}"),
            }
            std::thread::sleep(policy.delay);
        }
        Err(GcsError::Timeout)
    }

    fn on_target_once(&self) -> GcsResult<AxisFlags> {
        let reply = self.query("ONT?")?;
        let mut flags = Vec::new();
        for (key, flag) in reply::bool_flags(&reply)? {
            if let Ok(axis) = Axis::from_str(&key) {
                flags.push((axis, flag));
            }
        }
        Ok(flags)
    }

    /// System velocity (`VLS?`), with bounded retry.
    pub fn velocity(&self) -> GcsResult<f64> {
        self.retry_status(|hex| {
            let reply = hex.query("VLS?")?;
            reply::single_value(&reply)
        })
    }

    /// Set the system velocity (`VLS`).
    pub fn set_velocity(&self, velocity: f64) -> GcsResult<()> {
        self.command(&format!("VLS {velocity}"))
    }

    fn retry_status<T>(&self, mut op: impl FnMut(&Hexapod) -> GcsResult<T>) -> GcsResult<T> {
        let policy: RetryPolicy = self.config.status_retry;
        let mut last = GcsError::Timeout;
        for attempt in 0..policy.max_attempts {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("status query attempt {} failed: {e}", attempt + 1);
                    last = e;
                }
            }
            std::thread::sleep(policy.delay);
        }
        debug!("status query gave up: {last}");
        Err(GcsError::Timeout)
    }
}

/// Per-axis boolean flags in reply order.
pub type AxisFlags = Vec<(Axis, bool)>;
