//! Driver configuration.

use std::time::Duration;

use clap::Args;

use crate::gcs::TransportKind;
use crate::hexapod::Hexapod;

/// Bounded retry policy for status polls.
///
/// Transient status-query failures and not-yet-on-target polls both consume
/// attempts; exhausting them yields [`crate::GcsError::Timeout`] rather than
/// looping forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Immutable driver configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct HexapodConfig {
    /// Position tolerance below which staging skips the move entirely.
    pub stage_tolerance: f64,
    /// On-target polling while staging a scan start position.
    pub stage_retry: RetryPolicy,
    /// Retry policy for transient status queries (`ONT?`, `VLS?`).
    pub status_retry: RetryPolicy,
    /// Position poll interval while waiting out a running scan.
    pub run_poll_interval: Duration,
    /// Digital output channel carrying the trigger pulse train.
    pub trigger_output: u8,
    /// Trigger pulse width in wave-table samples.
    pub pulse_width: u64,
}

impl Default for HexapodConfig {
    fn default() -> Self {
        Self {
            stage_tolerance: 1e-4,
            stage_retry: RetryPolicy::new(200, Duration::from_millis(50)),
            status_retry: RetryPolicy::new(5, Duration::from_millis(100)),
            run_poll_interval: Duration::from_millis(50),
            trigger_output: 1,
            pulse_width: 1,
        }
    }
}

/// Command-line arguments for a hexapod connection.
///
/// Use with `#[command(flatten)]` in a CLI args struct. Exactly one of the
/// two backends must be selected; the address shape is never sniffed.
#[derive(Args, Debug, Clone)]
pub struct HexapodArgs {
    /// C-887 controller address (host:port) for the direct TCP backend.
    #[arg(long, conflicts_with = "relay")]
    pub ip: Option<String>,

    /// EPICS asyn gateway address (host:port) for the relay backend.
    #[arg(long)]
    pub relay: Option<String>,

    /// Digital output channel carrying the trigger pulse train.
    #[arg(long, default_value = "1")]
    pub trigger_output: u8,
}

impl HexapodArgs {
    /// The transport selected on the command line.
    pub fn transport(&self) -> Result<TransportKind, String> {
        match (&self.ip, &self.relay) {
            (Some(addr), None) => Ok(TransportKind::Direct { addr: addr.clone() }),
            (None, Some(addr)) => Ok(TransportKind::Relay { addr: addr.clone() }),
            (None, None) => Err("one of --ip or --relay is required".to_string()),
            (Some(_), Some(_)) => Err("--ip and --relay are mutually exclusive".to_string()),
        }
    }

    /// Connect using the selected backend.
    pub fn connect(&self) -> Result<Hexapod, String> {
        let transport = self.transport()?;
        let config = HexapodConfig {
            trigger_output: self.trigger_output,
            ..HexapodConfig::default()
        };
        Hexapod::connect(&transport, config)
            .map_err(|e| format!("Failed to connect to hexapod: {e}"))
    }
}
