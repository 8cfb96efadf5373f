//! PI C-887 Hexapod Controller Driver
//!
//! This crate drives a 6-axis PI hexapod stage for beamline fly-scanning:
//! coordinate-system management, wave-table trajectory generation,
//! hardware-triggered acquisition, and basic motion.
//!
//! # Overview
//!
//! The controller is reached over one of two transport backends, chosen
//! explicitly with [`TransportKind`]:
//!
//! - **Direct**: GCS over TCP on port 50000.
//! - **Relay**: the same ASCII conversation through an EPICS asyn gateway.
//!
//! On top of the channel, [`Hexapod`] exposes the subsystems:
//!
//! - [`Hexapod::coords`]: named coordinate frames in a tree rooted at ZERO
//! - [`Hexapod::waves`]: firmware wave tables (LIN ramps, snake rasters)
//! - [`Hexapod::triggers`]: trigger pulse tables and the trigger output
//! - [`Hexapod::records`]: recorded target/real position traces
//! - [`Hexapod::define_linear`] / [`Hexapod::define_snake`]: full scan
//!   sessions combining all of the above
//!
//! # Example
//!
//! ```no_run
//! use hexapod::{Axis, Hexapod, HexapodConfig, LinearRamp, ScanDirection, TransportKind};
//!
//! let transport = TransportKind::Direct {
//!     addr: "192.168.15.230:50000".to_string(),
//! };
//! let hex = Hexapod::connect(&transport, HexapodConfig::default())?;
//!
//! // 5 mm fly-scan over 5 s with a trigger pulse every 10 ms.
//! let ramp = LinearRamp {
//!     total_time: 5.0,
//!     travel: 5.0,
//!     start_position: -2.5,
//!     accel_samples: 10,
//!     direction: ScanDirection::Forward,
//! };
//! let mut scan = hex.define_linear(Axis::X, &ramp, 0.01)?;
//! scan.stage(&hex)?;
//! scan.run(&hex, true)?;
//!
//! let records = hex.records().read(0)?;
//! println!("recorded {} samples", records.len());
//! # Ok::<(), hexapod::GcsError>(())
//! ```
//!
//! # Timing model
//!
//! One wave-table sample is one millisecond of controller time
//! ([`wave::SAMPLE_DURATION`]). Wave-table lengths, trigger pulse periods,
//! and scan durations all share this clock, which keeps motion, pulses,
//! and acquisition mutually consistent.

pub mod axes;
pub mod config;
pub mod coords;
pub mod gcs;
pub mod records;
pub mod trajectory;
pub mod trigger;
pub mod wave;

mod hexapod;

pub use axes::{Axis, AxisValues, AXIS_COUNT};
pub use config::{HexapodArgs, HexapodConfig, RetryPolicy};
pub use coords::{CsInfo, ROOT_CS};
pub use gcs::{
    DeviceChannel, GcsError, GcsResult, MockChannel, RelayChannel, TcpChannel, TransportKind,
    DEFAULT_PORT,
};
pub use hexapod::Hexapod;
pub use records::RecordSet;
pub use trajectory::{Scan, ScanState};
pub use trigger::TriggerPlan;
pub use wave::{LinearRamp, ScanDirection, SnakeRaster, WaveTableHandle};
