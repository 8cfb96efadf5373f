//! Scan orchestration: composing wave tables and trigger plans into a
//! runnable trajectory.
//!
//! A [`Scan`] is an explicit session record with its own state machine;
//! nothing about a running trajectory lives as ambient driver state. The
//! generators to stop, the staging positions, and the scan duration all
//! travel with the session.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::axes::{Axis, AxisValues};
use crate::gcs::{GcsError, GcsResult};
use crate::hexapod::Hexapod;
use crate::trigger::TriggerPlan;
use crate::wave::{LinearRamp, SnakeRaster, SAMPLE_DURATION};

/// Wave table holding the (primary) line profile.
const LINE_WAVE_TABLE: u8 = 1;

/// Wave table holding the snake-raster Y staircase.
const STEP_WAVE_TABLE: u8 = 2;

/// Lifecycle of a defined trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Wave tables written, triggers armed, generators bound.
    Planned,
    /// Axes are at the trajectory start position.
    Staged,
    /// Generator output enabled.
    Running,
    /// Ran to its full duration.
    Complete,
    /// Generator output disabled before completion.
    Stopped,
}

/// A defined trajectory: one session from `Planned` through `run`/`stop`.
#[derive(Debug, Clone)]
pub struct Scan {
    state: ScanState,
    /// Generators bound for this scan, in start order.
    generators: Vec<u8>,
    /// Per-axis physical start positions for staging.
    start_positions: AxisValues,
    /// Total wave-table samples.
    total_points: u64,
    /// Number of trigger pulses that will fire.
    pulse_count: usize,
    /// Wall-clock duration of one playback.
    duration: Duration,
}

impl Scan {
    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn start_positions(&self) -> &AxisValues {
        &self.start_positions
    }

    pub fn total_points(&self) -> u64 {
        self.total_points
    }

    pub fn pulse_count(&self) -> usize {
        self.pulse_count
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Move every participating axis to its trajectory start position.
    ///
    /// Idempotent: an axis already within the staging tolerance is not
    /// commanded at all, so a second `stage()` in a row issues zero motion
    /// commands. Each commanded axis is polled on-target under the bounded
    /// staging policy.
    pub fn stage(&mut self, hex: &Hexapod) -> GcsResult<()> {
        match self.state {
            ScanState::Planned | ScanState::Staged => {}
            state => {
                return Err(GcsError::InvalidOperation(format!(
                    "cannot stage a scan in state {state:?}"
                )))
            }
        }
        let tolerance = hex.config().stage_tolerance;
        let current = hex.position()?;
        for (axis, target) in self.start_positions.iter() {
            let at_start = current
                .get(axis)
                .is_some_and(|pos| (pos - target).abs() <= tolerance);
            if at_start {
                debug!("axis {axis} already at scan start {target}");
                continue;
            }
            info!("staging axis {axis} to {target}");
            hex.move_to(&AxisValues::new().with(axis, target))?;
            hex.wait_on_target(&[axis])?;
        }
        self.state = ScanState::Staged;
        Ok(())
    }

    /// Start the wave generators; optionally block until the scan is over.
    ///
    /// Stages first if still `Planned`. With `wait`, positions are polled
    /// at the configured interval until the precomputed duration elapses,
    /// then the scan is `Complete`.
    pub fn run(&mut self, hex: &Hexapod, wait: bool) -> GcsResult<()> {
        if self.state == ScanState::Planned {
            self.stage(hex)?;
        }
        if self.state != ScanState::Staged {
            return Err(GcsError::InvalidOperation(format!(
                "cannot run a scan in state {:?}",
                self.state
            )));
        }
        let args: Vec<String> = self.generators.iter().map(|g| format!("{g} 1")).collect();
        hex.command(&format!("WGO {}", args.join(" ")))?;
        self.state = ScanState::Running;
        info!(
            "scan running: {} samples, {} pulses, {:?}",
            self.total_points, self.pulse_count, self.duration
        );
        if !wait {
            return Ok(());
        }
        let started = Instant::now();
        while started.elapsed() < self.duration {
            match hex.position() {
                Ok(pos) => debug!("scan progress: {pos:?}"),
                Err(e) => warn!("position poll failed mid-scan: {e}"),
            }
            std::thread::sleep(hex.config().run_poll_interval);
        }
        self.state = ScanState::Complete;
        Ok(())
    }

    /// Disable the generator output for the generators this scan started.
    ///
    /// A no-op when the scan never ran.
    pub fn stop(&mut self, hex: &Hexapod) -> GcsResult<()> {
        match self.state {
            ScanState::Running | ScanState::Complete => {
                let args: Vec<String> =
                    self.generators.iter().map(|g| format!("{g} 0")).collect();
                hex.command(&format!("WGO {}", args.join(" ")))?;
                self.state = ScanState::Stopped;
                Ok(())
            }
            _ => {
                debug!("stop on a scan that never ran; nothing to do");
                Ok(())
            }
        }
    }
}

impl Hexapod {
    /// Define a linear fly-scan trajectory on one axis.
    ///
    /// Clears stale trigger state, builds the wave table, writes the pulse
    /// plan, binds the generator, and arms the trigger output. The returned
    /// [`Scan`] is `Planned`.
    pub fn define_linear(
        &self,
        axis: Axis,
        ramp: &LinearRamp,
        pulse_period: f64,
    ) -> GcsResult<Scan> {
        self.triggers().clear()?;
        let handle = self.waves().build_linear(LINE_WAVE_TABLE, ramp)?;

        let period = (pulse_period / crate::wave::SECONDS_PER_SAMPLE).round() as u64;
        let plan = TriggerPlan::plan(
            handle.accel_samples,
            period,
            handle.points - handle.accel_samples,
        )?;
        let config = self.config();
        self.triggers()
            .write_plan(&plan, config.trigger_output, config.pulse_width)?;

        let generator = axis.generator();
        self.waves().assign(generator, LINE_WAVE_TABLE)?;
        self.waves().set_cycles(generator, 1)?;
        self.triggers().arm_generator_pulse(config.trigger_output)?;

        info!(
            "linear scan on {axis}: {} samples, {} pulses every {} samples",
            handle.points,
            plan.len(),
            period
        );
        Ok(Scan {
            state: ScanState::Planned,
            generators: vec![generator],
            start_positions: AxisValues::new().with(axis, handle.start_position),
            total_points: handle.points,
            pulse_count: plan.len(),
            duration: SAMPLE_DURATION * handle.points as u32,
        })
    }

    /// Define a snake-raster trajectory: X sweeps with a Y staircase.
    ///
    /// Both wave tables, the cumulative trigger plan, generator bindings,
    /// and the trigger output are set up; the returned [`Scan`] is
    /// `Planned`.
    pub fn define_snake(&self, raster: &SnakeRaster) -> GcsResult<Scan> {
        self.triggers().clear()?;
        let (x_handle, y_handle, layout) =
            self.waves()
                .build_snake(LINE_WAVE_TABLE, STEP_WAVE_TABLE, raster)?;

        let config = self.config();
        self.triggers()
            .write_plan(&layout.plan, config.trigger_output, config.pulse_width)?;

        let x_generator = Axis::X.generator();
        let y_generator = Axis::Y.generator();
        self.waves().assign(x_generator, x_handle.table)?;
        self.waves().assign(y_generator, y_handle.table)?;
        self.waves().set_cycles(x_generator, 1)?;
        self.waves().set_cycles(y_generator, 1)?;
        self.triggers().arm_generator_pulse(config.trigger_output)?;

        Ok(Scan {
            state: ScanState::Planned,
            generators: vec![x_generator, y_generator],
            start_positions: AxisValues::new()
                .with(Axis::X, x_handle.start_position)
                .with(Axis::Y, y_handle.start_position),
            total_points: layout.total_points,
            pulse_count: layout.plan.len(),
            duration: SAMPLE_DURATION * layout.total_points as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HexapodConfig, RetryPolicy};
    use crate::gcs::MockChannel;
    use crate::wave::ScanDirection;

    fn hexapod(mock: &MockChannel) -> Hexapod {
        let config = HexapodConfig {
            stage_retry: RetryPolicy::new(3, Duration::from_millis(1)),
            status_retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..HexapodConfig::default()
        };
        Hexapod::with_channel(Box::new(mock.clone()), config)
    }

    fn reference_ramp() -> LinearRamp {
        LinearRamp {
            total_time: 5.0,
            travel: 5.0,
            start_position: -2.5,
            accel_samples: 10,
            direction: ScanDirection::Forward,
        }
    }

    fn stub_defaults(mock: &MockChannel) {
        mock.stub("WMS?", "1=262144\n");
        mock.stub("ONT?", "X=1\nY=1\nZ=1\nU=1\nV=1\nW=1\n");
    }

    #[test]
    fn test_define_linear_clears_triggers_first() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        let hex = hexapod(&mock);
        let scan = hex.define_linear(Axis::X, &reference_ramp(), 0.01).unwrap();
        assert_eq!(scan.state(), ScanState::Planned);
        assert_eq!(scan.total_points(), 5020);
        // 10, 20, ..., 5010 inclusive.
        assert_eq!(scan.pulse_count(), 501);
        assert_eq!(scan.duration(), Duration::from_millis(5020));

        let log = mock.log();
        let twc = log.iter().position(|c| c == "TWC").unwrap();
        let wav = log.iter().position(|c| c.starts_with("WAV 1")).unwrap();
        let tws = log.iter().position(|c| c.starts_with("TWS")).unwrap();
        assert!(twc < wav && wav < tws);
        assert!(log.contains(&"WSL 1 1".to_string()));
        assert!(log.contains(&"WGC 1 1".to_string()));
        assert!(log.contains(&"CTO 1 3 9".to_string()));
        assert_eq!(mock.count("TWS"), 11);
    }

    #[test]
    fn test_stage_skips_move_when_at_start() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        mock.stub("POS?", "X=-2.51\nY=0\nZ=0\nU=0\nV=0\nW=0\n");
        let hex = hexapod(&mock);
        let mut scan = hex.define_linear(Axis::X, &reference_ramp(), 0.01).unwrap();
        scan.stage(&hex).unwrap();
        assert_eq!(scan.state(), ScanState::Staged);
        assert_eq!(mock.count("MOV"), 0);

        // Second stage is also free of motion commands.
        scan.stage(&hex).unwrap();
        assert_eq!(mock.count("MOV"), 0);
    }

    #[test]
    fn test_stage_moves_and_waits_when_off_start() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        mock.stub("POS?", "X=0\nY=0\nZ=0\nU=0\nV=0\nW=0\n");
        let hex = hexapod(&mock);
        let mut scan = hex.define_linear(Axis::X, &reference_ramp(), 0.01).unwrap();
        scan.stage(&hex).unwrap();
        assert_eq!(mock.count("MOV X "), 1);
        assert!(mock.count("ONT?") >= 1);
    }

    #[test]
    fn test_run_without_wait_and_stop() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        mock.stub("POS?", "X=-2.51\nY=0\nZ=0\nU=0\nV=0\nW=0\n");
        let hex = hexapod(&mock);
        let mut scan = hex.define_linear(Axis::X, &reference_ramp(), 0.01).unwrap();
        scan.run(&hex, false).unwrap();
        assert_eq!(scan.state(), ScanState::Running);
        assert!(mock.log().contains(&"WGO 1 1".to_string()));

        scan.stop(&hex).unwrap();
        assert_eq!(scan.state(), ScanState::Stopped);
        assert!(mock.log().contains(&"WGO 1 0".to_string()));
    }

    #[test]
    fn test_stop_before_run_is_noop() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        let hex = hexapod(&mock);
        let mut scan = hex.define_linear(Axis::X, &reference_ramp(), 0.01).unwrap();
        scan.stop(&hex).unwrap();
        assert_eq!(scan.state(), ScanState::Planned);
        assert_eq!(mock.count("WGO"), 0);
    }

    #[test]
    fn test_define_snake_binds_both_generators() {
        let mock = MockChannel::new();
        stub_defaults(&mock);
        let hex = hexapod(&mock);
        let raster = SnakeRaster {
            line_time: 0.5,
            start_x: -1.0,
            line_travel: 2.0,
            start_y: 0.0,
            end_y: 0.03,
            step_y: 0.01,
            pulse_period: 0.05,
            direction: ScanDirection::Forward,
            turnaround_samples: 50,
        };
        let scan = hex.define_snake(&raster).unwrap();
        assert_eq!(scan.total_points(), 2400);
        assert_eq!(scan.start_positions().get(Axis::Y), Some(0.0));

        let log = mock.log();
        assert!(log.contains(&"WSL 1 1".to_string()));
        assert!(log.contains(&"WSL 2 2".to_string()));
        assert!(log.contains(&"WGC 1 1".to_string()));
        assert!(log.contains(&"WGC 2 1".to_string()));
    }

    #[test]
    fn test_too_long_trajectory_leaves_no_tables() {
        let mock = MockChannel::new();
        mock.stub("WMS?", "1=100\n");
        let hex = hexapod(&mock);
        match hex.define_linear(Axis::X, &reference_ramp(), 0.01) {
            Err(GcsError::TrajectoryTooLong { .. }) => {}
            other => panic!("expected TrajectoryTooLong, got {other:?}"),
        }
        assert_eq!(mock.count("WAV "), 0);
        assert_eq!(mock.count("TWS"), 0);
    }
}
