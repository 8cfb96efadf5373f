//! Wave-table construction for fly-scan trajectories.
//!
//! The controller plays firmware-resident wave tables through its wave
//! generators, one sample per millisecond. Two profile shapes are used:
//! `LIN` constant-velocity ramps for single-line scans and `RAMP`
//! out-and-back segments for snake rasters.
//!
//! All profile geometry is computed here as plain math before any device
//! write; capacity is checked against the live `WMS?` limit first, so a
//! too-long trajectory never partially writes a table.

use std::time::Duration;

use tracing::{debug, info};

use crate::gcs::{reply, GcsError, GcsResult};
use crate::hexapod::Hexapod;
use crate::trigger::TriggerPlan;

/// Duration of one wave-table sample. The whole trajectory/trigger stack
/// shares this clock.
pub const SAMPLE_DURATION: Duration = Duration::from_millis(1);

/// Seconds per wave-table sample.
pub const SECONDS_PER_SAMPLE: f64 = 0.001;

/// Sweep sense of a scan line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Reverse,
}

impl ScanDirection {
    pub fn sign(self) -> f64 {
        match self {
            ScanDirection::Forward => 1.0,
            ScanDirection::Reverse => -1.0,
        }
    }
}

/// Append mode token in a `WAV` command: `X` opens a fresh table, `&`
/// appends a segment to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WavMode {
    Start,
    Append,
}

impl WavMode {
    fn token(self) -> &'static str {
        match self {
            WavMode::Start => "X",
            WavMode::Append => "&",
        }
    }

    fn for_segment(index: usize) -> Self {
        if index == 0 {
            WavMode::Start
        } else {
            WavMode::Append
        }
    }
}

/// A wave table written to the controller, with the bookkeeping the
/// orchestrator needs for staging and readback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveTableHandle {
    /// Wave table id on the controller.
    pub table: u8,
    /// Total sample count.
    pub points: u64,
    /// Physical start position, shifted so the nominal window is covered
    /// at cruise velocity.
    pub start_position: f64,
    /// Cruise speed in position units per second.
    pub speed: f64,
    /// Accel/decel blending window in samples.
    pub accel_samples: u64,
}

/// Constant-velocity line profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    /// Nominal scan time in seconds (cruise portion).
    pub total_time: f64,
    /// Nominal travel magnitude over `total_time`.
    pub travel: f64,
    /// Nominal start position.
    pub start_position: f64,
    /// Accel/decel blending window in samples, applied at each end.
    pub accel_samples: u64,
    /// Sweep sense.
    pub direction: ScanDirection,
}

/// Computed geometry of a linear ramp, before any device write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearProfile {
    /// Total sample count including both blending windows.
    pub points: u64,
    /// Signed expanded travel covering accel and decel distance.
    pub travel: f64,
    /// Start position shifted back along the sweep so the nominal window
    /// is covered at cruise velocity.
    pub start_position: f64,
    /// Signed cruise velocity in units per sample.
    pub velocity_per_sample: f64,
}

impl LinearRamp {
    /// Expand the nominal window into the physical profile.
    ///
    /// The stage must accelerate into the nominal start and decelerate past
    /// the nominal end: travel grows by twice the accel distance and the
    /// start shifts backward along the sweep by one accel distance.
    pub fn profile(&self) -> LinearProfile {
        let sign = self.direction.sign();
        let velocity_per_sample = sign * self.travel / self.total_time * SECONDS_PER_SAMPLE;
        let accel_distance = velocity_per_sample * self.accel_samples as f64;
        LinearProfile {
            points: (self.total_time / SECONDS_PER_SAMPLE).round() as u64
                + 2 * self.accel_samples,
            travel: sign * self.travel + 2.0 * accel_distance,
            start_position: self.start_position - accel_distance,
            velocity_per_sample,
        }
    }
}

/// Snake raster scan geometry.
///
/// X sweeps back and forth over `line_travel` while Y climbs a staircase
/// from `start_y` toward `end_y` in `step_y` increments, one step per
/// turnaround.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnakeRaster {
    /// Nominal time for one directional X sweep, in seconds.
    pub line_time: f64,
    /// X start position.
    pub start_x: f64,
    /// X travel magnitude per line.
    pub line_travel: f64,
    /// Y start position.
    pub start_y: f64,
    /// Y end position.
    pub end_y: f64,
    /// Y step magnitude per line.
    pub step_y: f64,
    /// Trigger pulse period in seconds.
    pub pulse_period: f64,
    /// Sense of the first X sweep.
    pub direction: ScanDirection,
    /// Turnaround blending window in samples, applied at each sweep end.
    pub turnaround_samples: u64,
}

/// One `WAV` segment, shape plus raw parameter list.
#[derive(Debug, Clone, PartialEq)]
struct WavSegment {
    shape: &'static str,
    params: Vec<f64>,
}

/// Computed snake-raster layout: every wave segment for both tables plus
/// the cumulative trigger plan, before any device write.
#[derive(Debug, Clone, PartialEq)]
pub struct SnakeLayout {
    /// Number of scan lines (even; the scan returns to start row parity).
    pub line_count: u64,
    /// Samples per directional sweep including both turnaround windows.
    pub sweep_samples: u64,
    /// Total samples in each table.
    pub total_points: u64,
    /// Shifted X start position.
    pub start_x: f64,
    /// Y start position.
    pub start_y: f64,
    /// Pulse sample indices across all lines, strictly increasing.
    pub plan: TriggerPlan,
    x_segments: Vec<WavSegment>,
    y_segments: Vec<WavSegment>,
}

impl SnakeRaster {
    /// Lay out the raster: X `RAMP` segments (one per line pair), the Y
    /// staircase, and the per-line trigger plan for both sweep directions.
    pub fn layout(&self) -> GcsResult<SnakeLayout> {
        if self.line_time <= 0.0 || self.step_y <= 0.0 {
            return Err(GcsError::InvalidOperation(
                "snake raster needs positive line time and Y step".to_string(),
            ));
        }
        let cruise = (self.line_time / SECONDS_PER_SAMPLE).round() as u64;
        let turnaround = self.turnaround_samples;
        let sweep = cruise + 2 * turnaround;

        // Even line count: the scan must return to start row parity.
        let span = (self.end_y - self.start_y).abs();
        let mut line_count = (span / self.step_y).ceil() as u64;
        if line_count % 2 == 1 {
            line_count += 1;
        }
        line_count = line_count.max(2);
        let pairs = line_count / 2;
        let total_points = line_count * sweep;

        let sign_x = self.direction.sign();
        let velocity = sign_x * self.line_travel / self.line_time * SECONDS_PER_SAMPLE;
        let accel_distance = velocity * turnaround as f64;
        let x_amplitude = sign_x * self.line_travel + 2.0 * accel_distance;
        let start_x = self.start_x - accel_distance;

        // One RAMP per line pair: out to the apex at the pair midpoint,
        // back to the offset by the end of the segment.
        let pair_samples = 2 * sweep;
        let x_segments = (0..pairs)
            .map(|_| WavSegment {
                shape: "RAMP",
                params: vec![
                    pair_samples as f64,
                    x_amplitude,
                    start_x,
                    pair_samples as f64,
                    0.0,
                    turnaround as f64,
                    sweep as f64,
                ],
            })
            .collect();

        // Y staircase: hold the row through the cruise and leading
        // turnaround, then step during the trailing turnaround. The final
        // line holds to the end so both tables stay the same length.
        let sign_y = if self.end_y >= self.start_y { 1.0 } else { -1.0 };
        let mut y_segments = Vec::new();
        for line in 0..line_count {
            let row = self.start_y + line as f64 * sign_y * self.step_y;
            if line + 1 == line_count {
                y_segments.push(lin_segment(sweep, 0.0, row));
            } else {
                y_segments.push(lin_segment(sweep - turnaround, 0.0, row));
                y_segments.push(lin_segment(turnaround, sign_y * self.step_y, row));
            }
        }

        // Pulses cover each cruise window in both sweep directions,
        // appended line by line into one strictly increasing plan.
        let period = (self.pulse_period / SECONDS_PER_SAMPLE).round() as u64;
        let mut plan = TriggerPlan::new();
        for line in 0..line_count {
            let sweep_start = line * sweep;
            plan.extend(sweep_start + turnaround, period, sweep_start + turnaround + cruise)?;
        }

        Ok(SnakeLayout {
            line_count,
            sweep_samples: sweep,
            total_points,
            start_x,
            start_y: self.start_y,
            plan,
            x_segments,
            y_segments,
        })
    }
}

fn lin_segment(samples: u64, amplitude: f64, offset: f64) -> WavSegment {
    WavSegment {
        shape: "LIN",
        params: vec![samples as f64, amplitude, offset, samples as f64, 0.0, 0.0],
    }
}

fn format_params(params: &[f64]) -> String {
    params
        .iter()
        .map(|value| {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{}", *value as i64)
            } else {
                format!("{value}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wave-table operations on a connected hexapod.
pub struct WaveTables<'a> {
    hex: &'a Hexapod,
}

impl<'a> WaveTables<'a> {
    pub(crate) fn new(hex: &'a Hexapod) -> Self {
        Self { hex }
    }

    /// Maximum wave-table capacity in samples, queried live (`WMS?`).
    pub fn max_points(&self) -> GcsResult<u64> {
        let reply = self.hex.query("WMS?")?;
        let max = reply::single_int(&reply)?;
        u64::try_from(max).map_err(|_| GcsError::Parse(format!("negative WMS? value {max}")))
    }

    /// Lengths of all defined wave tables (`WAV?` parameter 1).
    pub fn lengths(&self) -> GcsResult<Vec<(u8, u64)>> {
        let reply = self.hex.query("WAV?")?;
        Ok(reply::indexed_params(&reply)?
            .into_iter()
            .filter(|(_, param, _)| *param == 1)
            .map(|(table, _, value)| (table, value))
            .collect())
    }

    /// Length of one wave table, `None` if it is not defined.
    pub fn table_length(&self, table: u8) -> GcsResult<Option<u64>> {
        Ok(self
            .lengths()?
            .into_iter()
            .find(|(t, _)| *t == table)
            .map(|(_, points)| points))
    }

    /// Read back raw wave-table samples (`GWD?`).
    ///
    /// `start` is 1-based per GCS convention.
    pub fn read_data(&self, table: u8, start: u64, count: u64) -> GcsResult<Vec<f64>> {
        let reply = self.hex.query(&format!("GWD? {start} {count} {table}"))?;
        let (rows, _) = reply::data_rows(&reply)?;
        Ok(rows.into_iter().flatten().collect())
    }

    /// Build a constant-velocity line profile into a wave table.
    ///
    /// Checks firmware capacity before writing; a too-long profile fails
    /// with [`GcsError::TrajectoryTooLong`] and leaves the table untouched.
    pub fn build_linear(&self, table: u8, ramp: &LinearRamp) -> GcsResult<WaveTableHandle> {
        let profile = ramp.profile();
        let max = self.max_points()?;
        if profile.points > max {
            return Err(GcsError::TrajectoryTooLong {
                requested: profile.points,
                max,
            });
        }
        debug!(
            "linear wave table {table}: {} points from {} over {}",
            profile.points, profile.start_position, profile.travel
        );
        let params = [
            profile.points as f64,
            profile.travel,
            profile.start_position,
            profile.points as f64,
            0.0,
            ramp.accel_samples as f64,
        ];
        self.hex.command(&format!(
            "WAV {table} {} LIN {}",
            WavMode::Start.token(),
            format_params(&params)
        ))?;
        Ok(WaveTableHandle {
            table,
            points: profile.points,
            start_position: profile.start_position,
            speed: ramp.direction.sign() * ramp.travel / ramp.total_time,
            accel_samples: ramp.accel_samples,
        })
    }

    /// Build both snake-raster tables (X into `x_table`, Y into `y_table`).
    ///
    /// Returns the handles plus the cumulative trigger plan computed from
    /// the same sample clock. Capacity is checked before any write.
    pub fn build_snake(
        &self,
        x_table: u8,
        y_table: u8,
        raster: &SnakeRaster,
    ) -> GcsResult<(WaveTableHandle, WaveTableHandle, SnakeLayout)> {
        let layout = raster.layout()?;
        let max = self.max_points()?;
        if layout.total_points > max {
            return Err(GcsError::TrajectoryTooLong {
                requested: layout.total_points,
                max,
            });
        }
        info!(
            "snake raster: {} lines of {} samples, {} trigger pulses",
            layout.line_count,
            layout.sweep_samples,
            layout.plan.len()
        );
        self.write_segments(x_table, &layout.x_segments)?;
        self.write_segments(y_table, &layout.y_segments)?;

        let x_handle = WaveTableHandle {
            table: x_table,
            points: layout.total_points,
            start_position: layout.start_x,
            speed: raster.direction.sign() * raster.line_travel / raster.line_time,
            accel_samples: raster.turnaround_samples,
        };
        let y_handle = WaveTableHandle {
            table: y_table,
            points: layout.total_points,
            start_position: layout.start_y,
            speed: raster.step_y / (raster.line_time
                + 2.0 * raster.turnaround_samples as f64 * SECONDS_PER_SAMPLE),
            accel_samples: raster.turnaround_samples,
        };
        Ok((x_handle, y_handle, layout))
    }

    fn write_segments(&self, table: u8, segments: &[WavSegment]) -> GcsResult<()> {
        for (index, segment) in segments.iter().enumerate() {
            self.hex.command(&format!(
                "WAV {table} {} {} {}",
                WavMode::for_segment(index).token(),
                segment.shape,
                format_params(&segment.params)
            ))?;
        }
        Ok(())
    }

    /// Bind a wave table to a wave generator channel (`WSL`).
    pub fn assign(&self, generator: u8, table: u8) -> GcsResult<()> {
        self.hex.command(&format!("WSL {generator} {table}"))
    }

    /// Set how many times a generator plays its table (`WGC`).
    pub fn set_cycles(&self, generator: u8, cycles: u32) -> GcsResult<()> {
        self.hex.command(&format!("WGC {generator} {cycles}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HexapodConfig;
    use crate::gcs::MockChannel;
    use approx::assert_relative_eq;

    fn hexapod(mock: &MockChannel) -> Hexapod {
        Hexapod::with_channel(Box::new(mock.clone()), HexapodConfig::default())
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

    #[test]
    fn test_linear_profile_reference_numbers() {
        // 5 s / 5 mm from -2.5 mm with a 10-sample blend: 5020 points,
        // start shifted to -2.51 by the 0.001 mm/sample cruise velocity.
        let profile = reference_ramp().profile();
        assert_eq!(profile.points, 5020);
        assert_relative_eq!(profile.velocity_per_sample, 0.001);
        assert_relative_eq!(profile.start_position, -2.51);
        assert_relative_eq!(profile.travel, 5.02);
    }

    #[test]
    fn test_linear_profile_reverse_direction() {
        let ramp = LinearRamp {
            direction: ScanDirection::Reverse,
            ..reference_ramp()
        };
        let profile = ramp.profile();
        assert_eq!(profile.points, 5020);
        assert_relative_eq!(profile.start_position, -2.49);
        assert_relative_eq!(profile.travel, -5.02);
    }

    #[test]
    fn test_build_linear_emits_wav_with_total_points() {
        let mock = MockChannel::new();
        mock.stub("WMS?", "1=262144\n");
        let hex = hexapod(&mock);
        let handle = hex.waves().build_linear(1, &reference_ramp()).unwrap();
        assert_eq!(handle.points, 5020);
        assert_relative_eq!(handle.start_position, -2.51);

        let wav = mock
            .log()
            .into_iter()
            .find(|c| c.starts_with("WAV"))
            .unwrap();
        let tokens: Vec<&str> = wav.split_whitespace().collect();
        assert_eq!(&tokens[..4], &["WAV", "1", "X", "LIN"]);
        assert_eq!(tokens[4], "5020");
        assert_relative_eq!(tokens[5].parse::<f64>().unwrap(), 5.02);
        assert_relative_eq!(tokens[6].parse::<f64>().unwrap(), -2.51);
        assert_eq!(tokens[7], "5020");
        assert_eq!(tokens[8], "0");
        assert_eq!(tokens[9], "10");
    }

    #[test]
    fn test_build_linear_capacity_check_precedes_write() {
        let mock = MockChannel::new();
        mock.stub("WMS?", "1=1000\n");
        let hex = hexapod(&mock);
        match hex.waves().build_linear(1, &reference_ramp()) {
            Err(GcsError::TrajectoryTooLong {
                requested: 5020,
                max: 1000,
            }) => {}
            other => panic!("expected TrajectoryTooLong, got {other:?}"),
        }
        assert_eq!(mock.count("WAV "), 0);
    }

    fn reference_raster() -> SnakeRaster {
        SnakeRaster {
            line_time: 0.5,
            start_x: -1.0,
            line_travel: 2.0,
            start_y: 0.0,
            end_y: 0.03,
            step_y: 0.01,
            pulse_period: 0.05,
            direction: ScanDirection::Forward,
            turnaround_samples: 50,
        }
    }

    #[test]
    fn test_snake_layout_geometry() {
        let layout = reference_raster().layout().unwrap();
        // ceil(0.03/0.01) = 3 lines, rounded up to 4 for parity.
        assert_eq!(layout.line_count, 4);
        assert_eq!(layout.sweep_samples, 600);
        assert_eq!(layout.total_points, 2400);
        // v = 2/0.5*0.001 = 0.004/sample; shift = 0.2.
        assert_relative_eq!(layout.start_x, -1.2);
        // X: one RAMP per pair; Y: 2 segments per line except the last.
        assert_eq!(layout.x_segments.len(), 2);
        assert_eq!(layout.y_segments.len(), 7);

        // Both tables cover the same number of samples.
        let y_total: f64 = layout.y_segments.iter().map(|s| s.params[0]).sum();
        assert_eq!(y_total as u64, layout.total_points);
        let x_total: f64 = layout.x_segments.iter().map(|s| s.params[0]).sum();
        assert_eq!(x_total as u64, layout.total_points);
    }

    #[test]
    fn test_snake_plan_strictly_increasing_across_lines() {
        let layout = reference_raster().layout().unwrap();
        let indices = layout.plan.indices();
        assert!(!indices.is_empty());
        assert_eq!(indices[0], 50);
        for pair in indices.windows(2) {
            assert!(pair[0] < pair[1], "plan not strictly increasing: {pair:?}");
        }
        // Last pulse of each line stays within that line's cruise window.
        for (i, &index) in indices.iter().enumerate() {
            let line = index / 600;
            let within = index - line * 600;
            assert!((50..=550).contains(&within), "pulse {i} at {index} outside cruise");
        }
    }

    #[test]
    fn test_snake_descending_y() {
        let raster = SnakeRaster {
            start_y: 0.05,
            end_y: 0.0,
            ..reference_raster()
        };
        let layout = raster.layout().unwrap();
        assert_eq!(layout.line_count, 6);
        // Second Y segment steps downward.
        let step = &layout.y_segments[1];
        assert_relative_eq!(step.params[1], -0.01);
    }

    #[test]
    fn test_build_snake_capacity_check_precedes_write() {
        let mock = MockChannel::new();
        mock.stub("WMS?", "1=100\n");
        let hex = hexapod(&mock);
        match hex.waves().build_snake(1, 2, &reference_raster()) {
            Err(GcsError::TrajectoryTooLong { requested: 2400, .. }) => {}
            other => panic!("expected TrajectoryTooLong, got {other:?}"),
        }
        assert_eq!(mock.count("WAV "), 0);
    }

    #[test]
    fn test_build_snake_segment_modes() {
        let mock = MockChannel::new();
        mock.stub("WMS?", "1=262144\n");
        let hex = hexapod(&mock);
        hex.waves().build_snake(1, 2, &reference_raster()).unwrap();
        let log = mock.log();
        let x_segs: Vec<&String> = log.iter().filter(|c| c.starts_with("WAV 1")).collect();
        let y_segs: Vec<&String> = log.iter().filter(|c| c.starts_with("WAV 2")).collect();
        assert_eq!(x_segs.len(), 2);
        assert_eq!(y_segs.len(), 7);
        // First segment opens the table, the rest append.
        assert!(x_segs[0].starts_with("WAV 1 X RAMP"));
        assert!(x_segs[1].starts_with("WAV 1 & RAMP"));
        assert!(y_segs[0].starts_with("WAV 2 X LIN"));
        assert!(y_segs.iter().skip(1).all(|c| c.starts_with("WAV 2 & LIN")));
    }

    #[test]
    fn test_table_length_lookup() {
        let mock = MockChannel::new();
        mock.stub("WAV?", "1 1=5020\n2 1=2400\n");
        let hex = hexapod(&mock);
        assert_eq!(hex.waves().table_length(1).unwrap(), Some(5020));
        assert_eq!(hex.waves().table_length(3).unwrap(), None);
    }
}
