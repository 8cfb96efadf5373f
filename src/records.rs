//! Data-recorder configuration and readback.
//!
//! The controller records motion into numbered data tables. Twelve fixed
//! channels are used: target/real position pairs for X, Y, Z, U, V, W in
//! that order, read back in one bulk `DRR?` transfer whose `#`-prefixed
//! header lines carry the sample time.

use std::time::Duration;

use ndarray::{Array2, ArrayView1};
use tracing::debug;

use crate::axes::Axis;
use crate::gcs::{reply, GcsError, GcsResult};
use crate::hexapod::Hexapod;
use crate::wave::SAMPLE_DURATION;

/// Number of record tables used: one target/real pair per axis.
pub const RECORD_TABLES: usize = 12;

/// `DRC` source code for the commanded (target) position.
const SOURCE_TARGET: u8 = 1;

/// `DRC` source code for the real (sensor) position.
const SOURCE_REAL: u8 = 2;

/// Recorded target/real traces for all axes.
#[derive(Debug, Clone)]
pub struct RecordSet {
    /// Time between consecutive samples.
    pub sample_time: Duration,
    /// Shape `(samples, 12)`: columns alternate target/real per axis.
    data: Array2<f64>,
}

impl RecordSet {
    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Target-position trace for one axis.
    pub fn target(&self, axis: Axis) -> ArrayView1<'_, f64> {
        self.data.column(2 * axis.index())
    }

    /// Real-position trace for one axis.
    pub fn real(&self, axis: Axis) -> ArrayView1<'_, f64> {
        self.data.column(2 * axis.index() + 1)
    }
}

/// Data-recorder operations on a connected hexapod.
pub struct Records<'a> {
    hex: &'a Hexapod,
}

impl<'a> Records<'a> {
    pub(crate) fn new(hex: &'a Hexapod) -> Self {
        Self { hex }
    }

    /// Point the 12 record tables at the target/real pairs of all axes.
    pub fn configure(&self) -> GcsResult<()> {
        for (index, axis) in Axis::all().iter().enumerate() {
            let target_table = 2 * index + 1;
            let real_table = 2 * index + 2;
            self.hex
                .command(&format!("DRC {target_table} {axis} {SOURCE_TARGET}"))?;
            self.hex
                .command(&format!("DRC {real_table} {axis} {SOURCE_REAL}"))?;
        }
        Ok(())
    }

    /// Read back recorded traces.
    ///
    /// With `sample_count` 0 the count is inferred from wave table 1's
    /// length, which a completed scan will have filled.
    pub fn read(&self, sample_count: u64) -> GcsResult<RecordSet> {
        let count = if sample_count == 0 {
            self.hex
                .waves()
                .table_length(1)?
                .ok_or_else(|| {
                    GcsError::InvalidOperation(
                        "no sample count given and wave table 1 is empty".to_string(),
                    )
                })?
        } else {
            sample_count
        };

        let tables: Vec<String> = (1..=RECORD_TABLES).map(|t| t.to_string()).collect();
        let cmd = format!("DRR? 1 {count} {}", tables.join(" "));
        let reply_text = self.hex.query(&cmd)?;
        let (rows, headers) = reply::data_rows(&reply_text)?;

        let sample_time = match reply::header_value(&headers, "SAMPLE_TIME") {
            Some(text) => {
                let seconds: f64 = text.parse().map_err(|_| {
                    GcsError::Parse(format!("bad SAMPLE_TIME header {text:?}"))
                })?;
                Duration::from_secs_f64(seconds)
            }
            None => SAMPLE_DURATION,
        };

        let mut data = Array2::zeros((rows.len(), RECORD_TABLES));
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != RECORD_TABLES {
                return Err(GcsError::Parse(format!(
                    "record row {row_index} has {} columns, expected {RECORD_TABLES}",
                    row.len()
                )));
            }
            for (col_index, &value) in row.iter().enumerate() {
                data[[row_index, col_index]] = value;
            }
        }
        debug!(
            "read {} record samples at {:?} per sample",
            data.nrows(),
            sample_time
        );
        Ok(RecordSet { sample_time, data })
    }
}
