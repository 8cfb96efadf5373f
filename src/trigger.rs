//! Trigger pulse planning and trigger-output control.
//!
//! A trigger plan is an ordered list of wave-table sample indices at which
//! the digital output fires, computed on the same 1 ms sample clock as the
//! wave tables so motion and acquisition stay aligned.

use tracing::debug;

use crate::gcs::{reply, GcsError, GcsResult};
use crate::hexapod::Hexapod;

/// Trigger-table switch codes: output high at the rising index, low again
/// at the falling index.
const SWITCH_RISE: u8 = 2;
const SWITCH_FALL: u8 = 3;

/// `CTO` mode parameter selecting the trigger mode setting.
const CTO_TRIGGER_MODE: u8 = 3;

/// Trigger mode value: pulses come from the wave generator trigger table.
const CTO_GENERATOR_PULSE: u8 = 9;

/// The controller rejects over-long commands; cap pulse definitions per
/// `TWS` write (empirical limit).
pub const MAX_PULSES_PER_COMMAND: usize = 50;

/// An ordered, strictly increasing sequence of pulse sample indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerPlan {
    indices: Vec<u64>,
}

impl TriggerPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan pulses from `start`, stepping by `period`, keeping every index
    /// up to and including `end`.
    ///
    /// Deterministic: identical inputs always produce the identical
    /// sequence, whose first element is `start`.
    pub fn plan(start: u64, period: u64, end: u64) -> GcsResult<Self> {
        let mut plan = Self::new();
        plan.extend(start, period, end)?;
        Ok(plan)
    }

    /// Append another planned segment, preserving strict monotonic
    /// increase across the boundary.
    ///
    /// Chaining segments this way builds the cumulative plan of a snake
    /// scan: no pulse is emitted twice and none out of order.
    pub fn extend(&mut self, start: u64, period: u64, end: u64) -> GcsResult<()> {
        if period == 0 {
            return Err(GcsError::InvalidOperation(
                "trigger period must be at least one sample".to_string(),
            ));
        }
        if start > end {
            return Err(GcsError::InvalidOperation(format!(
                "trigger start {start} is past end {end}"
            )));
        }
        if let Some(&last) = self.indices.last() {
            if start <= last {
                return Err(GcsError::InvalidOperation(format!(
                    "trigger segment at {start} does not advance past {last}"
                )));
            }
        }
        let mut index = start;
        while index <= end {
            self.indices.push(index);
            index += period;
        }
        Ok(())
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Render the plan as batched `TWS` commands for the given digital
    /// output, each pulse a rising/falling edge pair `width` samples apart.
    pub fn tws_commands(&self, output: u8, width: u64) -> Vec<String> {
        self.indices
            .chunks(MAX_PULSES_PER_COMMAND)
            .map(|chunk| {
                let mut cmd = String::from("TWS");
                for &index in chunk {
                    cmd.push_str(&format!(
                        " {output} {index} {SWITCH_RISE} {output} {} {SWITCH_FALL}",
                        index + width
                    ));
                }
                cmd
            })
            .collect()
    }
}

/// Trigger-table operations on a connected hexapod.
pub struct Triggers<'a> {
    hex: &'a Hexapod,
}

impl<'a> Triggers<'a> {
    pub(crate) fn new(hex: &'a Hexapod) -> Self {
        Self { hex }
    }

    /// Clear the trigger table (`TWC`). Every new trajectory definition
    /// starts here so stale pulses never leak into a new scan.
    pub fn clear(&self) -> GcsResult<()> {
        self.hex.command("TWC")
    }

    /// Write a plan into the trigger table in bounded-size batches.
    pub fn write_plan(&self, plan: &TriggerPlan, output: u8, width: u64) -> GcsResult<()> {
        let commands = plan.tws_commands(output, width);
        debug!(
            "writing {} trigger pulses in {} TWS batches",
            plan.len(),
            commands.len()
        );
        for cmd in commands {
            self.hex.command(&cmd)?;
        }
        Ok(())
    }

    /// Number of trigger-table entries the controller reports (`TWG?`).
    pub fn count(&self) -> GcsResult<u64> {
        let reply = self.hex.query("TWG?")?;
        let count = reply::single_int(&reply)?;
        u64::try_from(count).map_err(|_| GcsError::Parse(format!("negative TWG? value {count}")))
    }

    /// Arm the digital output to fire from the generator trigger table
    /// (`CTO <output> 3 9`).
    pub fn arm_generator_pulse(&self, output: u8) -> GcsResult<()> {
        self.hex
            .command(&format!("CTO {output} {CTO_TRIGGER_MODE} {CTO_GENERATOR_PULSE}"))
    }

    /// Raw trigger output configuration readback (`CTO?`).
    pub fn output_config(&self) -> GcsResult<String> {
        self.hex.query("CTO?")
    }
}
