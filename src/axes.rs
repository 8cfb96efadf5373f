//! Hexapod axes and per-axis value maps.

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// One of the six hexapod axes.
///
/// The set is fixed and ordered; wire names match the variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum Axis {
    X,
    Y,
    Z,
    U,
    V,
    W,
}

/// Number of hexapod axes.
pub const AXIS_COUNT: usize = 6;

impl Axis {
    /// All axes in wire order.
    pub fn all() -> [Axis; AXIS_COUNT] {
        [Axis::X, Axis::Y, Axis::Z, Axis::U, Axis::V, Axis::W]
    }

    /// Zero-based position in the fixed axis order.
    pub fn index(self) -> usize {
        Axis::all()
            .iter()
            .position(|&axis| axis == self)
            .unwrap_or(0)
    }

    /// The wave generator channel nominally assigned to this axis (1-based).
    pub fn generator(self) -> u8 {
        self.index() as u8 + 1
    }
}

/// Fixed-key map from the six axes to optional values.
///
/// Replaces open-ended keyword dispatch: only known axes can be addressed,
/// and absent axes are explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisValues {
    values: [Option<f64>; AXIS_COUNT],
}

impl AxisValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        self.values[axis.index()] = Some(value);
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.values[axis.index()]
    }

    /// Iterate over the axes that have a value, in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        Axis::iter().filter_map(|axis| self.get(axis).map(|value| (axis, value)))
    }

    pub fn len(&self) -> usize {
        self.values.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Overlay `other` on top of `self`: axes set in `other` win, the rest
    /// keep their current value.
    pub fn merged(&self, other: &AxisValues) -> AxisValues {
        let mut out = *self;
        for (axis, value) in other.iter() {
            out.set(axis, value);
        }
        out
    }

    /// All six axes, with unset ones filled with 0.
    pub fn or_zero(&self) -> AxisValues {
        let mut out = *self;
        for axis in Axis::iter() {
            if out.get(axis).is_none() {
                out.set(axis, 0.0);
            }
        }
        out
    }

    /// GCS axis argument string like `X 1.5 Y -2`, or `None` when empty.
    pub fn to_axis_args(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let args: Vec<String> = self
            .iter()
            .map(|(axis, value)| format!("{axis} {value}"))
            .collect();
        Some(args.join(" "))
    }
}

impl FromIterator<(Axis, f64)> for AxisValues {
    fn from_iter<I: IntoIterator<Item = (Axis, f64)>>(iter: I) -> Self {
        let mut out = AxisValues::new();
        for (axis, value) in iter {
            out.set(axis, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_axis_wire_names() {
        assert_eq!(Axis::X.to_string(), "X");
        assert_eq!(Axis::from_str("W").unwrap(), Axis::W);
        assert!(Axis::from_str("Q").is_err());
    }

    #[test]
    fn test_axis_generator() {
        assert_eq!(Axis::X.generator(), 1);
        assert_eq!(Axis::Y.generator(), 2);
        assert_eq!(Axis::W.generator(), 6);
    }

    #[test]
    fn test_axis_args_in_wire_order() {
        let values = AxisValues::new().with(Axis::W, 0.5).with(Axis::X, 1.5);
        assert_eq!(values.to_axis_args().as_deref(), Some("X 1.5 W 0.5"));
        assert_eq!(AxisValues::new().to_axis_args(), None);
    }

    #[test]
    fn test_merged_keeps_unnamed_axes() {
        let stored = AxisValues::new().with(Axis::X, 1.0).with(Axis::Y, 2.0);
        let update = AxisValues::new().with(Axis::Y, 9.0);
        let merged = stored.merged(&update);
        assert_eq!(merged.get(Axis::X), Some(1.0));
        assert_eq!(merged.get(Axis::Y), Some(9.0));
        assert_eq!(merged.get(Axis::Z), None);
    }

    #[test]
    fn test_or_zero_fills_all_axes() {
        let values = AxisValues::new().with(Axis::Z, 3.0).or_zero();
        assert_eq!(values.len(), AXIS_COUNT);
        assert_eq!(values.get(Axis::Z), Some(3.0));
        assert_eq!(values.get(Axis::U), Some(0.0));
    }
}
