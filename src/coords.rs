//! Coordinate-system management.
//!
//! The controller stores named offset frames for the six axes, organized as
//! a tree rooted at `ZERO`. Exactly one system is active at a time; the
//! firmware keeps systems across sessions until they are removed.

use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::axes::{Axis, AxisValues};
use crate::gcs::{reply, GcsError, GcsResult};
use crate::hexapod::Hexapod;

/// Name of the root coordinate system. Cannot be removed or re-parented.
pub const ROOT_CS: &str = "ZERO";

/// Reserved metadata fields in `KLT?` entries; everything else is an axis.
const RESERVED_FIELDS: [&str; 2] = ["Name", "EndCoordinateSystem"];

/// Settle delay between deactivating a system and rewriting its offsets.
const REWRITE_SETTLE: Duration = Duration::from_millis(100);

/// One coordinate system as reported by `KLT?`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsInfo {
    pub name: String,
    pub offsets: AxisValues,
    pub end_coordinate_system: Option<String>,
}

/// Coordinate-system operations on a connected hexapod.
pub struct CoordinateSystems<'a> {
    hex: &'a Hexapod,
}

impl<'a> CoordinateSystems<'a> {
    pub(crate) fn new(hex: &'a Hexapod) -> Self {
        Self { hex }
    }

    /// All coordinate systems known to the controller (`KLT?`).
    pub fn list(&self) -> GcsResult<Vec<CsInfo>> {
        let reply = self.hex.query("KLT?")?;
        let mut out = Vec::new();
        for block in reply::tabbed_blocks(&reply) {
            let mut name = None;
            let mut end_cs = None;
            let mut offsets = AxisValues::new();
            for (key, value) in block {
                match key.as_str() {
                    "Name" => name = Some(value),
                    "EndCoordinateSystem" => end_cs = Some(value),
                    _ => {
                        let Ok(axis) = Axis::from_str(&key) else {
                            debug!("ignoring unknown field {key:?} in KLT? entry");
                            continue;
                        };
                        let value: f64 = value.parse().map_err(|_| {
                            GcsError::Parse(format!("bad offset for {key}: {value:?}"))
                        })?;
                        offsets.set(axis, value);
                    }
                }
            }
            if let Some(name) = name {
                out.push(CsInfo {
                    name,
                    offsets,
                    end_coordinate_system: end_cs,
                });
            }
        }
        Ok(out)
    }

    /// The named system's `KLT?` entry, if present.
    pub fn info(&self, name: &str) -> GcsResult<Option<CsInfo>> {
        Ok(self.list()?.into_iter().find(|cs| cs.name == name))
    }

    /// The axis set the controller reports, discovered from the ZERO entry.
    ///
    /// All `KLT?` fields except the reserved metadata ones name an axis.
    pub fn discover_axes(&self) -> GcsResult<Vec<Axis>> {
        let reply = self.hex.query("KLT?")?;
        for block in reply::tabbed_blocks(&reply) {
            let is_zero = block
                .iter()
                .any(|(key, value)| key == "Name" && value == ROOT_CS);
            if !is_zero {
                continue;
            }
            let axes: Vec<Axis> = block
                .iter()
                .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
                .filter_map(|(key, _)| Axis::from_str(key).ok())
                .collect();
            return Ok(axes);
        }
        Err(GcsError::Parse(format!(
            "{ROOT_CS} coordinate system missing from KLT? reply"
        )))
    }

    /// The currently active system (`KET?`); `ZERO` when none is enabled.
    ///
    /// The controller reports nothing rather than an explicit name when no
    /// custom system is active.
    pub fn active(&self) -> GcsResult<String> {
        let reply = self.hex.query("KET?")?;
        for (name, kind) in reply::key_value_lines(&reply) {
            if kind == "KSD" {
                return Ok(name);
            }
        }
        Ok(ROOT_CS.to_string())
    }

    /// Activate the named system (`KEN`).
    ///
    /// A nonexistent name surfaces the controller error; the session stays
    /// alive.
    pub fn activate(&self, name: &str) -> GcsResult<()> {
        self.hex.command(&format!("KEN {name}"))
    }

    /// Define or update a coordinate system, then activate it.
    ///
    /// Existing systems are MERGED: stored offsets are read back and only
    /// the axes named in `offsets` are overwritten. New systems get 0 for
    /// every unnamed axis and are linked to `parent` (default `ZERO`).
    /// An explicit `parent` re-links an existing system too.
    pub fn define(
        &self,
        name: &str,
        parent: Option<&str>,
        offsets: &AxisValues,
    ) -> GcsResult<()> {
        let name = name.to_uppercase();
        if name == ROOT_CS {
            return Err(GcsError::InvalidOperation(format!(
                "{ROOT_CS} offsets cannot be redefined"
            )));
        }
        let existing = self.info(&name)?;
        let merged = match &existing {
            Some(info) => info.offsets.merged(offsets),
            None => offsets.or_zero(),
        };
        self.write_offsets(&name, &merged)?;
        match (&existing, parent) {
            (None, parent) => self.link(&name, parent.unwrap_or(ROOT_CS))?,
            (Some(_), Some(parent)) => self.link(&name, parent)?,
            (Some(_), None) => {}
        }
        info!(
            "coordinate system {name} {}",
            if existing.is_some() { "updated" } else { "defined" }
        );
        self.activate(&name)
    }

    /// Write offsets for the currently active custom system.
    ///
    /// The firmware rejects `KSD` against the active system, so this drops
    /// to ZERO, writes, and re-activates.
    pub fn set_active_offsets(&self, offsets: &AxisValues) -> GcsResult<()> {
        let active = self.active()?;
        if active == ROOT_CS {
            return Err(GcsError::InvalidOperation(
                "no custom coordinate system is active".to_string(),
            ));
        }
        self.activate(ROOT_CS)?;
        std::thread::sleep(REWRITE_SETTLE);
        let stored = self
            .info(&active)?
            .map(|info| info.offsets)
            .unwrap_or_default();
        self.write_offsets(&active, &stored.merged(offsets))?;
        self.activate(&active)
    }

    /// Re-link `child` under `parent` (`KLN`).
    ///
    /// No cycle check is performed; the caller is trusted.
    pub fn link(&self, child: &str, parent: &str) -> GcsResult<()> {
        if child == ROOT_CS {
            return Err(GcsError::InvalidOperation(format!(
                "{ROOT_CS} cannot be re-parented"
            )));
        }
        self.hex.command(&format!("KLN {child} {parent}"))
    }

    /// Remove the named system (`KRM`).
    ///
    /// Removing `ZERO` is refused. Removing the active system first drops
    /// back to ZERO. Children of the removed system keep their dangling
    /// parent name; the firmware does not cascade.
    pub fn remove(&self, name: &str) -> GcsResult<()> {
        if name == ROOT_CS {
            return Err(GcsError::InvalidOperation(format!(
                "{ROOT_CS} cannot be removed"
            )));
        }
        if self.active()? == name {
            self.activate(ROOT_CS)?;
        }
        let children: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|cs| cs.end_coordinate_system.as_deref() == Some(name))
            .map(|cs| cs.name)
            .collect();
        if !children.is_empty() {
            warn!("removing {name} leaves dangling children: {children:?}");
        }
        self.hex.command(&format!("KRM {name}"))
    }

    fn write_offsets(&self, name: &str, offsets: &AxisValues) -> GcsResult<()> {
        let args = offsets.to_axis_args().ok_or_else(|| {
            GcsError::InvalidOperation("no axis offsets to write".to_string())
        })?;
        self.hex.command(&format!("KSD {name} {args}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HexapodConfig;
    use crate::gcs::MockChannel;

    const KLT_TWO_SYSTEMS: &str = "Name=ZERO\tX=0\tY=0\tZ=0\tU=0\tV=0\tW=0\n\
         Name=PTYCHO\tEndCoordinateSystem=ZERO\tX=1.5\tY=-2\tZ=0\tU=0\tV=0\tW=0\n";

    fn hexapod(mock: &MockChannel) -> Hexapod {
        Hexapod::with_channel(Box::new(mock.clone()), HexapodConfig::default())
    }

    #[test]
    fn test_list_and_info() {
        let mock = MockChannel::new();
        mock.stub("KLT?", KLT_TWO_SYSTEMS);
        let hex = hexapod(&mock);
        let systems = hex.coords().list().unwrap();
        assert_eq!(systems.len(), 2);

        let ptycho = hex.coords().info("PTYCHO").unwrap().unwrap();
        assert_eq!(ptycho.offsets.get(Axis::X), Some(1.5));
        assert_eq!(ptycho.end_coordinate_system.as_deref(), Some("ZERO"));
        assert!(hex.coords().info("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_discover_axes_skips_reserved_fields() {
        let mock = MockChannel::new();
        mock.stub("KLT?", KLT_TWO_SYSTEMS);
        let hex = hexapod(&mock);
        assert_eq!(hex.coords().discover_axes().unwrap(), Axis::all().to_vec());
    }

    #[test]
    fn test_active_defaults_to_zero() {
        let mock = MockChannel::new();
        mock.stub("KET?", "\n");
        let hex = hexapod(&mock);
        assert_eq!(hex.coords().active().unwrap(), "ZERO");

        mock.stub("KET?", "PTYCHO=KSD\n");
        assert_eq!(hex.coords().active().unwrap(), "PTYCHO");
    }

    #[test]
    fn test_remove_zero_always_fails() {
        let mock = MockChannel::new();
        let hex = hexapod(&mock);
        match hex.coords().remove("ZERO") {
            Err(GcsError::InvalidOperation(_)) => {}
            other => panic!("expected InvalidOperation, got {other:?}"),
        }
        // Refused before any device traffic.
        assert!(mock.log().is_empty());
    }

    #[test]
    fn test_remove_active_system_deactivates_first() {
        let mock = MockChannel::new();
        mock.stub("KET?", "PTYCHO=KSD\n");
        mock.stub("KLT?", KLT_TWO_SYSTEMS);
        let hex = hexapod(&mock);
        hex.coords().remove("PTYCHO").unwrap();
        let log = mock.log();
        let ken = log.iter().position(|c| c == "KEN ZERO").unwrap();
        let krm = log.iter().position(|c| c == "KRM PTYCHO").unwrap();
        assert!(ken < krm);
    }

    #[test]
    fn test_define_merges_existing_offsets() {
        // Merge, not overwrite: only the axes named in the update are
        // mutated, the rest keep their stored values. An overwrite would
        // zero X here.
        let mock = MockChannel::new();
        mock.stub("KLT?", KLT_TWO_SYSTEMS);
        let hex = hexapod(&mock);
        let update = AxisValues::new().with(Axis::Y, 9.0);
        hex.coords().define("PTYCHO", None, &update).unwrap();

        let ksd = mock
            .log()
            .into_iter()
            .find(|c| c.starts_with("KSD"))
            .unwrap();
        assert_eq!(ksd, "KSD PTYCHO X 1.5 Y 9 Z 0 U 0 V 0 W 0");
        // Existing system with no explicit parent: no re-link.
        assert_eq!(mock.count("KLN"), 0);
        assert_eq!(mock.count("KEN PTYCHO"), 1);
    }

    #[test]
    fn test_define_new_system_defaults() {
        let mock = MockChannel::new();
        mock.stub("KLT?", "Name=ZERO\tX=0\tY=0\tZ=0\tU=0\tV=0\tW=0\n");
        let hex = hexapod(&mock);
        let offsets = AxisValues::new().with(Axis::X, 80.0);
        hex.coords().define("tomo", None, &offsets).unwrap();

        let log = mock.log();
        assert!(log.contains(&"KSD TOMO X 80 Y 0 Z 0 U 0 V 0 W 0".to_string()));
        assert!(log.contains(&"KLN TOMO ZERO".to_string()));
        assert!(log.contains(&"KEN TOMO".to_string()));
    }
}
