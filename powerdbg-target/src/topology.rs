use serde::{Deserialize, Serialize};

use crate::{compatible, PollConfig};

/// Errors raised while loading a topology description.
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    /// The YAML could not be parsed into a topology.
    #[error("failed to parse the topology description")]
    Yaml(#[from] serde_yaml::Error),
    /// A unit has an empty compatibility string.
    #[error("unit at {path} has no compatibility string")]
    MissingCompatible {
        /// Slash separated position of the unit in the description.
        path: String,
    },
    /// Two siblings with the same compatibility string claim the same index.
    #[error("index {index} is used twice for '{compatible}' under {path}")]
    DuplicateIndex {
        /// Slash separated position of the parent in the description.
        path: String,
        /// Compatibility string of the clashing siblings.
        compatible: String,
        /// The clashing index.
        index: u32,
    },
}

/// Whether a unit may be probed at all.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// The unit is present and may be probed.
    #[default]
    Okay,
    /// The unit is fused off or otherwise unusable. Probing it yields a disabled target.
    Disabled,
}

/// One physical hardware unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescription {
    /// The compatibility string used to look up the unit's implementation.
    pub compatible: String,
    /// Display name override. Defaults to the registered unit name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Position of the unit among its siblings of the same kind.
    ///
    /// When omitted, units are numbered in the order they appear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Availability of the unit.
    #[serde(default)]
    pub status: UnitStatus,
    /// The units contained in this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UnitDescription>,
}

impl UnitDescription {
    /// A unit with the given compatibility string and nothing else set.
    pub fn new(compatible: impl Into<String>) -> Self {
        Self {
            compatible: compatible.into(),
            name: None,
            index: None,
            status: UnitStatus::Okay,
            children: vec![],
        }
    }

    /// Sets an explicit sibling index.
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Appends child units.
    pub fn with_children(mut self, children: impl IntoIterator<Item = UnitDescription>) -> Self {
        self.children.extend(children);
        self
    }

    fn validate(&self, path: &str) -> Result<(), DescriptionError> {
        if self.compatible.is_empty() {
            return Err(DescriptionError::MissingCompatible {
                path: path.to_string(),
            });
        }

        let path = format!("{path}/{}", self.compatible);
        validate_siblings(&self.children, &path)
    }
}

/// The index of every unit in `units`, with defaults filled in.
///
/// A unit without an explicit index gets the number of siblings of the same
/// compatibility string listed before it.
pub fn resolve_indexes(units: &[UnitDescription]) -> Vec<u32> {
    units
        .iter()
        .enumerate()
        .map(|(position, unit)| {
            unit.index.unwrap_or_else(|| {
                units[..position]
                    .iter()
                    .filter(|sibling| sibling.compatible == unit.compatible)
                    .count() as u32
            })
        })
        .collect()
}

fn validate_siblings(units: &[UnitDescription], path: &str) -> Result<(), DescriptionError> {
    let mut seen: Vec<(&str, u32)> = Vec::new();

    for (unit, index) in units.iter().zip(resolve_indexes(units)) {
        if seen.contains(&(unit.compatible.as_str(), index)) {
            return Err(DescriptionError::DuplicateIndex {
                path: path.to_string(),
                compatible: unit.compatible.clone(),
                index,
            });
        }
        seen.push((unit.compatible.as_str(), index));

        unit.validate(path)?;
    }

    Ok(())
}

/// A complete system topology.
///
/// ```yaml
/// name: single-chip
/// units:
///   - compatible: ibm,power-proc
///     children:
///       - compatible: ibm,power10-core
///         index: 5
///         children:
///           - compatible: ibm,power10-thread
///           - compatible: ibm,power10-thread
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    /// Name of the system, only used for diagnostics.
    pub name: String,
    /// Timing of the wakeup and quiesce polls.
    #[serde(default)]
    pub poll: PollConfig,
    /// The top level units, normally one processor module per socket.
    pub units: Vec<UnitDescription>,
}

impl TopologyDescription {
    /// Parses and validates a YAML topology description.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DescriptionError> {
        let description: Self = serde_yaml::from_str(yaml)?;
        description.validate()?;
        Ok(description)
    }

    /// Checks the structural rules serde cannot express.
    pub fn validate(&self) -> Result<(), DescriptionError> {
        validate_siblings(&self.units, "")
    }

    /// Builds a uniform POWER10 system: `procs` processor modules, each with the
    /// cores listed in `cores`, each core having `threads` hardware threads.
    pub fn power10(name: impl Into<String>, procs: u32, cores: &[u32], threads: u32) -> Self {
        let units = (0..procs)
            .map(|proc| {
                UnitDescription::new(compatible::PROC)
                    .with_index(proc)
                    .with_children(cores.iter().map(|&core| {
                        UnitDescription::new(compatible::POWER10_CORE)
                            .with_index(core)
                            .with_children((0..threads).map(|thread| {
                                UnitDescription::new(compatible::POWER10_THREAD).with_index(thread)
                            }))
                    }))
            })
            .collect();

        Self {
            name: name.into(),
            poll: PollConfig::default(),
            units,
        }
    }
}
