//! The hardware unit classes known to the target tree builder.

use std::fmt;
use std::sync::Arc;

use powerdbg_target::{compatible, PollConfig};

use super::control::{CoreControl, RingAccess, ThreadControl};
use crate::architecture::power::p10::{P10Core, P10Thread};

/// The class of a hardware unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitClass {
    /// A processor module. Owns a debug bus.
    Proc,
    /// A processor core.
    Core,
    /// A hardware thread.
    Thread,
    /// A chiplet with scan rings.
    Chiplet,
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitClass::Proc => "proc",
            UnitClass::Core => "core",
            UnitClass::Thread => "thread",
            UnitClass::Chiplet => "chiplet",
        })
    }
}

/// The capabilities registered for a hardware unit.
///
/// Which capabilities exist is decided by the variant: a core has no ring
/// access and a chiplet cannot be started.
#[derive(Debug, Clone)]
pub enum UnitDriver {
    /// A processor module.
    Proc,
    /// A core.
    Core(Arc<dyn CoreControl>),
    /// A thread.
    Thread(Arc<dyn ThreadControl>),
    /// A chiplet.
    Chiplet(Arc<dyn RingAccess>),
}

impl UnitDriver {
    /// The class this driver belongs to.
    pub fn class(&self) -> UnitClass {
        match self {
            UnitDriver::Proc => UnitClass::Proc,
            UnitDriver::Core(_) => UnitClass::Core,
            UnitDriver::Thread(_) => UnitClass::Thread,
            UnitDriver::Chiplet(_) => UnitClass::Chiplet,
        }
    }
}

/// A registered hardware unit.
#[derive(Debug, Clone)]
pub struct HwUnit {
    /// Human readable name of the unit.
    pub name: String,
    /// The compatible string topology nodes select the unit with.
    pub compatible: String,
    /// The capabilities of the unit.
    pub driver: UnitDriver,
}

/// Maps compatible strings to hardware unit drivers.
#[derive(Debug, Clone, Default)]
pub struct HwUnitRegistry {
    units: Vec<HwUnit>,
}

impl HwUnitRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every unit shipped with this crate.
    pub fn builtin(poll: PollConfig) -> Self {
        let mut registry = Self::new();

        registry.register("POWER processor", compatible::PROC, UnitDriver::Proc);
        registry.register(
            "POWER10 core",
            compatible::POWER10_CORE,
            UnitDriver::Core(Arc::new(P10Core::new(poll))),
        );
        registry.register(
            "POWER10 thread",
            compatible::POWER10_THREAD,
            UnitDriver::Thread(Arc::new(P10Thread::new(poll))),
        );

        registry
    }

    /// Adds a unit. A later registration for the same compatible string wins.
    pub fn register(&mut self, name: impl Into<String>, compatible: impl Into<String>, driver: UnitDriver) {
        let unit = HwUnit {
            name: name.into(),
            compatible: compatible.into(),
            driver,
        };

        tracing::debug!("registering {} unit {} ({})", unit.driver.class(), unit.name, unit.compatible);

        self.units.retain(|existing| existing.compatible != unit.compatible);
        self.units.push(unit);
    }

    /// Looks up the unit for `compatible`.
    pub fn find(&self, compatible: &str) -> Option<&HwUnit> {
        self.units.iter().find(|unit| unit.compatible == compatible)
    }

    /// All registered units.
    pub fn units(&self) -> &[HwUnit] {
        &self.units
    }
}
