//! The tree of hardware units making up a system.
//!
//! A [`TargetTree`] is built once from a [`TopologyDescription`] and a
//! [`HwUnitRegistry`]. Every node is a [`Target`] with a class, a position among
//! its siblings and a lifecycle status:
//!
//! ```text
//! Unprobed --probe--> Enabled --release--> Released
//!          \--probe--> Disabled
//! ```
//!
//! Capabilities are reached through typed handles. A [`ThreadId`] can only be
//! obtained for a thread, so asking a core to start is not expressible.

mod control;
pub(crate) mod fake_system;
mod registry;

pub use control::{
    ChipletContext, ControlOutcome, CoreContext, CoreControl, RingAccess, SleepState, SmtState,
    ThreadContext, ThreadControl, ThreadState,
};
pub use registry::{HwUnit, HwUnitRegistry, UnitClass, UnitDriver};

use std::fmt;
use std::sync::Arc;

use powerdbg_target::{resolve_indexes, TopologyDescription, UnitDescription, UnitStatus};

use crate::architecture::power::{RamEngine, RamTransport};
use crate::bus::{BusAccess, BusError, ScopedBus, Translation};
use crate::Error;

/// Errors raised by the target tree.
#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    /// No unit is registered for a compatibility string of the description.
    #[error("No hardware unit is registered as '{0}'")]
    UnknownCompatible(String),
    /// The target was released and can not be probed again.
    #[error("{path} has been released")]
    Released {
        /// Path of the target.
        path: String,
    },
    /// The operation needs a probed and enabled target.
    #[error("{path} is {status}")]
    NotEnabled {
        /// Path of the target.
        path: String,
        /// Its current status.
        status: TargetStatus,
    },
    /// No processor module above the target owns a bus.
    #[error("{path} is not connected to a debug bus")]
    NoBus {
        /// Path of the target.
        path: String,
    },
    /// The target lacks an ancestor its class depends on.
    #[error("{path} has no parent {class}")]
    MissingParent {
        /// Path of the target.
        path: String,
        /// The class of the missing ancestor.
        class: UnitClass,
    },
    /// The target does not provide the requested capability.
    #[error("{path} is a {found}, not a {expected}")]
    WrongClass {
        /// Path of the target.
        path: String,
        /// The class providing the capability.
        expected: UnitClass,
        /// The class of the target.
        found: UnitClass,
    },
    /// The thread has no instruction injection transport.
    #[error("{path} has no RAM transport")]
    RamUnavailable {
        /// Path of the thread.
        path: String,
    },
    /// The buffer handed to a ring read can not hold the ring.
    #[error("A ring of {ring_len} bits does not fit into {words} words")]
    RingBufferTooSmall {
        /// Length of the ring in bits.
        ring_len: u64,
        /// Size of the buffer in 32-bit words.
        words: usize,
    },
}

/// Lifecycle of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Not probed yet.
    Unprobed,
    /// Probed successfully and usable.
    Enabled,
    /// Absent, fused off, or its probe failed.
    Disabled,
    /// Released. It can not be used or probed again.
    Released,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetStatus::Unprobed => "unprobed",
            TargetStatus::Enabled => "enabled",
            TargetStatus::Disabled => "disabled",
            TargetStatus::Released => "released",
        })
    }
}

/// Index of a target in its [`TargetTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(usize);

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(TargetId);

        impl $name {
            /// The untyped id.
            pub fn id(self) -> TargetId {
                self.0
            }
        }

        impl From<$name> for TargetId {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(
    /// A target known to be a thread.
    ThreadId
);
typed_id!(
    /// A target known to be a core.
    CoreId
);
typed_id!(
    /// A target known to be a chiplet.
    ChipletId
);

/// Core state shared with the threads of the core.
#[derive(Debug, Default)]
pub struct Core {
    /// Whether releasing the core clears its special wakeup.
    ///
    /// Set when the core is probed. A thread found quiesced on release clears it,
    /// since whoever stopped that thread still relies on the wakeup.
    pub release_spwkup: bool,
}

/// The RAM engine of a thread.
pub type ThreadRam = RamEngine<Box<dyn RamTransport>>;

/// Per thread state.
#[derive(Debug)]
pub struct Thread {
    /// Position of the thread within its core.
    pub id: u32,
    /// The state observed by the last control operation.
    pub status: ThreadState,
    pub(crate) ram: Option<ThreadRam>,
}

impl Thread {
    /// The RAM engine, if the system provides a transport for this thread.
    pub fn ram(&mut self) -> Option<&mut ThreadRam> {
        self.ram.as_mut()
    }
}

#[derive(Debug)]
enum Unit {
    Proc { bus: Option<usize> },
    Core { core: Core, driver: Arc<dyn CoreControl> },
    Thread { thread: Thread, driver: Arc<dyn ThreadControl> },
    Chiplet { driver: Arc<dyn RingAccess> },
}

/// One hardware unit in the tree.
#[derive(Debug)]
pub struct Target {
    name: String,
    compatible: String,
    class: UnitClass,
    index: u32,
    parent: Option<TargetId>,
    children: Vec<TargetId>,
    status: TargetStatus,
    fused_off: bool,
    unit: Unit,
}

impl Target {
    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compatibility string the target was created from.
    pub fn compatible(&self) -> &str {
        &self.compatible
    }

    /// The class of the target.
    pub fn class(&self) -> UnitClass {
        self.class
    }

    /// Position among the siblings of the same compatibility.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The parent target.
    pub fn parent(&self) -> Option<TargetId> {
        self.parent
    }

    /// The direct children, in description order.
    pub fn children(&self) -> &[TargetId] {
        &self.children
    }

    /// The lifecycle status.
    pub fn status(&self) -> TargetStatus {
        self.status
    }

    /// The cached thread state, for threads.
    pub fn thread_status(&self) -> Option<ThreadState> {
        match &self.unit {
            Unit::Thread { thread, .. } => Some(thread.status),
            _ => None,
        }
    }

    /// Whether releasing this core clears its special wakeup, for cores.
    pub fn release_spwkup(&self) -> Option<bool> {
        match &self.unit {
            Unit::Core { core, .. } => Some(core.release_spwkup),
            _ => None,
        }
    }
}

/// Provides the system specific resources of a tree.
pub trait SystemBackend {
    /// Opens the debug bus of processor module `proc`.
    fn bus(&mut self, proc: u32) -> Result<Box<dyn BusAccess>, BusError>;

    /// The instruction injection transport of a thread, if there is one.
    fn ram_transport(&mut self, proc: u32, core: u32, thread: u32) -> Option<Box<dyn RamTransport>>;
}

#[derive(Debug, Clone, Copy, Default)]
struct Location {
    proc: Option<u32>,
    core: Option<u32>,
}

/// All hardware units of a system.
#[derive(Debug)]
pub struct TargetTree {
    name: String,
    targets: Vec<Target>,
    roots: Vec<TargetId>,
    buses: Vec<Box<dyn BusAccess>>,
}

impl TargetTree {
    /// Creates one target per unit of `description`.
    ///
    /// Every compatibility string must be registered in `registry`. Buses of
    /// processor modules that are not disabled are opened right away.
    pub fn build(
        description: &TopologyDescription,
        registry: &HwUnitRegistry,
        backend: &mut dyn SystemBackend,
    ) -> Result<Self, Error> {
        description.validate()?;

        let mut tree = Self {
            name: description.name.clone(),
            targets: vec![],
            roots: vec![],
            buses: vec![],
        };

        tree.roots = tree.add_units(&description.units, None, Location::default(), registry, backend)?;

        tracing::info!("built target tree '{}' with {} targets", tree.name, tree.targets.len());

        Ok(tree)
    }

    fn add_units(
        &mut self,
        units: &[UnitDescription],
        parent: Option<TargetId>,
        location: Location,
        registry: &HwUnitRegistry,
        backend: &mut dyn SystemBackend,
    ) -> Result<Vec<TargetId>, Error> {
        let mut ids = Vec::with_capacity(units.len());

        for (description, index) in units.iter().zip(resolve_indexes(units)) {
            let hw = registry
                .find(&description.compatible)
                .ok_or_else(|| TargetError::UnknownCompatible(description.compatible.clone()))?;

            let fused_off = description.status == UnitStatus::Disabled;

            let mut location = location;
            let unit = match &hw.driver {
                UnitDriver::Proc => {
                    location.proc = Some(index);
                    let bus = if fused_off {
                        None
                    } else {
                        self.buses.push(backend.bus(index)?);
                        Some(self.buses.len() - 1)
                    };
                    Unit::Proc { bus }
                }
                UnitDriver::Core(driver) => {
                    location.core = Some(index);
                    Unit::Core {
                        core: Core::default(),
                        driver: driver.clone(),
                    }
                }
                UnitDriver::Thread(driver) => {
                    let ram = match location {
                        Location {
                            proc: Some(proc),
                            core: Some(core),
                        } => backend.ram_transport(proc, core, index).map(RamEngine::new),
                        _ => None,
                    };
                    Unit::Thread {
                        thread: Thread {
                            id: index,
                            status: ThreadState::default(),
                            ram,
                        },
                        driver: driver.clone(),
                    }
                }
                UnitDriver::Chiplet(driver) => Unit::Chiplet {
                    driver: driver.clone(),
                },
            };

            let id = TargetId(self.targets.len());
            self.targets.push(Target {
                name: description.name.clone().unwrap_or_else(|| hw.name.clone()),
                compatible: description.compatible.clone(),
                class: hw.driver.class(),
                index,
                parent,
                children: vec![],
                status: TargetStatus::Unprobed,
                fused_off,
                unit,
            });

            let children = self.add_units(&description.children, Some(id), location, registry, backend)?;
            self.targets[id.0].children = children;

            ids.push(id);
        }

        Ok(ids)
    }

    /// The name of the system.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The top level targets.
    pub fn roots(&self) -> &[TargetId] {
        &self.roots
    }

    /// The target behind `id`.
    pub fn target(&self, id: impl Into<TargetId>) -> &Target {
        &self.targets[id.into().0]
    }

    /// The location of a target, e.g. `/proc0/core5/thread1`.
    pub fn path(&self, id: impl Into<TargetId>) -> String {
        let mut segments = vec![];
        let mut current = Some(id.into());

        while let Some(id) = current {
            let target = &self.targets[id.0];
            segments.push(format!("{}{}", target.class, target.index));
            current = target.parent;
        }

        segments
            .iter()
            .rev()
            .fold(String::new(), |path, segment| path + "/" + segment)
    }

    /// Looks up a target by its [path](Self::path).
    pub fn find(&self, path: &str) -> Option<TargetId> {
        (0..self.targets.len())
            .map(TargetId)
            .find(|&id| self.path(id) == path)
    }

    /// The nearest ancestor of `id` of class `class`.
    pub fn parent_of_class(&self, id: impl Into<TargetId>, class: UnitClass) -> Option<TargetId> {
        let mut current = self.targets[id.into().0].parent;

        while let Some(id) = current {
            let target = &self.targets[id.0];
            if target.class == class {
                return Some(id);
            }
            current = target.parent;
        }

        None
    }

    /// All descendants of `id` of class `class`, depth first in description order.
    pub fn descendants_of_class(&self, id: impl Into<TargetId>, class: UnitClass) -> Vec<TargetId> {
        let mut found = vec![];
        self.collect_descendants(id.into(), class, &mut found);
        found
    }

    fn collect_descendants(&self, id: TargetId, class: UnitClass, found: &mut Vec<TargetId>) {
        for &child in &self.targets[id.0].children {
            if self.targets[child.0].class == class {
                found.push(child);
            }
            self.collect_descendants(child, class, found);
        }
    }

    /// All targets of class `class` in the tree.
    pub fn targets_of_class(&self, class: UnitClass) -> Vec<TargetId> {
        (0..self.targets.len())
            .map(TargetId)
            .filter(|id| self.targets[id.0].class == class)
            .collect()
    }

    fn expect_class(&self, id: TargetId, expected: UnitClass) -> Result<(), TargetError> {
        let found = self.targets[id.0].class;
        if found != expected {
            return Err(TargetError::WrongClass {
                path: self.path(id),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// `id` as a thread.
    pub fn as_thread(&self, id: TargetId) -> Result<ThreadId, TargetError> {
        self.expect_class(id, UnitClass::Thread)?;
        Ok(ThreadId(id))
    }

    /// `id` as a core.
    pub fn as_core(&self, id: TargetId) -> Result<CoreId, TargetError> {
        self.expect_class(id, UnitClass::Core)?;
        Ok(CoreId(id))
    }

    /// `id` as a chiplet.
    pub fn as_chiplet(&self, id: TargetId) -> Result<ChipletId, TargetError> {
        self.expect_class(id, UnitClass::Chiplet)?;
        Ok(ChipletId(id))
    }

    /// The bus a target is reached through and the translations on the way there.
    fn route(&self, id: TargetId) -> Result<(usize, Vec<Translation>), TargetError> {
        let mut translations = vec![];
        let mut current = Some(id);

        while let Some(hop) = current {
            let target = &self.targets[hop.0];
            match &target.unit {
                Unit::Proc { bus: Some(bus) } => return Ok((*bus, translations)),
                Unit::Proc { bus: None } => break,
                Unit::Core { driver, .. } => translations.push(Translation {
                    driver: driver.clone(),
                    index: target.index,
                }),
                Unit::Thread { .. } | Unit::Chiplet { .. } => {}
            }
            current = target.parent;
        }

        Err(TargetError::NoBus { path: self.path(id) })
    }

    fn with_thread<R>(
        &mut self,
        id: TargetId,
        f: impl FnOnce(&dyn ThreadControl, &mut ThreadContext<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.expect_class(id, UnitClass::Thread)?;
        let (bus, translations) = self.route(id)?;

        let path = self.path(id);
        let core_id = self.targets[id.0]
            .parent
            .filter(|parent| self.targets[parent.0].class == UnitClass::Core)
            .ok_or_else(|| TargetError::MissingParent {
                path: path.clone(),
                class: UnitClass::Core,
            })?;

        let index = self.targets[id.0].index;
        // Parents are always created before their children.
        let (head, tail) = self.targets.split_at_mut(id.0);

        let (Unit::Core { core, .. }, Unit::Thread { thread, driver }) =
            (&mut head[core_id.0].unit, &mut tail[0].unit)
        else {
            return Err(TargetError::MissingParent {
                path,
                class: UnitClass::Core,
            }
            .into());
        };
        let driver = driver.clone();

        let mut ctx = ThreadContext {
            index,
            thread,
            core,
            bus: ScopedBus::new(self.buses[bus].as_mut(), translations),
        };

        f(driver.as_ref(), &mut ctx)
    }

    fn with_core<R>(
        &mut self,
        id: TargetId,
        f: impl FnOnce(&dyn CoreControl, &mut CoreContext<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.expect_class(id, UnitClass::Core)?;
        let (bus, translations) = self.route(id)?;

        let path = self.path(id);
        let index = self.targets[id.0].index;
        let Unit::Core { core, driver } = &mut self.targets[id.0].unit else {
            return Err(TargetError::NoBus { path }.into());
        };
        let driver = driver.clone();

        let mut ctx = CoreContext {
            index,
            core,
            bus: ScopedBus::new(self.buses[bus].as_mut(), translations),
        };

        f(driver.as_ref(), &mut ctx)
    }

    fn ensure_enabled(&self, id: TargetId) -> Result<(), TargetError> {
        match self.targets[id.0].status {
            TargetStatus::Enabled => Ok(()),
            status => Err(TargetError::NotEnabled {
                path: self.path(id),
                status,
            }),
        }
    }

    /// Probes a target, probing its ancestors first.
    ///
    /// A target whose parent is not enabled, that is disabled in the
    /// description, or whose probe hook fails ends up disabled. Probing an
    /// already probed target returns its status.
    pub fn probe(&mut self, id: impl Into<TargetId>) -> Result<TargetStatus, Error> {
        let id = id.into();

        match self.targets[id.0].status {
            TargetStatus::Unprobed => {}
            TargetStatus::Released => return Err(TargetError::Released { path: self.path(id) }.into()),
            status => return Ok(status),
        }

        let parent_enabled = match self.targets[id.0].parent {
            Some(parent) => self.probe(parent)? == TargetStatus::Enabled,
            None => true,
        };

        let status = if !parent_enabled || self.targets[id.0].fused_off {
            TargetStatus::Disabled
        } else {
            match self.run_probe(id) {
                Ok(()) => TargetStatus::Enabled,
                Err(error) => {
                    tracing::warn!("Probing {} failed, disabling it: {}", self.path(id), error);
                    TargetStatus::Disabled
                }
            }
        };

        tracing::debug!("{} is {}", self.path(id), status);
        self.targets[id.0].status = status;

        Ok(status)
    }

    fn run_probe(&mut self, id: TargetId) -> Result<(), Error> {
        match self.targets[id.0].class {
            UnitClass::Proc | UnitClass::Chiplet => Ok(()),
            UnitClass::Core => self.with_core(id, |driver, ctx| driver.probe(ctx)),
            UnitClass::Thread => self.with_thread(id, |driver, ctx| driver.probe(ctx)),
        }
    }

    /// Probes every target.
    pub fn probe_all(&mut self) -> Result<(), Error> {
        for id in (0..self.targets.len()).map(TargetId) {
            self.probe(id)?;
        }
        Ok(())
    }

    /// Releases a target and everything below it.
    ///
    /// Children of an enabled target that were not probed yet are probed
    /// first. Children that end up disabled are skipped. A target that is not
    /// enabled is marked released without touching the hardware. The first
    /// error is returned, but every target is still visited.
    pub fn release(&mut self, id: impl Into<TargetId>) -> Result<(), Error> {
        let id = id.into();

        if self.targets[id.0].status == TargetStatus::Released {
            return Ok(());
        }

        let mut result = Ok(());

        // Nothing below a target that is not enabled can be enabled.
        let children = if self.targets[id.0].status == TargetStatus::Enabled {
            self.targets[id.0].children.clone()
        } else {
            vec![]
        };

        for child in children {
            if self.targets[child.0].status == TargetStatus::Released {
                continue;
            }
            if self.probe(child)? != TargetStatus::Enabled {
                continue;
            }
            if let Err(error) = self.release(child) {
                result = result.and(Err(error));
            }
        }

        if self.targets[id.0].status == TargetStatus::Enabled {
            if let Err(error) = self.run_release(id) {
                tracing::warn!("Releasing {} failed: {}", self.path(id), error);
                result = result.and(Err(error));
            }
        }

        tracing::debug!("{} is released", self.path(id));
        self.targets[id.0].status = TargetStatus::Released;

        result
    }

    fn run_release(&mut self, id: TargetId) -> Result<(), Error> {
        match self.targets[id.0].class {
            UnitClass::Proc | UnitClass::Chiplet => Ok(()),
            UnitClass::Core => self.with_core(id, |driver, ctx| driver.release(ctx)),
            UnitClass::Thread => self.with_thread(id, |driver, ctx| driver.release(ctx)),
        }
    }

    /// Releases every target.
    pub fn release_all(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        for root in self.roots.clone() {
            result = result.and(self.release(root));
        }
        result
    }

    /// Reads the current state of a thread from the hardware.
    pub fn thread_state(&mut self, id: ThreadId) -> Result<ThreadState, Error> {
        self.ensure_enabled(id.0)?;
        self.with_thread(id.0, |driver, ctx| driver.state(ctx))
    }

    /// Resumes a quiesced thread.
    #[tracing::instrument(skip(self))]
    pub fn thread_start(&mut self, id: ThreadId) -> Result<ControlOutcome, Error> {
        self.ensure_enabled(id.0)?;
        self.with_thread(id.0, |driver, ctx| driver.start(ctx))
    }

    /// Stops a thread and waits for it to quiesce.
    #[tracing::instrument(skip(self))]
    pub fn thread_stop(&mut self, id: ThreadId) -> Result<(), Error> {
        self.ensure_enabled(id.0)?;
        self.with_thread(id.0, |driver, ctx| driver.stop(ctx))
    }

    /// Resets a quiesced thread.
    #[tracing::instrument(skip(self))]
    pub fn thread_sreset(&mut self, id: ThreadId) -> Result<ControlOutcome, Error> {
        self.ensure_enabled(id.0)?;
        self.with_thread(id.0, |driver, ctx| driver.sreset(ctx))
    }

    /// The RAM engine of an enabled thread.
    pub fn ram(&mut self, id: ThreadId) -> Result<&mut ThreadRam, Error> {
        let id = id.0;
        self.ensure_enabled(id)?;
        let path = self.path(id);

        match &mut self.targets[id.0].unit {
            Unit::Thread { thread, .. } => thread
                .ram
                .as_mut()
                .ok_or_else(|| TargetError::RamUnavailable { path }.into()),
            _ => Err(TargetError::RamUnavailable { path }.into()),
        }
    }

    /// Reads `ring_len` bits of ring `ring_addr` from an enabled chiplet.
    pub fn getring(
        &mut self,
        id: ChipletId,
        ring_addr: u64,
        ring_len: u64,
        result: &mut [u32],
    ) -> Result<(), Error> {
        let id = id.0;
        self.ensure_enabled(id)?;

        if (result.len() as u64) < ring_len.div_ceil(32) {
            return Err(TargetError::RingBufferTooSmall {
                ring_len,
                words: result.len(),
            }
            .into());
        }

        let (bus, translations) = self.route(id)?;
        let index = self.targets[id.0].index;
        let Unit::Chiplet { driver } = &self.targets[id.0].unit else {
            return Err(TargetError::WrongClass {
                path: self.path(id),
                expected: UnitClass::Chiplet,
                found: self.targets[id.0].class,
            }
            .into());
        };
        let driver = driver.clone();

        let mut ctx = ChipletContext {
            index,
            bus: ScopedBus::new(self.buses[bus].as_mut(), translations),
        };

        driver.getring(&mut ctx, ring_addr, ring_len, result)
    }
}
