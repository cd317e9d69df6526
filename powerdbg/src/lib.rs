//! # Out-of-band debugging for POWER processors
//!
//! powerdbg talks to POWER processors through their debug bus while the
//! software running on them is stopped or oblivious. It can
//!
//! - read and write the architected registers of a quiesced hardware thread
//!   by injecting single instructions into it ("ramming"),
//! - stop, start and reset threads and keep their cores awake while doing so,
//! - send commands to the self boot engine over the SBEFIFO.
//!
//! # Example
//!
//! ```no_run
//! # use powerdbg::Error;
//! use powerdbg::target::{HwUnitRegistry, TargetTree, UnitClass};
//! use powerdbg_target::TopologyDescription;
//! # fn backend() -> Box<dyn powerdbg::target::SystemBackend> { unimplemented!() }
//!
//! let description = TopologyDescription::power10("p10", 1, &[0, 1], 4);
//! let registry = HwUnitRegistry::builtin(description.poll);
//! let mut tree = TargetTree::build(&description, &registry, backend().as_mut())?;
//! tree.probe_all()?;
//!
//! for id in tree.targets_of_class(UnitClass::Thread) {
//!     let thread = tree.as_thread(id)?;
//!     tree.thread_stop(thread)?;
//!     let registers = tree.ram(thread)?.getregs()?;
//!     println!("{}:\n{}", tree.path(thread), registers);
//! }
//!
//! tree.release_all()?;
//! # Ok::<(), Error>(())
//! ```

#[warn(missing_docs)]
pub mod architecture;
mod bits;
#[warn(missing_docs)]
mod bus;
mod error;
#[warn(missing_docs)]
pub mod sbefifo;
#[warn(missing_docs)]
pub mod target;

pub use crate::bits::{get_field, ppc_bit, ppc_bitmask, set_field};
pub use crate::bus::{fake_bus::FakeBus, BusAccess, BusError, ScopedBus};
pub use crate::error::Error;
pub use crate::architecture::power::{
    fake_ram::FakeRam, PowerError, RamEngine, RamOutcome, RamTransport, ThreadRegisters,
};
pub use crate::target::{fake_system::FakeSystem, TargetError, TargetTree};

// Exports only used in tests
#[cfg(feature = "test")]
pub use crate::architecture::power::fake_ram::RamOperation;
#[cfg(feature = "test")]
pub use crate::bus::fake_bus::Operation as BusOperation;
