//! Topology description schema
//!
//! Before any register of a POWER processor can be touched over the debug bus,
//! the debugger needs to know which hardware units exist: processor modules,
//! the cores inside them, the hardware threads of each core and the chiplets
//! hanging off the processor. In powerdbg this layout is called the *topology*.
//!
//! This crate contains the schema structs for the YAML topology description
//! files, plus the timing parameters used by the hardware handshakes.
//!
#![warn(missing_docs)]

mod poll;
mod topology;

pub use poll::PollConfig;
pub use topology::{resolve_indexes, DescriptionError, TopologyDescription, UnitDescription, UnitStatus};

/// Compatibility strings of the hardware units known to powerdbg.
pub mod compatible {
    /// A processor module, the root of a chip's subtree.
    pub const PROC: &str = "ibm,power-proc";
    /// A POWER10 core.
    pub const POWER10_CORE: &str = "ibm,power10-core";
    /// A POWER10 hardware thread.
    pub const POWER10_THREAD: &str = "ibm,power10-thread";
}
