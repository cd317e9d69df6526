//! Capabilities a hardware unit class can provide, and the state they act on.

use std::fmt;

use serde::Serialize;

use super::{Core, Thread};
use crate::bus::ScopedBus;
use crate::Error;

/// Whether a thread is executing or stopped in a power saving state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SleepState {
    /// Executing instructions.
    Run,
    /// In a stop state.
    Stop,
    /// Not observed yet.
    #[default]
    Unknown,
}

/// The simultaneous multithreading mode of the core a thread lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SmtState {
    /// Single threaded.
    Smt1,
    /// Two threads.
    Smt2,
    /// Four threads.
    Smt4,
    /// Not observed yet, or an encoding the hardware should never report.
    #[default]
    Unknown,
}

/// A snapshot of the state of one hardware thread.
///
/// The copy cached on a [`Thread`] is only refreshed by the control operations
/// and may be stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadState {
    /// Instruction execution is stopped and the thread is safe to inspect.
    pub quiesced: bool,
    /// The thread is enabled in the core.
    pub active: bool,
    /// Run or stop state.
    pub sleep_state: SleepState,
    /// SMT mode of the core.
    pub smt_state: SmtState,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} {:?}",
            if self.quiesced { "quiesced" } else { "running" },
            if self.active { "active" } else { "inactive" },
            self.sleep_state,
            self.smt_state
        )
    }
}

/// How a start or reset request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The control write was issued.
    Completed,
    /// The thread was not quiesced. Nothing was written.
    NotQuiesced,
}

/// What a thread driver gets to work with.
#[derive(Debug)]
pub struct ThreadContext<'a> {
    /// Position of the thread within its core.
    pub index: u32,
    /// The thread.
    pub thread: &'a mut Thread,
    /// The core the thread belongs to.
    pub core: &'a mut Core,
    /// The bus, translated into the address space of the core.
    pub bus: ScopedBus<'a>,
}

/// What a core driver gets to work with.
#[derive(Debug)]
pub struct CoreContext<'a> {
    /// Position of the core within its processor.
    pub index: u32,
    /// The core.
    pub core: &'a mut Core,
    /// The bus, translated into the address space of the core.
    pub bus: ScopedBus<'a>,
}

/// What a chiplet driver gets to work with.
#[derive(Debug)]
pub struct ChipletContext<'a> {
    /// Position of the chiplet within its processor.
    pub index: u32,
    /// The bus of the processor the chiplet lives on.
    pub bus: ScopedBus<'a>,
}

/// Run control of one hardware thread class.
pub trait ThreadControl: fmt::Debug + Send + Sync {
    /// Called once when the thread is probed.
    fn probe(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error>;

    /// Called once when the thread is released.
    fn release(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error>;

    /// Reads the current state from the hardware. The cached state is not touched.
    fn state(&self, ctx: &mut ThreadContext<'_>) -> Result<ThreadState, Error>;

    /// Resumes instruction execution.
    fn start(&self, ctx: &mut ThreadContext<'_>) -> Result<ControlOutcome, Error>;

    /// Stops instruction execution.
    fn stop(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error>;

    /// Issues a system reset to the thread.
    fn sreset(&self, ctx: &mut ThreadContext<'_>) -> Result<ControlOutcome, Error>;
}

/// Setup, teardown and address translation of one core class.
pub trait CoreControl: fmt::Debug + Send + Sync {
    /// Called once when the core is probed.
    fn probe(&self, ctx: &mut CoreContext<'_>) -> Result<(), Error>;

    /// Called once when the core is released, after all of its threads.
    fn release(&self, ctx: &mut CoreContext<'_>) -> Result<(), Error>;

    /// Maps a core relative bus address to the address of core `index`.
    fn translate(&self, index: u32, address: u64) -> u64;
}

/// Scan ring access of one chiplet class.
pub trait RingAccess: fmt::Debug + Send + Sync {
    /// Reads `ring_len` bits of the ring at `ring_addr` into `result`.
    ///
    /// `result` holds at least `ring_len` bits.
    fn getring(
        &self,
        ctx: &mut ChipletContext<'_>,
        ring_addr: u64,
        ring_len: u64,
        result: &mut [u32],
    ) -> Result<(), Error>;
}
