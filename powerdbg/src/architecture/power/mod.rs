//! POWER (ppc64) support.
//!
//! Architected state of a stopped hardware thread is reached by *ramming*:
//! single instructions are fed to the thread through the debug bus and their
//! results are observed in one scratch special purpose register.

pub(crate) mod fake_ram;
pub mod instruction;
pub mod p10;
mod ram;
mod registers;

pub use ram::{RamEngine, RamOutcome, RamTransport};
pub use registers::ThreadRegisters;

use crate::bus::BusError;

/// Errors raised while injecting instructions into a POWER thread.
#[derive(thiserror::Error, Debug)]
pub enum PowerError {
    /// A general purpose register number outside 0..=31.
    #[error("Invalid general purpose register r{0}")]
    InvalidGpr(u8),
    /// A special purpose register number outside 0..=1023.
    #[error("Invalid special purpose register {0}")]
    InvalidSpr(u16),
    /// A condition register field outside 0..=7.
    #[error("Invalid condition register field {0}")]
    InvalidCrField(u8),
    /// A load displacement that does not fit the DS field.
    #[error("Invalid load displacement {0:#x}")]
    InvalidDisplacement(u16),
    /// The opcode and result lists of a RAM sequence differ in length.
    #[error("{opcodes} opcodes were given with {results} result slots")]
    LengthMismatch {
        /// Number of opcodes.
        opcodes: usize,
        /// Number of result slots.
        results: usize,
    },
    /// Reported by a [`RamTransport`] when the injected instruction took an exception.
    #[error("The injected instruction took an exception")]
    Exception,
    /// A register access sequence was cut short by an exception.
    #[error("Instruction {index} of the RAM sequence took an exception")]
    SequenceException {
        /// Position of the faulting opcode in the sequence.
        index: usize,
    },
    /// The transport to the thread failed.
    #[error("Transport error while ramming instructions")]
    Bus(#[from] BusError),
}

/// Special purpose register numbers.
pub mod spr {
    /// Fixed-point exception register.
    pub const XER: u16 = 1;
    /// Link register.
    pub const LR: u16 = 8;
    /// Count register.
    pub const CTR: u16 = 9;
    /// Data storage interrupt status register.
    pub const DSISR: u16 = 18;
    /// Data address register.
    pub const DAR: u16 = 19;
    /// Decrementer.
    pub const DEC: u16 = 22;
    /// Machine status save/restore register 0.
    pub const SRR0: u16 = 26;
    /// Machine status save/restore register 1.
    pub const SRR1: u16 = 27;
    /// Come-from address register.
    pub const CFAR: u16 = 28;
    /// Process ID register.
    pub const PIDR: u16 = 48;
    /// Facility status and control register.
    pub const FSCR: u16 = 153;
    /// Hypervisor facility status and control register.
    pub const HFSCR: u16 = 190;
    /// Time base, read only.
    pub const TB: u16 = 268;
    /// Software use register 0.
    pub const SPRG0: u16 = 272;
    /// Software use register 1.
    pub const SPRG1: u16 = 273;
    /// Software use register 2.
    pub const SPRG2: u16 = 274;
    /// Software use register 3.
    pub const SPRG3: u16 = 275;
    /// Scratch register used to move values in and out of a thread in RAM mode.
    pub const SCRATCH: u16 = 277;
    /// Hypervisor software use register 0.
    pub const HSPRG0: u16 = 304;
    /// Hypervisor software use register 1.
    pub const HSPRG1: u16 = 305;
    /// Hypervisor data storage interrupt status register.
    pub const HDSISR: u16 = 306;
    /// Hypervisor data address register.
    pub const HDAR: u16 = 307;
    /// Hypervisor decrementer.
    pub const HDEC: u16 = 310;
    /// Hypervisor save/restore register 0.
    pub const HSRR0: u16 = 314;
    /// Hypervisor save/restore register 1.
    pub const HSRR1: u16 = 315;
    /// Logical partitioning control register.
    pub const LPCR: u16 = 318;
    /// Logical partition ID register.
    pub const LPIDR: u16 = 319;
    /// Hypervisor emulation instruction register.
    pub const HEIR: u16 = 339;
    /// Partition table control register.
    pub const PTCR: u16 = 464;
    /// Target address register.
    pub const TAR: u16 = 815;
    /// Program priority register.
    pub const PPR: u16 = 896;
    /// Hardware implementation dependent register.
    pub const HID: u16 = 1008;
}
