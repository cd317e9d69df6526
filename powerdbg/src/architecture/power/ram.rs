//! The RAM sequencer.

use std::fmt;

use super::instruction::{mfspr, mtspr};
use super::spr::SCRATCH;
use super::PowerError;

/// The per-thread hooks the RAM sequencer drives.
///
/// Implementations move one opcode and the scratch register value to the
/// thread, let it execute the opcode and hand back the updated scratch value.
pub trait RamTransport: fmt::Debug + Send {
    /// Puts the thread into RAM mode.
    fn ram_setup(&mut self) -> Result<(), PowerError>;

    /// Executes `opcode` with `scratch` loaded into the scratch register, then
    /// stores the scratch register back into `scratch`.
    ///
    /// Returns [`PowerError::Exception`] if the instruction took an exception.
    fn ram_instruction(&mut self, opcode: u32, scratch: &mut u64) -> Result<(), PowerError>;

    /// Takes the thread out of RAM mode.
    fn ram_destroy(&mut self) -> Result<(), PowerError>;

    /// Reads the fixed-point exception register.
    ///
    /// XER cannot be rammed reliably on every generation, so the transport
    /// provides it.
    fn get_xer(&mut self) -> Result<u64, PowerError>;
}

impl<T: RamTransport + ?Sized> RamTransport for Box<T> {
    fn ram_setup(&mut self) -> Result<(), PowerError> {
        (**self).ram_setup()
    }

    fn ram_instruction(&mut self, opcode: u32, scratch: &mut u64) -> Result<(), PowerError> {
        (**self).ram_instruction(opcode, scratch)
    }

    fn ram_destroy(&mut self) -> Result<(), PowerError> {
        (**self).ram_destroy()
    }

    fn get_xer(&mut self) -> Result<u64, PowerError> {
        (**self).get_xer()
    }
}

/// How a RAM sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamOutcome {
    /// Every opcode executed.
    Completed,
    /// The opcode at `index` took an exception. Results before `index` are valid,
    /// the remaining opcodes were skipped.
    Exception {
        /// Position of the faulting opcode.
        index: usize,
    },
}

/// Instruction injection into one hardware thread.
///
/// Only r0 and r1 are saved and restored around a sequence, so opcode
/// sequences must not touch any other general purpose register.
///
/// All methods take `&mut self`: a thread can only run one sequence at a time.
#[derive(Debug)]
pub struct RamEngine<T> {
    transport: T,
    ram_is_setup: bool,
}

impl<T: RamTransport> RamEngine<T> {
    /// Creates an engine with no RAM session open.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            ram_is_setup: false,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether a RAM session is currently open.
    pub fn is_setup(&self) -> bool {
        self.ram_is_setup
    }

    /// Opens a RAM session explicitly.
    ///
    /// Sequences executed while the session is open do not open and close
    /// their own, which saves two transport round-trips per access.
    pub fn setup(&mut self) -> Result<(), PowerError> {
        self.transport.ram_setup()?;
        self.ram_is_setup = true;
        Ok(())
    }

    /// Closes the RAM session.
    pub fn destroy(&mut self) -> Result<(), PowerError> {
        self.ram_is_setup = false;
        self.transport.ram_destroy()
    }

    fn ram_instruction(&mut self, opcode: u32, scratch: &mut u64) -> Result<(), PowerError> {
        tracing::trace!("ram {:#010x} scratch={:#018x}", opcode, scratch);
        self.transport.ram_instruction(opcode, scratch)
    }

    /// Executes `opcodes` one at a time.
    ///
    /// `results[i]` is loaded into the scratch register before `opcodes[i]` runs
    /// and receives the scratch register afterwards, so it serves as both the
    /// input and the output of that step. r1 and r0 are saved before the first
    /// opcode and restored after the last one, even when an opcode took an
    /// exception.
    pub fn execute(&mut self, opcodes: &[u32], results: &mut [u64]) -> Result<RamOutcome, PowerError> {
        self.execute_with(opcodes, results, [None, None])
    }

    /// Like [`execute`](Self::execute), but r0 and r1 are restored to the
    /// given values instead of their saved ones where `restore` says so.
    fn execute_with(
        &mut self,
        opcodes: &[u32],
        results: &mut [u64],
        restore: [Option<u64>; 2],
    ) -> Result<RamOutcome, PowerError> {
        if opcodes.len() != results.len() {
            return Err(PowerError::LengthMismatch {
                opcodes: opcodes.len(),
                results: results.len(),
            });
        }

        let did_setup = if self.ram_is_setup {
            false
        } else {
            self.setup()?;
            true
        };

        let outcome = self.execute_bracketed(opcodes, results, restore);

        if did_setup {
            let teardown = self.destroy();
            let outcome = outcome?;
            teardown?;
            return Ok(outcome);
        }

        outcome
    }

    fn execute_bracketed(
        &mut self,
        opcodes: &[u32],
        results: &mut [u64],
        restore: [Option<u64>; 2],
    ) -> Result<RamOutcome, PowerError> {
        let mut r1 = 0;
        self.ram_instruction(mtspr(SCRATCH, 1)?, &mut r1)?;
        let mut r0 = 0;
        self.ram_instruction(mtspr(SCRATCH, 0)?, &mut r0)?;

        let [restore_r0, restore_r1] = restore;
        r0 = restore_r0.unwrap_or(r0);
        r1 = restore_r1.unwrap_or(r1);

        let mut outcome = RamOutcome::Completed;
        let mut failure = None;

        for (index, (&opcode, result)) in opcodes.iter().zip(results.iter_mut()).enumerate() {
            let mut scratch = *result;

            match self.ram_instruction(opcode, &mut scratch) {
                Ok(()) => *result = scratch,
                Err(PowerError::Exception) => {
                    tracing::debug!("exception at opcode {} ({:#010x})", index, opcode);
                    outcome = RamOutcome::Exception { index };
                    break;
                }
                Err(error) => {
                    tracing::debug!("transport failed at opcode {} ({:#010x})", index, opcode);
                    failure = Some(error);
                    break;
                }
            }
        }

        self.ram_instruction(mfspr(0, SCRATCH)?, &mut r0)?;
        self.ram_instruction(mfspr(1, SCRATCH)?, &mut r1)?;

        match failure {
            Some(error) => Err(error),
            None => Ok(outcome),
        }
    }

    /// Runs a fixed register access sequence, treating an exception as an error.
    pub(super) fn ram(&mut self, opcodes: &[u32], results: &mut [u64]) -> Result<(), PowerError> {
        match self.execute(opcodes, results)? {
            RamOutcome::Completed => Ok(()),
            RamOutcome::Exception { index } => Err(PowerError::SequenceException { index }),
        }
    }

    /// Sets r0 or r1, which can only be done through the restore steps.
    pub(super) fn put_saved_gpr(&mut self, gpr: u8, value: u64) -> Result<(), PowerError> {
        let restore = match gpr {
            0 => [Some(value), None],
            1 => [None, Some(value)],
            _ => return Err(PowerError::InvalidGpr(gpr)),
        };

        match self.execute_with(&[], &mut [], restore)? {
            RamOutcome::Completed => Ok(()),
            RamOutcome::Exception { index } => Err(PowerError::SequenceException { index }),
        }
    }
}
