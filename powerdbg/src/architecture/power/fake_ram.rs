#![allow(missing_docs)] // Don't require docs for test code
use std::collections::BTreeMap;

use anyhow::anyhow;

use super::instruction::{MFNIA_OPCODE, MTNIA_OPCODE};
use super::ram::RamTransport;
use super::spr::{LR, SCRATCH};
use super::PowerError;
use crate::bus::BusError;

/// A recorded RAM transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamOperation {
    Setup,
    Instruction { opcode: u32, scratch: u64 },
    Destroy,
}

/// A mock RAM transport backed by a simulated register file.
///
/// It understands exactly the instructions produced by
/// [`instruction`](super::instruction). Anything else takes an exception.
/// `mtnia` loads the next instruction address from the link register.
#[derive(Debug, Clone, Default)]
pub struct FakeRam {
    pub gprs: [u64; 32],
    pub sprs: BTreeMap<u16, u64>,
    pub msr: u64,
    pub nia: u64,
    pub cr: u32,
    pub xer: u64,
    pub memory: BTreeMap<u64, u64>,

    session_open: bool,
    executed: usize,
    fail_at: Option<usize>,
    unreachable_at: Option<usize>,
    fail_destroy: bool,
    cr_garbage: bool,
    operations: Vec<RamOperation>,
}

impl FakeRam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th injected instruction (counting from zero, over the
    /// lifetime of the transport) take an exception.
    pub fn fail_instruction(&mut self, n: usize) {
        self.fail_at = Some(n);
    }

    /// Makes the `n`th injected instruction fail on the bus, as if the thread
    /// became unreachable.
    pub fn fail_transport(&mut self, n: usize) {
        self.unreachable_at = Some(n);
    }

    /// Makes closing the RAM session fail.
    pub fn fail_destroy(&mut self) {
        self.fail_destroy = true;
    }

    /// Fills the bits outside the requested field with junk on every `mfocrf`.
    pub fn with_cr_garbage(mut self) -> Self {
        self.cr_garbage = true;
        self
    }

    pub fn spr(&self, spr: u16) -> u64 {
        self.sprs.get(&spr).copied().unwrap_or(0)
    }

    pub fn set_spr(&mut self, spr: u16, value: u64) {
        self.sprs.insert(spr, value);
    }

    pub fn operations(&self) -> Vec<RamOperation> {
        self.operations.clone()
    }

    /// The opcodes of every injected instruction, in order.
    pub fn instructions(&self) -> Vec<u32> {
        self.operations
            .iter()
            .filter_map(|operation| match operation {
                RamOperation::Instruction { opcode, .. } => Some(*opcode),
                _ => None,
            })
            .collect()
    }

    fn execute(&mut self, opcode: u32) -> Result<(), PowerError> {
        let rt = ((opcode >> 21) & 0x1f) as usize;

        match opcode >> 26 {
            0 => match opcode & !(0x1f << 21) {
                MFNIA_OPCODE => self.gprs[rt] = self.nia,
                MTNIA_OPCODE => self.nia = self.spr(LR),
                _ => return Err(PowerError::Exception),
            },
            31 => {
                let spr = (((opcode >> 16) & 0x1f) | ((opcode >> 11) & 0x1f) << 5) as u16;
                let field = ((opcode >> 12) & 0xff).trailing_zeros();
                let field_mask = 0xfu32.checked_shl(4 * field).unwrap_or(0);

                match (opcode >> 1) & 0x3ff {
                    339 => self.gprs[rt] = self.spr(spr),
                    467 => self.set_spr(spr, self.gprs[rt]),
                    19 => {
                        let junk = if self.cr_garbage {
                            0xdead_beef_dead_beef & !u64::from(field_mask)
                        } else {
                            0
                        };
                        self.gprs[rt] = u64::from(self.cr & field_mask) | junk;
                    }
                    144 => {
                        self.cr = (self.cr & !field_mask) | (self.gprs[rt] as u32 & field_mask);
                    }
                    83 => self.gprs[rt] = self.msr,
                    178 => self.msr = self.gprs[rt],
                    _ => return Err(PowerError::Exception),
                }
            }
            58 => {
                let ra = ((opcode >> 16) & 0x1f) as usize;
                let ds = u64::from((opcode >> 2) & 0x3fff);
                let address = self.gprs[ra].wrapping_add(ds << 2);
                self.gprs[rt] = *self.memory.get(&address).ok_or(PowerError::Exception)?;
            }
            _ => return Err(PowerError::Exception),
        }

        Ok(())
    }
}

impl RamTransport for FakeRam {
    fn ram_setup(&mut self) -> Result<(), PowerError> {
        self.operations.push(RamOperation::Setup);
        if self.session_open {
            return Err(BusError::Other(anyhow!("RAM mode is already active")).into());
        }
        self.session_open = true;
        Ok(())
    }

    fn ram_instruction(&mut self, opcode: u32, scratch: &mut u64) -> Result<(), PowerError> {
        self.operations.push(RamOperation::Instruction {
            opcode,
            scratch: *scratch,
        });

        let n = self.executed;
        self.executed += 1;

        if !self.session_open {
            return Err(BusError::Other(anyhow!("RAM mode is not active")).into());
        }
        if self.fail_at == Some(n) {
            return Err(PowerError::Exception);
        }
        if self.unreachable_at == Some(n) {
            return Err(BusError::Unreachable.into());
        }

        self.set_spr(SCRATCH, *scratch);
        self.execute(opcode)?;
        *scratch = self.spr(SCRATCH);

        Ok(())
    }

    fn ram_destroy(&mut self) -> Result<(), PowerError> {
        self.operations.push(RamOperation::Destroy);
        self.session_open = false;
        if self.fail_destroy {
            return Err(BusError::Unreachable.into());
        }
        Ok(())
    }

    fn get_xer(&mut self) -> Result<u64, PowerError> {
        if !self.session_open {
            return Err(BusError::Other(anyhow!("RAM mode is not active")).into());
        }
        Ok(self.xer)
    }
}
