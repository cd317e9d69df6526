//! Register accessors built on the RAM sequencer.

use std::fmt;

use serde::Serialize;

use super::instruction::{ld, mfmsr, mfnia, mfocrf, mfspr, mtmsr, mtnia, mtocrf, mtspr};
use super::ram::{RamEngine, RamTransport};
use super::spr::{self, SCRATCH};
use super::PowerError;

/// Number of 4-bit fields in the condition register.
const CR_FIELDS: u8 = 8;

impl<T: RamTransport> RamEngine<T> {
    /// Reads general purpose register `gpr`.
    pub fn getgpr(&mut self, gpr: u8) -> Result<u64, PowerError> {
        let opcodes = [mtspr(SCRATCH, gpr)?];
        let mut results = [0];

        self.ram(&opcodes, &mut results)?;
        Ok(results[0])
    }

    /// Writes general purpose register `gpr`.
    pub fn putgpr(&mut self, gpr: u8, value: u64) -> Result<(), PowerError> {
        // r0 and r1 are overwritten by the restore at the end of every sequence.
        if gpr <= 1 {
            return self.put_saved_gpr(gpr, value);
        }

        let opcodes = [mfspr(gpr, SCRATCH)?];
        let mut results = [value];

        self.ram(&opcodes, &mut results)
    }

    /// Reads the next instruction address.
    pub fn getnia(&mut self) -> Result<u64, PowerError> {
        let opcodes = [mfnia(0)?, mtspr(SCRATCH, 0)?];
        let mut results = [0, 0];

        self.ram(&opcodes, &mut results)?;
        Ok(results[1])
    }

    /// Writes the next instruction address.
    ///
    /// Some generations can only `mtnia` from the link register, others from
    /// r0, so the value is staged through both. The link register is saved in
    /// r1 and put back afterwards.
    pub fn putnia(&mut self, value: u64) -> Result<(), PowerError> {
        let opcodes = [
            mfspr(1, spr::LR)?, // mflr r1
            mfspr(0, SCRATCH)?, // value -> r0
            mtspr(spr::LR, 0)?, // mtlr r0
            mtnia(0)?,
            mtspr(spr::LR, 1)?, // mtlr r1
        ];
        let mut results = [0, value, 0, 0, 0];

        self.ram(&opcodes, &mut results)
    }

    /// Reads special purpose register `spr`.
    pub fn getspr(&mut self, spr: u16) -> Result<u64, PowerError> {
        let opcodes = [mfspr(0, spr)?, mtspr(SCRATCH, 0)?];
        let mut results = [0, 0];

        self.ram(&opcodes, &mut results)?;
        Ok(results[1])
    }

    /// Writes special purpose register `spr`.
    pub fn putspr(&mut self, spr: u16, value: u64) -> Result<(), PowerError> {
        let opcodes = [mfspr(0, SCRATCH)?, mtspr(spr, 0)?];
        let mut results = [value, 0];

        self.ram(&opcodes, &mut results)
    }

    /// Reads the machine state register.
    pub fn getmsr(&mut self) -> Result<u64, PowerError> {
        let opcodes = [mfmsr(0)?, mtspr(SCRATCH, 0)?];
        let mut results = [0, 0];

        self.ram(&opcodes, &mut results)?;
        Ok(results[1])
    }

    /// Writes the machine state register.
    pub fn putmsr(&mut self, value: u64) -> Result<(), PowerError> {
        let opcodes = [mfspr(0, SCRATCH)?, mtmsr(0)?];
        let mut results = [value, 0];

        self.ram(&opcodes, &mut results)
    }

    /// Reads the condition register, one field at a time.
    pub fn getcr(&mut self) -> Result<u32, PowerError> {
        let mut opcodes = Vec::with_capacity(2 * usize::from(CR_FIELDS));
        for field in 0..CR_FIELDS {
            opcodes.push(mfocrf(0, field)?);
            opcodes.push(mtspr(SCRATCH, 0)?);
        }
        let mut results = vec![0; opcodes.len()];

        self.ram(&opcodes, &mut results)?;

        // Bits outside the requested field are not guaranteed to be zero.
        let cr = results
            .iter()
            .skip(1)
            .step_by(2)
            .enumerate()
            .fold(0, |cr, (field, &value)| {
                cr | ((value as u32) & (0xf << (4 * field)))
            });

        Ok(cr)
    }

    /// Writes the condition register.
    pub fn putcr(&mut self, value: u32) -> Result<(), PowerError> {
        let mut opcodes = vec![mfspr(0, SCRATCH)?];
        for field in 0..CR_FIELDS {
            opcodes.push(mtocrf(field, 0)?);
        }
        let mut results = vec![0; opcodes.len()];
        results[0] = u64::from(value);

        self.ram(&opcodes, &mut results)
    }

    /// Reads the doubleword at effective address `address` with a real load.
    pub fn getmem(&mut self, address: u64) -> Result<u64, PowerError> {
        let opcodes = [mfspr(0, SCRATCH)?, mfspr(1, SCRATCH)?, ld(0, 0, 1)?, mtspr(SCRATCH, 0)?];
        let mut results = [0xdead_dead_dead_dead, address, 0, 0];

        self.ram(&opcodes, &mut results)?;
        Ok(results[3])
    }

    /// Reads every register of interest under a single RAM session.
    ///
    /// The first failing read aborts the snapshot. A session opened here is
    /// closed either way; an already open session is left to its owner.
    pub fn getregs(&mut self) -> Result<ThreadRegisters, PowerError> {
        if self.is_setup() {
            return self.read_all();
        }

        self.setup()?;

        let regs = self.read_all();
        let teardown = self.destroy();
        let regs = regs?;
        teardown?;

        Ok(regs)
    }

    fn read_all(&mut self) -> Result<ThreadRegisters, PowerError> {
        let nia = self.getnia()?;
        let cfar = self.getspr(spr::CFAR)?;
        let msr = self.getmsr()?;
        let lr = self.getspr(spr::LR)?;
        let ctr = self.getspr(spr::CTR)?;
        let tar = self.getspr(spr::TAR)?;
        let cr = self.getcr()?;
        let xer = self.transport_mut().get_xer()?;

        let mut gprs = [0; 32];
        for (gpr, value) in (0..).zip(gprs.iter_mut()) {
            *value = self.getgpr(gpr)?;
        }

        Ok(ThreadRegisters {
            nia,
            cfar,
            msr,
            lr,
            ctr,
            tar,
            cr,
            xer,
            gprs,
            lpcr: self.getspr(spr::LPCR)?,
            ptcr: self.getspr(spr::PTCR)?,
            lpidr: self.getspr(spr::LPIDR)?,
            pidr: self.getspr(spr::PIDR)?,
            hfscr: self.getspr(spr::HFSCR)?,
            hdsisr: self.getspr(spr::HDSISR)? as u32,
            hdar: self.getspr(spr::HDAR)?,
            heir: self.getspr(spr::HEIR)? as u32,
            hid: self.getspr(spr::HID)?,
            hsrr0: self.getspr(spr::HSRR0)?,
            hsrr1: self.getspr(spr::HSRR1)?,
            hdec: self.getspr(spr::HDEC)?,
            hsprg0: self.getspr(spr::HSPRG0)?,
            hsprg1: self.getspr(spr::HSPRG1)?,
            fscr: self.getspr(spr::FSCR)?,
            dsisr: self.getspr(spr::DSISR)? as u32,
            dar: self.getspr(spr::DAR)?,
            srr0: self.getspr(spr::SRR0)?,
            srr1: self.getspr(spr::SRR1)?,
            dec: self.getspr(spr::DEC)?,
            tb: self.getspr(spr::TB)?,
            sprg0: self.getspr(spr::SPRG0)?,
            sprg1: self.getspr(spr::SPRG1)?,
            sprg2: self.getspr(spr::SPRG2)?,
            sprg3: self.getspr(spr::SPRG3)?,
            ppr: self.getspr(spr::PPR)?,
        })
    }
}

/// A snapshot of the architected state of one hardware thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadRegisters {
    /// Next instruction address.
    pub nia: u64,
    /// Come-from address register.
    pub cfar: u64,
    /// Machine state register.
    pub msr: u64,
    /// Link register.
    pub lr: u64,
    /// Count register.
    pub ctr: u64,
    /// Target address register.
    pub tar: u64,
    /// Condition register.
    pub cr: u32,
    /// Fixed-point exception register.
    pub xer: u64,
    /// General purpose registers.
    pub gprs: [u64; 32],

    /// Logical partitioning control register.
    pub lpcr: u64,
    /// Partition table control register.
    pub ptcr: u64,
    /// Logical partition ID register.
    pub lpidr: u64,
    /// Process ID register.
    pub pidr: u64,
    /// Hypervisor facility status and control register.
    pub hfscr: u64,
    /// Hypervisor data storage interrupt status register.
    pub hdsisr: u32,
    /// Hypervisor data address register.
    pub hdar: u64,
    /// Hypervisor emulation instruction register.
    pub heir: u32,
    /// Hardware implementation dependent register.
    pub hid: u64,
    /// Hypervisor save/restore register 0.
    pub hsrr0: u64,
    /// Hypervisor save/restore register 1.
    pub hsrr1: u64,
    /// Hypervisor decrementer.
    pub hdec: u64,
    /// Hypervisor software use register 0.
    pub hsprg0: u64,
    /// Hypervisor software use register 1.
    pub hsprg1: u64,
    /// Facility status and control register.
    pub fscr: u64,
    /// Data storage interrupt status register.
    pub dsisr: u32,
    /// Data address register.
    pub dar: u64,
    /// Save/restore register 0.
    pub srr0: u64,
    /// Save/restore register 1.
    pub srr1: u64,
    /// Decrementer.
    pub dec: u64,
    /// Time base.
    pub tb: u64,
    /// Software use register 0.
    pub sprg0: u64,
    /// Software use register 1.
    pub sprg1: u64,
    /// Software use register 2.
    pub sprg2: u64,
    /// Software use register 3.
    pub sprg3: u64,
    /// Program priority register.
    pub ppr: u64,
}

impl fmt::Display for ThreadRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NIA   : {:#018x}", self.nia)?;
        writeln!(f, "CFAR  : {:#018x}", self.cfar)?;
        writeln!(f, "MSR   : {:#018x}", self.msr)?;
        writeln!(f, "LR    : {:#018x}", self.lr)?;
        writeln!(f, "CTR   : {:#018x}", self.ctr)?;
        writeln!(f, "TAR   : {:#018x}", self.tar)?;
        writeln!(f, "CR    : {:#010x}", self.cr)?;
        writeln!(f, "XER   : {:#018x}", self.xer)?;
        write!(f, "GPRS  :")?;
        for (i, gpr) in self.gprs.iter().enumerate() {
            if i % 4 == 0 {
                writeln!(f)?;
            }
            write!(f, " r{:<2} {:#018x}", i, gpr)?;
        }
        writeln!(f)?;

        let sprs: [(&str, u64); 26] = [
            ("LPCR", self.lpcr),
            ("PTCR", self.ptcr),
            ("LPIDR", self.lpidr),
            ("PIDR", self.pidr),
            ("HFSCR", self.hfscr),
            ("HDSISR", self.hdsisr.into()),
            ("HDAR", self.hdar),
            ("HEIR", self.heir.into()),
            ("HID", self.hid),
            ("HSRR0", self.hsrr0),
            ("HSRR1", self.hsrr1),
            ("HDEC", self.hdec),
            ("HSPRG0", self.hsprg0),
            ("HSPRG1", self.hsprg1),
            ("FSCR", self.fscr),
            ("DSISR", self.dsisr.into()),
            ("DAR", self.dar),
            ("SRR0", self.srr0),
            ("SRR1", self.srr1),
            ("DEC", self.dec),
            ("TB", self.tb),
            ("SPRG0", self.sprg0),
            ("SPRG1", self.sprg1),
            ("SPRG2", self.sprg2),
            ("SPRG3", self.sprg3),
            ("PPR", self.ppr),
        ];
        for (name, value) in sprs {
            writeln!(f, "{:<6}: {:#018x}", name, value)?;
        }

        Ok(())
    }
}
