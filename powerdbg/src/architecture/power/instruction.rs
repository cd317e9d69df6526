//! Encoders for the handful of POWER instructions used to reach architected state.
//!
//! Only the register moves needed by the RAM engine are covered. Every encoder
//! checks its operands and rejects anything that would not fit its field.

use super::PowerError;

/// `mtnia`, RAM mode only.
pub const MTNIA_OPCODE: u32 = 0x0000_0002;
/// `mfnia`, RAM mode only.
pub const MFNIA_OPCODE: u32 = 0x0000_0004;
/// `mfmsr`.
pub const MFMSR_OPCODE: u32 = 0x7c00_00a6;
/// `mtmsrd`.
pub const MTMSR_OPCODE: u32 = 0x7c00_0164;
/// `mfspr`.
pub const MFSPR_OPCODE: u32 = 0x7c00_02a6;
/// `mtspr`.
pub const MTSPR_OPCODE: u32 = 0x7c00_03a6;
/// `mfocrf`.
pub const MFOCRF_OPCODE: u32 = 0x7c10_0026;
/// `mtocrf`.
pub const MTOCRF_OPCODE: u32 = 0x7c10_0120;
/// `ld`.
pub const LD_OPCODE: u32 = 0xe800_0000;

const MAX_GPR: u8 = 31;
const MAX_SPR: u16 = 1023;
const MAX_CR_FIELD: u8 = 7;
const MAX_DS: u16 = 0x3fff;

fn gpr(reg: u8) -> Result<u32, PowerError> {
    if reg > MAX_GPR {
        return Err(PowerError::InvalidGpr(reg));
    }
    Ok(u32::from(reg))
}

/// The SPR number with its two 5-bit halves swapped, as the `spr` field wants it.
fn spr_field(spr: u16) -> Result<u32, PowerError> {
    if spr > MAX_SPR {
        return Err(PowerError::InvalidSpr(spr));
    }
    let spr = u32::from(spr);
    Ok(((spr & 0x1f) << 16) | ((spr & 0x3e0) << 6))
}

/// Field mask bit for CR field `cr`.
fn cr_field(cr: u8) -> Result<u32, PowerError> {
    if cr > MAX_CR_FIELD {
        return Err(PowerError::InvalidCrField(cr));
    }
    Ok(1 << (12 + u32::from(cr)))
}

/// `mfspr reg, spr`
pub fn mfspr(reg: u8, spr: u16) -> Result<u32, PowerError> {
    Ok(MFSPR_OPCODE | gpr(reg)? << 21 | spr_field(spr)?)
}

/// `mtspr spr, reg`
pub fn mtspr(spr: u16, reg: u8) -> Result<u32, PowerError> {
    Ok(MTSPR_OPCODE | gpr(reg)? << 21 | spr_field(spr)?)
}

/// `mfocrf reg, cr`: copies one condition register field into `reg`.
///
/// Bits of `reg` outside the field are undefined.
pub fn mfocrf(reg: u8, cr: u8) -> Result<u32, PowerError> {
    Ok(MFOCRF_OPCODE | gpr(reg)? << 21 | cr_field(cr)?)
}

/// `mtocrf cr, reg`: copies the bits of field `cr` from `reg` into the condition register.
pub fn mtocrf(cr: u8, reg: u8) -> Result<u32, PowerError> {
    Ok(MTOCRF_OPCODE | gpr(reg)? << 21 | cr_field(cr)?)
}

/// Moves the next instruction address into `reg`. Only valid in RAM mode.
pub fn mfnia(reg: u8) -> Result<u32, PowerError> {
    Ok(MFNIA_OPCODE | gpr(reg)? << 21)
}

/// Sets the next instruction address. Only valid in RAM mode.
pub fn mtnia(reg: u8) -> Result<u32, PowerError> {
    Ok(MTNIA_OPCODE | gpr(reg)? << 21)
}

/// `mfmsr reg`
pub fn mfmsr(reg: u8) -> Result<u32, PowerError> {
    Ok(MFMSR_OPCODE | gpr(reg)? << 21)
}

/// `mtmsrd reg`
pub fn mtmsr(reg: u8) -> Result<u32, PowerError> {
    Ok(MTMSR_OPCODE | gpr(reg)? << 21)
}

/// `ld rt, ds(ra)`, where `ds` is the word scaled displacement.
pub fn ld(rt: u8, ds: u16, ra: u8) -> Result<u32, PowerError> {
    if ds > MAX_DS {
        return Err(PowerError::InvalidDisplacement(ds));
    }
    Ok(LD_OPCODE | gpr(rt)? << 21 | gpr(ra)? << 16 | u32::from(ds) << 2)
}
