//! Bit helpers for the big-endian (IBM) bit numbering used by POWER registers.
//!
//! Bit 0 is the most significant bit of a 64-bit register.

/// The mask for bit `bit`, counted from the most significant end.
pub const fn ppc_bit(bit: u32) -> u64 {
    1 << (63 - bit)
}

/// The mask covering bits `from..=to`, counted from the most significant end.
pub const fn ppc_bitmask(from: u32, to: u32) -> u64 {
    (u64::MAX >> from) & (u64::MAX << (63 - to))
}

/// Extracts the field selected by `mask` from `value`, shifted down to bit 0.
pub const fn get_field(mask: u64, value: u64) -> u64 {
    (value & mask) >> mask.trailing_zeros()
}

/// Replaces the field selected by `mask` in `value` with `field`.
pub const fn set_field(mask: u64, value: u64, field: u64) -> u64 {
    (value & !mask) | ((field << mask.trailing_zeros()) & mask)
}
