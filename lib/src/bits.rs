// SPDX-FileCopyrightText: 2024 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Bit fields of CP0 registers and raw page-table entries.
//!
//! Registers are held as [prim@u64] values. A field is addressed by its
//! lowest bit and its width, the order in which the register layouts list
//! them.

use std::fmt;

/// Field access on [prim@u64] values
pub mod field {
    use super::ones;

    /// Mask covering `width` bits from bit `offset`. Bits past the top of
    /// the value are dropped.
    #[inline(always)]
    pub const fn mask(offset: u32, width: u32) -> u64 {
        if offset >= 64 {
            return 0;
        }
        ones(width as u64) << offset
    }

    /// Whether bit `index` of `value` is set
    #[inline(always)]
    pub const fn bit(value: u64, index: u32) -> bool {
        index < 64 && (value >> index) & 1 == 1
    }

    /// The `width` bits of `value` from bit `offset`, moved down to bit 0.
    /// Widths and offsets come from guest registers, so out-of-range values
    /// saturate.
    #[inline(always)]
    pub const fn extract(value: u64, offset: u32, width: u32) -> u64 {
        (value & mask(offset, width)) >> if offset >= 64 { 0 } else { offset }
    }

    /// Replace the `width` bits of `value` from bit `offset` with the low
    /// bits of `bits`.
    #[inline(always)]
    pub const fn insert(value: u64, offset: u32, width: u32, bits: u64) -> u64 {
        let mask = mask(offset, width);
        if offset >= 64 {
            return value;
        }
        (value & !mask) | ((bits << offset) & mask)
    }
}

/// A register field type with a fixed width in bits
pub trait Bits64 {
    const WIDTH: usize;

    /// Decode the low `WIDTH` bits of `value`.
    fn from_bits(value: u64) -> Self;

    /// Encode into the low `WIDTH` bits.
    fn to_bits(&self) -> u64;
}

impl Bits64 for bool {
    const WIDTH: usize = 1;

    #[inline(always)]
    fn from_bits(value: u64) -> Self {
        field::bit(value, 0)
    }

    #[inline(always)]
    fn to_bits(&self) -> u64 {
        *self as u64
    }
}

/// Reserved field of `WIDTH` bits. Reads return `VALUE` and writes are
/// dropped.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ConstantBits<const WIDTH: usize, const VALUE: u64 = 0>;

impl<const WIDTH: usize, const VALUE: u64> Bits64 for ConstantBits<WIDTH, VALUE> {
    const WIDTH: usize = WIDTH;

    fn from_bits(_value: u64) -> Self {
        Self
    }

    fn to_bits(&self) -> u64 {
        VALUE
    }
}

impl<const WIDTH: usize, const VALUE: u64> fmt::Debug for ConstantBits<WIDTH, VALUE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reserved({VALUE:#x})")
    }
}

/// Unsigned field of `WIDTH` bits, such as a PFN or an ASID
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedWidthBits<const WIDTH: usize>(u64);

impl<const WIDTH: usize> Bits64 for FixedWidthBits<WIDTH> {
    const WIDTH: usize = WIDTH;

    fn from_bits(value: u64) -> Self {
        Self(value & ones(WIDTH as u64))
    }

    fn to_bits(&self) -> u64 {
        self.0
    }
}

/// `n` ones from bit 0. Saturates at 64.
pub const fn ones(n: u64) -> u64 {
    if n >= 64 {
        !0
    } else {
        (1 << n) - 1
    }
}

/// Sign-extend the low 32 bits of `value`, the canonical form of 32-bit
/// addresses held in 64-bit registers.
#[inline(always)]
pub const fn sign_extend_32(value: u64) -> u64 {
    value as u32 as i32 as i64 as u64
}
