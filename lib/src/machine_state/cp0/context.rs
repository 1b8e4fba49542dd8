// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! `Context` and `XContext`: page-table pointers pre-computed by hardware
//! for the refill handler.

#![allow(non_snake_case, reason = "Register fields use their architectural names")]

use crate::bits::{field, Bits64, ConstantBits, FixedWidthBits};
use crate::cp0_register;

cp0_register! {
    /// CP0 register 4, select 0.
    pub struct Context {
        RES0: ConstantBits<4>,
        BAD_VPN2: FixedWidthBits<19>,
        PTE_BASE: FixedWidthBits<41>,
    }
}

impl Context {
    /// Record `address` as the faulting address, keeping `PTEBase`.
    #[inline]
    pub fn with_bad_address(self, address: u64) -> Self {
        self.with_bad_vpn2(FixedWidthBits::from_bits(address >> 13))
    }
}

/// Record `address` in an `XContext` value. The register layout depends on
/// the implemented virtual address width: `BadVPN2` occupies
/// `[SEGBITS - 10 : 4]`, `R` sits directly above it and `PTEBase` fills the
/// remaining upper bits.
pub fn xcontext_with_bad_address(xcontext: u64, address: u64, segbits: u32) -> u64 {
    let pte_base = xcontext & (!0 << (segbits - 7));
    let region = field::extract(address, 62, 2) << (segbits - 9);
    let bad_vpn2 = field::extract(address, 13, segbits - 13) << 4;
    pte_base | region | bad_vpn2
}
