// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! TLB programming registers: `Index`, `EntryHi`, `EntryLo0/1`, `PageMask`
//! and `PageGrain`.

// Allow unused setters & getters & constants
#![allow(dead_code)]
#![allow(non_snake_case, reason = "Register fields use their architectural names")]

use crate::bits::{Bits64, ConstantBits, FixedWidthBits};
use crate::cp0_register;

/// Width of the byte offset inside the smallest supported page.
pub const PAGE_BITS: u32 = 12;

/// Mask of the byte offset inside the smallest supported page.
pub const PAGE_OFFSET_MASK: u64 = (1 << PAGE_BITS) - 1;

cp0_register! {
    /// CP0 register 0, select 0. Selects the TLB entry for `tlbwi`/`tlbr`,
    /// receives the `tlbp` result.
    pub struct Index {
        INDEX: FixedWidthBits<31>,
        P: bool,
        RES0: ConstantBits<32>,
    }
}

cp0_register! {
    /// CP0 register 10, select 0.
    pub struct EntryHi {
        ASID: FixedWidthBits<8>,
        RES0: ConstantBits<2>,
        EHINV: bool,
        RES1: ConstantBits<2>,
        VPN2: FixedWidthBits<49>,
        R: FixedWidthBits<2>,
    }
}

impl EntryHi {
    /// Mask of the address bits covered by `VPN2` and `R`.
    pub const VPN2_MASK: u64 = !((1 << (PAGE_BITS + 1)) - 1);

    /// The current address space identifier.
    #[inline]
    pub fn asid_value(self) -> u8 {
        self.asid().to_bits() as u8
    }

    /// The region and page-pair bits of this register, in address form.
    #[inline]
    pub fn vpn2_address(self) -> u64 {
        self.raw() & Self::VPN2_MASK
    }
}

cp0_register! {
    /// CP0 registers 2 and 3, select 0. The layout is the 64-bit one; 32-bit
    /// writes relocate `RI`/`XI` from bits 31:30.
    pub struct EntryLo {
        G: bool,
        V: bool,
        D: bool,
        C: FixedWidthBits<3>,
        PFN: FixedWidthBits<50>,
        RES0: ConstantBits<4>,
        L: bool,
        S: bool,
        XI: bool,
        RI: bool,
    }
}

impl EntryLo {
    /// Physical frame base in bytes, before any page-size masking.
    #[inline]
    pub fn frame_address(self) -> u64 {
        self.pfn().to_bits() << PAGE_BITS
    }

    /// Build an `EntryLo` for a frame base in bytes.
    #[inline]
    pub fn with_frame_address(self, address: u64) -> Self {
        self.with_pfn(FixedWidthBits::from_bits(address >> PAGE_BITS))
    }

    /// Convert a 32-bit register write, where `RI`/`XI` occupy bits 31:30
    /// and `PFN` is 24 bits wide.
    pub fn from_bits_32(value: u32) -> Self {
        let value = value as u64;
        let rixi = (value >> 30) & 0b11;
        let low = value & ((1 << 30) - 1);
        Self::from_bits(low | (rixi << Self::XI_OFFSET))
    }

    /// The 32-bit view of this register.
    pub fn to_bits_32(self) -> u32 {
        let rixi = (self.raw() >> Self::XI_OFFSET) & 0b11;
        ((self.raw() & ((1 << 30) - 1)) | (rixi << 30)) as u32
    }
}

cp0_register! {
    /// CP0 register 5, select 0.
    pub struct PageMask {
        RES0: ConstantBits<13>,
        MASK: FixedWidthBits<16>,
        RES1: ConstantBits<35>,
    }
}

impl PageMask {
    /// Normalised page-size encodings: pairs of ones from the bottom.
    const VALID_MASKS: [u64; 9] = [
        0x0000, 0x0003, 0x000F, 0x003F, 0x00FF, 0x03FF, 0x0FFF, 0x3FFF, 0xFFFF,
    ];

    /// Accepts only the architectural page sizes, 4 KiB to 256 MiB.
    pub fn try_from_raw(value: u64) -> Option<Self> {
        let mask = (value >> Self::MASK_OFFSET) & 0xFFFF;
        Self::VALID_MASKS
            .contains(&mask)
            .then(|| Self::from_bits(value))
    }

    /// Mask of the address bits below the page-pair boundary. Includes the
    /// even/odd selection bit.
    #[inline]
    pub fn address_mask(self) -> u64 {
        self.raw() | ((1 << (PAGE_BITS + 1)) - 1)
    }
}

cp0_register! {
    /// CP0 register 5, select 1.
    pub struct PageGrain {
        RES0: ConstantBits<27>,
        IEC: bool,
        RES1: ConstantBits<1>,
        ELPA: bool,
        XIE: bool,
        RIE: bool,
        RES2: ConstantBits<32>,
    }
}
