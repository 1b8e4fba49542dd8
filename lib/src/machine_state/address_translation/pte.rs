// SPDX-FileCopyrightText: 2024 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Page directory and page table entries as stored in guest memory.
//!
//! A directory entry is either a pointer to the next level or, with the
//! huge-page bit set, a leaf. Leaf entries hold an `EntryLo` image shifted up
//! by `PWField.PTEI - 2` bits, with `RI`/`XI` in the two bits right below it.

use crate::{
    bits::{field, Bits64},
    machine_state::{bus::Address, cp0::entry::EntryLo},
};

/// Number of bits of the in-memory `RI`/`XI` pair
const RIXI_WIDTH: u32 = 2;

/// Bit of the in-memory `RI`/`XI` pair holding `XI`. `RI` follows it.
const RIXI_XI_BIT: u32 = 0;

/// Entries of 32-bit tables store `PTEI` relative to the upper word.
const UPPER_WORD_SHIFT: u32 = 32;

/// Where the `EntryLo` image sits inside a leaf entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLayout {
    /// `PWField.PTEI`
    pub ptei: u32,
    /// Size of a leaf entry in bits
    pub entry_bits: u32,
}

/// A raw page directory or page table entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryEntry(u64);

impl DirectoryEntry {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether the huge-page bit, at position `PWCtl.PSN`, is set
    #[inline]
    pub fn is_huge(self, psn: u32) -> bool {
        field::bit(self.0, psn)
    }

    /// Base address of the next directory level
    #[inline]
    pub fn pointer(self) -> Address {
        self.0
    }

    /// The `EntryLo` value of a leaf entry, or `None` if `layout` places the
    /// `RI`/`XI` pair below bit 0.
    pub fn to_entry_lo(self, layout: EntryLayout) -> Option<EntryLo> {
        let ptei = if layout.ptei > layout.entry_bits {
            layout.ptei.checked_sub(UPPER_WORD_SHIFT)?
        } else {
            layout.ptei
        };

        let rixi_offset = ptei.checked_sub(RIXI_WIDTH)?;
        let shifted = self.0 >> rixi_offset;

        let rixi = field::extract(shifted, RIXI_XI_BIT, RIXI_WIDTH);
        let value = (shifted >> RIXI_WIDTH) | (rixi << EntryLo::XI_OFFSET);
        Some(EntryLo::from_bits(value))
    }
}
