// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Hardware page-table walker.
//!
//! On a TLB miss the walker descends from `PWBase` through up to three
//! directory levels (global, upper, middle) to a leaf table holding pairs of
//! page table entries. A directory entry with the huge-page bit set ends the
//! walk early. The result is the register image a software refill handler
//! would pass to `tlbwr`.
//!
//! The walk itself is pure: memory is read through a callback which
//! translates and loads one entry, so a failed walk leaves no trace.

use super::{
    pte::{DirectoryEntry, EntryLayout},
    tlb::TlbRegisters,
};
use crate::{
    bits::{ones, Bits64},
    machine_state::{
        bus::Address,
        cp0::{
            entry::{EntryHi, EntryLo, PageMask, PAGE_BITS},
            pwalk::{PWCtl, PWField, PWSize},
        },
    },
};

/// Reasons for abandoning a walk. The miss is then reported as a TLB refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WalkAbort {
    #[error("Page walker disabled")]
    Disabled,

    #[error("Unsupported page table entry width {0}")]
    EntryWidth(u64),

    #[error("Directory address {0:#x} does not translate")]
    Translation(Address),

    #[error("Misaligned directory address {0:#x}")]
    Misaligned(Address),

    #[error("Bus error reading directory address {0:#x}")]
    BusError(Address),

    #[error("Huge page at even directory index without dual-page support")]
    HugePageWithoutDph,

    #[error("Entry layout with PTEI {0} places RI/XI below bit 0")]
    EntryLayout(u32),

    #[error("Walk yields an unsupported page mask {0:#x}")]
    PageMask(u64),
}

/// Walker registers captured when the walk starts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkerConfig {
    /// `PWBase`
    pub base: Address,
    pub field: PWField,
    pub size: PWSize,
    pub ctl: PWCtl,
}

/// One level of the table hierarchy
#[derive(Clone, Copy, Debug)]
struct Level {
    /// Lowest virtual address bit of the index
    index_shift: u32,
    /// Number of index bits, 0 if the level is skipped
    width: u32,
}

impl Level {
    #[inline]
    fn index(self, address: Address) -> u64 {
        (address >> self.index_shift) & ones(self.width as u64)
    }

    /// Mask of the virtual address bits inside a huge page pair ending the
    /// walk at this level. An odd index position splits one entry into two
    /// pages.
    fn huge_pair_mask(self) -> u64 {
        ones(self.index_shift as u64) >> (self.index_shift & 1)
    }
}

impl WalkerConfig {
    /// Global, upper and middle directory
    fn directories(&self) -> [Level; 3] {
        [
            Level {
                index_shift: self.field.gdi().to_bits() as u32,
                width: self.size.gdw().to_bits() as u32,
            },
            Level {
                index_shift: self.field.udi().to_bits() as u32,
                width: self.size.udw().to_bits() as u32,
            },
            Level {
                index_shift: self.field.mdi().to_bits() as u32,
                width: self.size.mdw().to_bits() as u32,
            },
        ]
    }

    fn leaf_table(&self) -> Level {
        Level {
            index_shift: self.field.pti().to_bits() as u32,
            width: self.size.ptw().to_bits() as u32,
        }
    }
}

/// Entry sizes, as log2 of bytes
#[derive(Clone, Copy, Debug)]
struct Shifts {
    directory: u32,
    leaf: u32,
}

/// Walk the tables for `address`. `read_entry(address, shift)` must
/// translate `address` as a kernel data load and read an entry of
/// `1 << shift` bytes.
pub fn walk<F>(
    config: &WalkerConfig,
    address: Address,
    asid: u8,
    mut read_entry: F,
) -> Result<TlbRegisters, WalkAbort>
where
    F: FnMut(Address, u32) -> Result<u64, WalkAbort>,
{
    let WalkerConfig {
        base,
        field,
        size,
        ctl,
    } = *config;

    let directories = config.directories();
    if !ctl.pwen() || directories.iter().all(|level| level.width == 0) {
        return Err(WalkAbort::Disabled);
    }

    let ptew = size.ptew().to_bits();
    if ptew > 1 {
        return Err(WalkAbort::EntryWidth(ptew));
    }

    let native = if size.ps() { 3 } else { 2 };
    let double = ptew == 1;
    let shifts = Shifts {
        directory: if ctl.hugepg() && double { native + 1 } else { native },
        leaf: if double { native + 1 } else { native },
    };
    let layout = EntryLayout {
        ptei: field.ptei().to_bits() as u32,
        entry_bits: 8 << shifts.leaf,
    };
    let psn = ctl.psn().to_bits() as u32;

    let mut fetch = |address: Address, shift: u32| {
        if address & ones(shift as u64) != 0 {
            return Err(WalkAbort::Misaligned(address));
        }
        read_entry(address, shift).map(DirectoryEntry::new)
    };
    let to_entry_lo = |entry: DirectoryEntry| {
        entry
            .to_entry_lo(layout)
            .ok_or(WalkAbort::EntryLayout(layout.ptei))
    };

    let mut pointer = base;
    for level in directories.into_iter().filter(|level| level.width > 0) {
        pointer |= level.index(address) << shifts.directory;
        let entry = fetch(pointer, shifts.directory)?;

        if !(ctl.hugepg() && entry.is_huge(psn)) {
            pointer = entry.pointer();
            continue;
        }

        let entry_lo = to_entry_lo(entry)?;
        let (lo0, lo1) = if level.index_shift & 1 == 1 {
            // One entry covers both pages
            let lsb = (1 << (level.index_shift - 1)) >> (PAGE_BITS - EntryLo::PFN_OFFSET as u32);
            (
                EntryLo::from_bits(entry_lo.raw() & !lsb),
                EntryLo::from_bits(entry_lo.raw() | lsb),
            )
        } else if ctl.dph() {
            let odd_page = 1 << shifts.leaf;
            let sibling = to_entry_lo(fetch(pointer ^ odd_page, shifts.leaf)?)?;
            if pointer & odd_page != 0 {
                (sibling, entry_lo)
            } else {
                (entry_lo, sibling)
            }
        } else {
            return Err(WalkAbort::HugePageWithoutDph);
        };

        return refill(address, asid, lo0, lo1, level.huge_pair_mask());
    }

    let leaf = config.leaf_table();
    let even = (leaf.index(address) >> 1) << (shifts.leaf + 1);
    let odd = even | (1 << shifts.leaf);
    let lo0 = to_entry_lo(fetch(pointer | even, shifts.leaf)?)?;
    let lo1 = to_entry_lo(fetch(pointer | odd, shifts.leaf)?)?;

    refill(address, asid, lo0, lo1, ones(leaf.index_shift as u64))
}

fn refill(
    address: Address,
    asid: u8,
    entry_lo0: EntryLo,
    entry_lo1: EntryLo,
    pair_mask: u64,
) -> Result<TlbRegisters, WalkAbort> {
    let raw_mask = (pair_mask >> PAGE_BITS) << (PAGE_BITS + 1);
    let page_mask = PageMask::try_from_raw(raw_mask).ok_or(WalkAbort::PageMask(raw_mask))?;

    Ok(TlbRegisters {
        entry_hi: EntryHi::from_bits((address & EntryHi::VPN2_MASK) | asid as u64),
        entry_lo0,
        entry_lo1,
        page_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::{walk, WalkAbort, WalkerConfig};
    use crate::{
        bits::{ones, Bits64, FixedWidthBits},
        machine_state::{
            bus::Address,
            cp0::{
                entry::{EntryLo, PageMask},
                pwalk::{PWCtl, PWField, PWSize},
            },
        },
    };
    use std::collections::HashMap;

    const BASE: Address = 0x8010_0000;
    const TABLE: Address = 0x8020_0000;
    const PTEI: u64 = 6;

    fn bits<const W: usize>(value: u64) -> FixedWidthBits<W> {
        FixedWidthBits::from_bits(value)
    }

    /// Two-level, 32-bit tables: 10 bits of global directory at bit 22,
    /// 10 bits of page table at bit 12.
    fn config() -> WalkerConfig {
        WalkerConfig {
            base: BASE,
            field: PWField::from_bits(0)
                .with_gdi(bits(22))
                .with_pti(bits(12))
                .with_ptei(bits(PTEI)),
            size: PWSize::from_bits(0).with_gdw(bits(10)).with_ptw(bits(10)),
            ctl: PWCtl::from_bits(0).with_pwen(true),
        }
    }

    fn huge_config(gdi: u64, dph: bool) -> WalkerConfig {
        let config = config();
        WalkerConfig {
            field: config.field.with_gdi(bits(gdi)),
            size: config.size.with_gdw(bits(32 - gdi)),
            ctl: config.ctl.with_hugepg(true).with_dph(dph).with_psn(bits(0)),
            ..config
        }
    }

    fn leaf(frame: u64) -> EntryLo {
        EntryLo::from_bits(0b111).with_frame_address(frame)
    }

    /// In-memory image of a leaf entry
    fn pte(lo: EntryLo) -> u64 {
        let rixi = (lo.ri() as u64) << 1 | lo.xi() as u64;
        (lo.raw() & ones(60)) << PTEI | rixi << (PTEI - 2)
    }

    fn reader(
        memory: &HashMap<Address, u64>,
    ) -> impl FnMut(Address, u32) -> Result<u64, WalkAbort> + '_ {
        move |address, shift| {
            assert_eq!(shift, 2);
            memory
                .get(&address)
                .copied()
                .ok_or(WalkAbort::BusError(address))
        }
    }

    #[test]
    fn two_level_walk() {
        let memory = HashMap::from([
            (BASE + 4, TABLE),
            (TABLE + 8, pte(leaf(0x0100_0000))),
            (TABLE + 12, pte(leaf(0x0200_0000).with_xi(true))),
        ]);

        let refill = walk(&config(), 0x0040_3123, 7, reader(&memory)).unwrap();
        assert_eq!(refill.entry_hi.raw(), 0x0040_2007);
        assert_eq!(refill.page_mask, PageMask::from_bits(0));
        assert_eq!(refill.entry_lo0, leaf(0x0100_0000));
        assert_eq!(refill.entry_lo1, leaf(0x0200_0000).with_xi(true));
    }

    #[test]
    fn huge_page_at_odd_level_is_split() {
        let memory = HashMap::from([(BASE + 4, pte(leaf(0x0200_0000)) | 1)]);

        let refill = walk(&huge_config(21, false), 0x0020_0000, 0, reader(&memory)).unwrap();
        // 1 MiB pages
        assert_eq!(refill.page_mask.raw(), 0x1FE000);
        assert_eq!(refill.entry_hi.raw(), 0x0020_0000);
        assert_eq!(refill.entry_lo0.frame_address(), 0x0200_0000);
        assert_eq!(refill.entry_lo1.frame_address(), 0x0210_0000);
        assert!(refill.entry_lo1.v());
    }

    #[test]
    fn huge_page_at_even_level_reads_sibling() {
        let memory = HashMap::from([
            (BASE, pte(leaf(0x0400_0000)) | 1),
            (BASE + 4, pte(leaf(0x0800_0000)) | 1),
        ]);

        let refill = walk(&huge_config(22, true), 0x0040_0000, 0, reader(&memory)).unwrap();
        // 4 MiB pages
        assert_eq!(refill.page_mask.raw(), 0x7FE000);
        assert_eq!(refill.entry_lo0.frame_address(), 0x0400_0000);
        assert_eq!(refill.entry_lo1.frame_address(), 0x0800_0000);

        assert_eq!(
            walk(&huge_config(22, false), 0x0040_0000, 0, reader(&memory)),
            Err(WalkAbort::HugePageWithoutDph)
        );
    }

    #[test]
    fn zero_width_directories_disable_the_walker() {
        let mut config = config();
        config.size = config.size.with_gdw(bits(0));
        let memory = HashMap::new();
        assert_eq!(
            walk(&config, 0x1000, 0, reader(&memory)),
            Err(WalkAbort::Disabled)
        );

        let mut config = self::config();
        config.ctl = config.ctl.with_pwen(false);
        assert_eq!(
            walk(&config, 0x1000, 0, reader(&memory)),
            Err(WalkAbort::Disabled)
        );
    }

    #[test]
    fn aborts() {
        let memory = HashMap::from([(BASE + 4, TABLE)]);

        // Missing leaf table
        assert_eq!(
            walk(&config(), 0x0040_0000, 0, reader(&memory)),
            Err(WalkAbort::BusError(TABLE))
        );

        let mut config = config();
        config.base = BASE + 2;
        assert_eq!(
            walk(&config, 0x0040_0000, 0, reader(&memory)),
            Err(WalkAbort::Misaligned(BASE + 6))
        );

        let mut config = self::config();
        config.size = config.size.with_ptew(bits(2));
        assert_eq!(
            walk(&config, 0x0040_0000, 0, reader(&memory)),
            Err(WalkAbort::EntryWidth(2))
        );
    }

    #[test]
    fn double_width_entries() {
        // PTEW = 1 with 32-bit pointers: 8 byte leaf entries
        let mut config = config();
        config.size = config.size.with_ptew(bits(1));

        let memory = HashMap::from([
            (BASE + 4, TABLE),
            (TABLE + 16, pte(leaf(0x0300_0000))),
            (TABLE + 24, pte(leaf(0x0300_1000))),
        ]);
        let mut shifts = Vec::new();
        let refill = walk(&config, 0x0040_2000, 0, |address, shift| {
            shifts.push(shift);
            memory
                .get(&address)
                .copied()
                .ok_or(WalkAbort::BusError(address))
        })
        .unwrap();

        assert_eq!(shifts, [2, 3, 3]);
        assert_eq!(refill.entry_lo0.frame_address(), 0x0300_0000);
        assert_eq!(refill.entry_lo1.frame_address(), 0x0300_1000);
    }
}
