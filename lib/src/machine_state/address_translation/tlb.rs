// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! R4000-style translation lookaside buffer.
//!
//! Each entry maps a pair of equally sized virtual pages. The architectural
//! entries are followed by shadow entries: a random write moves the entry it
//! replaces into a shadow slot instead of dropping it, as long as the guest
//! cannot observe it. Shadows take part in lookups, but not in probes, reads
//! or indexed writes. They are discarded whenever the guest could tell them
//! apart from a real miss.

use super::{
    translation_cache::TranslationCache, AccessType, AddressGeometry, Protection, Translation,
    TranslationFault,
};
use crate::{
    bits::{ones, Bits64, FixedWidthBits},
    log::{trace, warning},
    machine_state::{
        bus::Address,
        cp0::entry::{EntryHi, EntryLo, PageGrain, PageMask, PAGE_BITS},
    },
};

/// Architectural plus shadow slots
pub const MAX_TLB_SLOTS: usize = 128;

/// Address bits below the page pair of the smallest page size
const PAIR_OFFSET_MASK: u64 = ones(PAGE_BITS as u64 + 1);

/// One page of a TLB entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TlbPage {
    /// Physical base of the page
    pub frame: Address,
    pub valid: bool,
    pub dirty: bool,
    /// Cacheability attribute
    pub cache: u8,
    pub execute_inhibit: bool,
    pub read_inhibit: bool,
    /// Capabilities loaded through the page lose their tag
    pub cap_load_inhibit: bool,
    /// Tagged capabilities may not be stored through the page
    pub cap_store_inhibit: bool,
}

impl TlbPage {
    /// Decode an `EntryLo` value for a page size given by `page_mask`.
    /// `RI`/`XI` are only honoured when enabled in `PageGrain`.
    fn from_entry_lo(entry_lo: EntryLo, page_mask: PageMask, page_grain: PageGrain) -> Self {
        let size_mask = page_mask.mask().to_bits() << PAGE_BITS;
        Self {
            frame: entry_lo.frame_address() & !size_mask,
            valid: entry_lo.v(),
            dirty: entry_lo.d(),
            cache: entry_lo.c().to_bits() as u8,
            execute_inhibit: page_grain.xie() && entry_lo.xi(),
            read_inhibit: page_grain.rie() && entry_lo.ri(),
            cap_load_inhibit: entry_lo.l(),
            cap_store_inhibit: entry_lo.s(),
        }
    }

    fn to_entry_lo(self, global: bool) -> EntryLo {
        EntryLo::from_bits(0)
            .with_g(global)
            .with_v(self.valid)
            .with_d(self.dirty)
            .with_c(FixedWidthBits::from_bits(self.cache as u64))
            .with_frame_address(self.frame)
            .with_l(self.cap_load_inhibit)
            .with_s(self.cap_store_inhibit)
            .with_xi(self.execute_inhibit)
            .with_ri(self.read_inhibit)
    }

    /// Accesses allowed through the page once it matched and is valid
    pub fn protection(&self) -> Protection {
        let mut protection = Protection::empty();
        protection.set(Protection::READ, !self.read_inhibit);
        protection.set(Protection::WRITE, self.dirty);
        protection.set(Protection::EXEC, !self.execute_inhibit);
        protection.set(Protection::CAP_LOAD, !self.cap_load_inhibit);
        protection.set(Protection::CAP_STORE, !self.cap_store_inhibit);
        protection
    }

    /// Whether `new` removes any access `self` allowed
    fn restricted_by(&self, new: &TlbPage) -> bool {
        (self.valid && !new.valid)
            || (self.dirty && !new.dirty)
            || (!self.execute_inhibit && new.execute_inhibit)
            || (!self.read_inhibit && new.read_inhibit)
            || (!self.cap_load_inhibit && new.cap_load_inhibit)
            || (!self.cap_store_inhibit && new.cap_store_inhibit)
    }
}

/// Register values written to, or read from, a TLB entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbRegisters {
    pub entry_hi: EntryHi,
    pub entry_lo0: EntryLo,
    pub entry_lo1: EntryLo,
    pub page_mask: PageMask,
}

/// A TLB entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TlbEntry {
    /// Virtual address of the page pair, masked by SEGBITS
    pub vpn: Address,
    /// Raw `PageMask`
    pub page_mask: u64,
    pub asid: u8,
    pub global: bool,
    /// `EHINV`: the entry never matches
    pub invalid: bool,
    /// Even and odd page
    pub pages: [TlbPage; 2],
}

impl TlbEntry {
    pub const INVALID: Self = Self {
        vpn: 0,
        page_mask: 0,
        asid: 0,
        global: false,
        invalid: true,
        pages: [TlbPage {
            frame: 0,
            valid: false,
            dirty: false,
            cache: 0,
            execute_inhibit: false,
            read_inhibit: false,
            cap_load_inhibit: false,
            cap_store_inhibit: false,
        }; 2],
    };

    /// The entry the given registers describe
    pub fn from_registers(registers: &TlbRegisters, segmask: u64, page_grain: PageGrain) -> Self {
        let TlbRegisters {
            entry_hi,
            entry_lo0,
            entry_lo1,
            page_mask,
        } = *registers;

        Self {
            vpn: entry_hi.vpn2_address() & segmask,
            page_mask: page_mask.raw(),
            asid: entry_hi.asid_value(),
            global: entry_lo0.g() && entry_lo1.g(),
            invalid: entry_hi.ehinv(),
            pages: [
                TlbPage::from_entry_lo(entry_lo0, page_mask, page_grain),
                TlbPage::from_entry_lo(entry_lo1, page_mask, page_grain),
            ],
        }
    }

    /// Register values read back by `tlbr`
    pub fn registers(&self) -> TlbRegisters {
        if self.invalid {
            return TlbRegisters {
                entry_hi: EntryHi::from_bits(0).with_ehinv(true),
                entry_lo0: EntryLo::from_bits(0),
                entry_lo1: EntryLo::from_bits(0),
                page_mask: PageMask::from_bits(0),
            };
        }

        TlbRegisters {
            entry_hi: EntryHi::from_bits(self.vpn | self.asid as u64),
            entry_lo0: self.pages[0].to_entry_lo(self.global),
            entry_lo1: self.pages[1].to_entry_lo(self.global),
            page_mask: PageMask::from_bits(self.page_mask),
        }
    }

    /// Mask of the address bits inside the page pair
    #[inline]
    pub fn address_mask(&self) -> u64 {
        self.page_mask | PAIR_OFFSET_MASK
    }

    #[inline]
    pub fn matches(&self, address: Address, asid: u8, segmask: u64) -> bool {
        let mask = self.address_mask();
        !self.invalid
            && (self.global || self.asid == asid)
            && self.vpn & !mask == address & !mask & segmask
    }

    /// Whether some address and ASID would match both entries
    pub fn overlaps(&self, other: &TlbEntry) -> bool {
        let mask = self.address_mask() | other.address_mask();
        !self.invalid
            && !other.invalid
            && (self.global || other.global || self.asid == other.asid)
            && self.vpn & !mask == other.vpn & !mask
    }

    /// Drop every cached translation derived from this entry.
    fn flush_translations(&self, geometry: AddressGeometry, cache: &mut TranslationCache) {
        let mask = self.address_mask();
        let page_size = (mask >> 1) + 1;
        let base = self.vpn & !mask;

        for (half, page) in self.pages.iter().enumerate() {
            if !page.valid {
                continue;
            }
            let start = canonical_vpn(base + half as u64 * page_size, geometry);
            cache.invalidate_range(start, start | (mask >> 1));
        }
    }
}

/// Reinstate the sign bits SEGBITS masking removed from compatibility
/// segment addresses.
fn canonical_vpn(vpn: Address, geometry: AddressGeometry) -> Address {
    if !geometry.is_64bit {
        return vpn;
    }

    let segmask = geometry.segmask();
    if vpn >= 0xFFFF_FFFF_8000_0000 & segmask {
        vpn | (ones(62) & !ones(geometry.segbits as u64))
    } else {
        vpn
    }
}

/// Processor state consulted by TLB maintenance
#[derive(Clone, Copy, Debug)]
pub struct TlbContext {
    /// Current `EntryHi.ASID`
    pub asid: u8,
    pub geometry: AddressGeometry,
    pub page_grain: PageGrain,
}

/// The TLB of one processor
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tlb {
    /// Architectural entries followed by shadow entries
    entries: Vec<TlbEntry>,
    size: usize,
}

impl Tlb {
    /// A TLB with `size` architectural entries, all invalid
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, MAX_TLB_SLOTS);
        Self {
            entries: vec![TlbEntry::INVALID; size],
            size,
        }
    }

    /// Number of architectural entries
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entries(&self) -> &[TlbEntry] {
        &self.entries[..self.size]
    }

    pub fn shadow_entries(&self) -> &[TlbEntry] {
        &self.entries[self.size..]
    }

    /// Translate `address`. Never modifies the TLB.
    pub fn lookup(
        &self,
        address: Address,
        asid: u8,
        segmask: u64,
        access: AccessType,
    ) -> Result<Translation, TranslationFault> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.matches(address, asid, segmask))
            .ok_or(TranslationFault::NoMatch)?;

        let mask = entry.address_mask();
        let odd = address & mask & !(mask >> 1) != 0;
        let page = &entry.pages[odd as usize];

        if !page.valid {
            return Err(TranslationFault::Invalid);
        }

        match access {
            AccessType::Instruction if page.execute_inhibit => {
                return Err(TranslationFault::ExecuteInhibited)
            }
            AccessType::Load | AccessType::CapabilityLoad if page.read_inhibit => {
                return Err(TranslationFault::ReadInhibited)
            }
            _ => {}
        }

        if access.is_store() && !page.dirty {
            return Err(TranslationFault::Dirty);
        }

        if access == AccessType::CapabilityStore && page.cap_store_inhibit {
            return Err(TranslationFault::CapStoreInhibited);
        }

        Ok(Translation {
            physical: page.frame | (address & (mask >> 1)),
            protection: page.protection(),
        })
    }

    /// `tlbp`: index of the architectural entry matching `entry_hi`. On a
    /// miss, shadows from the first matching one onwards are discarded.
    pub fn probe(
        &mut self,
        entry_hi: EntryHi,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) -> Option<usize> {
        let segmask = ctx.geometry.segmask();
        let asid = entry_hi.asid_value();
        let matches = |entry: &TlbEntry| entry.matches(entry_hi.raw(), asid, segmask);

        if let Some(index) = self.entries().iter().position(matches) {
            return Some(index);
        }

        if let Some(shadow) = self.shadow_entries().iter().position(matches) {
            self.discard_shadows_from(self.size + shadow, ctx, cache);
        }
        None
    }

    /// `tlbwi`: write the entry at `index`, modulo the TLB size.
    pub fn write_indexed(
        &mut self,
        index: usize,
        registers: &TlbRegisters,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) {
        let slot = index % self.size;
        let new = TlbEntry::from_registers(registers, ctx.geometry.segmask(), ctx.page_grain);
        let old = &self.entries[slot];

        // Shadows survive writes that only widen the permissions of the
        // same mapping.
        let restricted = old.vpn != new.vpn
            || old.asid != new.asid
            || old.global != new.global
            || (!old.invalid && new.invalid)
            || old
                .pages
                .iter()
                .zip(new.pages.iter())
                .any(|(old, new)| old.restricted_by(new));
        if restricted {
            self.discard_shadows_from(self.size, ctx, cache);
        }

        self.invalidate(slot, false, ctx, cache);
        self.fill(slot, new, ctx, cache);
    }

    /// `tlbwr`: write the entry at the randomly chosen `slot`, shadowing the
    /// entry it replaces.
    pub fn write_random(
        &mut self,
        slot: usize,
        registers: &TlbRegisters,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) {
        let slot = slot % self.size;
        let new = TlbEntry::from_registers(registers, ctx.geometry.segmask(), ctx.page_grain);
        self.invalidate(slot, true, ctx, cache);
        self.fill(slot, new, ctx, cache);
    }

    /// `tlbr`: the register values of the entry at `index`, modulo the TLB
    /// size. Reading changes `EntryHi.ASID`, so cached translations are
    /// dropped when the entry belongs to another address space.
    pub fn read(
        &mut self,
        index: usize,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) -> TlbRegisters {
        let entry = self.entries[index % self.size];
        if entry.asid != ctx.asid {
            self.flush(cache);
        }
        self.discard_shadows_from(self.size, ctx, cache);
        entry.registers()
    }

    /// `tlbinv`: invalidate the non-global entries of the current ASID.
    pub fn invalidate_asid(&mut self, asid: u8, cache: &mut TranslationCache) {
        for entry in self.entries[..self.size].iter_mut() {
            if !entry.global && entry.asid == asid {
                entry.invalid = true;
            }
        }
        self.flush(cache);
    }

    /// `tlbinvf`: invalidate every entry.
    pub fn invalidate_all(&mut self, cache: &mut TranslationCache) {
        for entry in self.entries[..self.size].iter_mut() {
            entry.invalid = true;
        }
        self.flush(cache);
    }

    /// Drop all cached translations and shadow entries. Used when the
    /// address space changes.
    pub fn flush(&mut self, cache: &mut TranslationCache) {
        cache.invalidate();
        self.entries.truncate(self.size);
    }

    /// Remove the entry at `slot` from use: either shadow it, or drop the
    /// translations cached from it.
    fn invalidate(
        &mut self,
        slot: usize,
        use_shadow: bool,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) {
        let entry = self.entries[slot];

        // Entries of other address spaces are not cached, the cache is
        // flushed when the ASID changes.
        if entry.invalid || (!entry.global && entry.asid != ctx.asid) {
            return;
        }

        if use_shadow && self.entries.len() < MAX_TLB_SLOTS {
            trace!(
                "Shadowing TLB entry {slot} (vpn {:#x}) in slot {}",
                entry.vpn,
                self.entries.len()
            );
            self.entries.push(entry);
            return;
        }

        entry.flush_translations(ctx.geometry, cache);
    }

    /// Discard shadow entries from slot `first` onwards.
    fn discard_shadows_from(&mut self, first: usize, ctx: &TlbContext, cache: &mut TranslationCache) {
        while self.entries.len() > first.max(self.size) {
            let last = self.entries.len() - 1;
            self.invalidate(last, false, ctx, cache);
            self.entries.pop();
        }
    }

    fn fill(&mut self, slot: usize, entry: TlbEntry, ctx: &TlbContext, cache: &mut TranslationCache) {
        if entry.invalid {
            self.entries[slot].invalid = true;
            return;
        }

        self.repair_exclusivity(slot, &entry, ctx, cache);
        trace!(
            "TLB write to slot {slot}: vpn {:#x} mask {:#x} asid {} global {}",
            entry.vpn,
            entry.page_mask,
            entry.asid,
            entry.global
        );
        self.entries[slot] = entry;
    }

    /// Keep at most one entry matching any address: entries overlapping the
    /// one about to be written at `slot` are removed.
    fn repair_exclusivity(
        &mut self,
        slot: usize,
        entry: &TlbEntry,
        ctx: &TlbContext,
        cache: &mut TranslationCache,
    ) {
        if let Some(shadow) = self
            .shadow_entries()
            .iter()
            .position(|shadow| shadow.overlaps(entry))
        {
            self.discard_shadows_from(self.size + shadow, ctx, cache);
        }

        for index in 0..self.size {
            let other = self.entries[index];
            if index == slot || !other.overlaps(entry) {
                continue;
            }

            warning!(
                "TLB entry {index} (vpn {:#x}) overlaps write to slot {slot}, invalidating it",
                other.vpn
            );
            other.flush_translations(ctx.geometry, cache);
            self.entries[index].invalid = true;
        }
    }
}
