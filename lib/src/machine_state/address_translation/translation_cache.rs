// SPDX-FileCopyrightText: 2024 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Direct-mapped cache of page translations.
//!
//! Sits in front of segment decoding and TLB lookup for fetches, loads and
//! stores. Capability and tag accesses always retranslate.

use super::{AccessType, Protection, Translation, PAGE_OFFSET_WIDTH};
use crate::{
    bits::ones,
    log::trace,
    machine_state::{bus::Address, mode::ExecutionMode},
};

const OFFSET_MASK: u64 = ones(PAGE_OFFSET_WIDTH as u64);
const PAGE_MASK: u64 = !OFFSET_MASK;

const CACHE_INDEX_BITS: u32 = 8;
pub const CACHE_ENTRIES: usize = 1 << CACHE_INDEX_BITS;

#[derive(Clone, Copy, Debug)]
struct CachedTranslation {
    // Inputs determining if page translation is cached.
    virt_page: Address,
    mode: u8,
    asid: u8,
    // translation result
    phys_page: Address,
    protection: Protection,
}

impl CachedTranslation {
    // A virtual page has the low 12 bits cleared, so `!0` never matches.
    const EMPTY: Self = Self {
        virt_page: !0,
        mode: !0,
        asid: 0,
        phys_page: !0,
        protection: Protection::empty(),
    };
}

/// Translation cache keyed by virtual page, execution mode and ASID
#[derive(Clone)]
pub struct TranslationCache {
    entries: Box<[CachedTranslation; CACHE_ENTRIES]>,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationCache {
    pub fn new() -> Self {
        Self {
            entries: Box::new([CachedTranslation::EMPTY; CACHE_ENTRIES]),
        }
    }

    #[inline(always)]
    fn index(address: Address) -> usize {
        ((address >> PAGE_OFFSET_WIDTH) & ones(CACHE_INDEX_BITS as u64)) as usize
    }

    /// Determine if for the given parameters the translation cache is hit.
    /// If yes, return the cached translated address as `Some(translated_addr)`,
    /// otherwise, for a miss return [`None`]. A cached page whose protection
    /// does not permit `access` is a miss.
    #[inline(always)]
    pub fn try_translate(
        &self,
        mode: ExecutionMode,
        asid: u8,
        address: Address,
        access: AccessType,
    ) -> Option<Address> {
        let entry = &self.entries[Self::index(address)];
        if entry.virt_page == address & PAGE_MASK
            && entry.mode == mode as u8
            && entry.asid == asid
            && entry.protection.permits(access)
        {
            Some(entry.phys_page | (address & OFFSET_MASK))
        } else {
            None
        }
    }

    /// Update the cache with the given parameters and translated page.
    #[inline(always)]
    pub fn update(
        &mut self,
        mode: ExecutionMode,
        asid: u8,
        address: Address,
        translation: &Translation,
    ) {
        self.entries[Self::index(address)] = CachedTranslation {
            virt_page: address & PAGE_MASK,
            mode: mode as u8,
            asid,
            phys_page: translation.physical & PAGE_MASK,
            protection: translation.protection,
        };
    }

    /// Forget the translation of the page containing `address`.
    #[inline]
    pub fn invalidate_page(&mut self, address: Address) {
        let entry = &mut self.entries[Self::index(address)];
        if entry.virt_page == address & PAGE_MASK {
            *entry = CachedTranslation::EMPTY;
        }
    }

    /// Forget the translations of all pages overlapping `[start, end]`.
    pub fn invalidate_range(&mut self, start: Address, end: Address) {
        let first = start >> PAGE_OFFSET_WIDTH;
        let last = end >> PAGE_OFFSET_WIDTH;

        // Ranges larger than the cache are cheaper to drop wholesale
        if last.saturating_sub(first) >= CACHE_ENTRIES as u64 {
            self.invalidate();
            return;
        }

        trace!("Invalidating translations {:#x} to {:#x}", start, end);
        for page in first..=last {
            self.invalidate_page(page << PAGE_OFFSET_WIDTH);
        }
    }

    /// Invalidate cache
    #[inline]
    pub fn invalidate(&mut self) {
        trace!("Invalidating all translations");
        self.entries.fill(CachedTranslation::EMPTY);
    }
}
