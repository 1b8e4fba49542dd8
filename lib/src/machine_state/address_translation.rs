// SPDX-FileCopyrightText: 2024 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Virtual address translation.
//!
//! Every access is first decoded by segment. Unmapped segments translate
//! directly, mapped segments go through the processor's [`Mmu`] strategy.

use super::{
    bus::Address,
    cp0::{entry::PageGrain, segctl::SegmentControl, status::Status},
    mode::ExecutionMode,
};
use crate::{
    bits::{ones, sign_extend_32},
    traps::Exception,
};

pub mod page_walk;
pub mod pte;
pub mod segment;
pub mod tlb;
pub mod translation_cache;

use segment::Route;
use tlb::Tlb;

/// Offset of the `page offset` field in virtual and physical addresses.
pub const PAGE_OFFSET_WIDTH: usize = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_OFFSET_WIDTH;

/// Access type that is used in the virtual address translation process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum AccessType {
    Instruction,
    Load,
    Store,
    /// Tagged capability load
    CapabilityLoad,
    /// Tagged capability store
    CapabilityStore,
}

impl AccessType {
    /// Whether the access writes memory. Capability stores are stores.
    #[inline]
    pub fn is_store(self) -> bool {
        matches!(self, AccessType::Store | AccessType::CapabilityStore)
    }

    /// Protection an access requires
    #[inline]
    pub fn required_protection(self) -> Protection {
        match self {
            AccessType::Instruction => Protection::EXEC,
            AccessType::Load => Protection::READ,
            AccessType::Store => Protection::WRITE,
            AccessType::CapabilityLoad => Protection::READ,
            AccessType::CapabilityStore => Protection::WRITE | Protection::CAP_STORE,
        }
    }
}

bitflags::bitflags! {
    /// Accesses allowed through a translated page
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Loaded capabilities keep their tag
        const CAP_LOAD = 1 << 3;
        /// Tagged capabilities may be stored
        const CAP_STORE = 1 << 4;
    }
}

impl Protection {
    #[inline]
    pub fn permits(self, access: AccessType) -> bool {
        self.contains(access.required_protection())
    }
}

/// Successful translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub physical: Address,
    pub protection: Protection,
}

impl Translation {
    /// Translation of an unmapped segment
    #[inline]
    pub fn unmapped(physical: Address) -> Self {
        Self {
            physical,
            protection: Protection::all(),
        }
    }
}

/// Reasons a translation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, strum::Display)]
pub enum TranslationFault {
    /// Segment not accessible in the current mode, or outside the implemented
    /// address range
    BadAddress,
    /// No TLB entry matches
    NoMatch,
    /// The matching TLB entry is not valid
    Invalid,
    /// Store through a matching TLB entry that is not dirty
    Dirty,
    ExecuteInhibited,
    ReadInhibited,
    CapStoreInhibited,
}

impl TranslationFault {
    /// The exception reported for this fault. `PageGrain.IEC` selects
    /// dedicated cause codes for read and execute inhibit.
    pub fn exception(self, access: AccessType, address: Address, page_grain: PageGrain) -> Exception {
        let store = access.is_store();
        match self {
            TranslationFault::BadAddress if store => Exception::AddressErrorStore(address),
            TranslationFault::BadAddress => Exception::AddressErrorLoad(address),
            TranslationFault::NoMatch if store => Exception::TlbRefillStore(address),
            TranslationFault::NoMatch => Exception::TlbRefillLoad(address),
            TranslationFault::Invalid if store => Exception::TlbInvalidStore(address),
            TranslationFault::Invalid => Exception::TlbInvalidLoad(address),
            TranslationFault::Dirty => Exception::TlbModified(address),
            TranslationFault::ExecuteInhibited if page_grain.iec() => {
                Exception::TlbExecuteInhibit(address)
            }
            TranslationFault::ReadInhibited if page_grain.iec() => {
                Exception::TlbReadInhibit(address)
            }
            TranslationFault::ExecuteInhibited | TranslationFault::ReadInhibited => {
                Exception::TlbInvalidLoad(address)
            }
            TranslationFault::CapStoreInhibited => Exception::CapabilityStoreInhibit(address),
        }
    }
}

/// Implemented address widths of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AddressGeometry {
    pub is_64bit: bool,
    pub segbits: u32,
    pub pabits: u32,
}

impl AddressGeometry {
    /// Mask of the virtual address bits compared by the TLB. 32-bit
    /// addresses are kept sign-extended, so every bit takes part.
    #[inline]
    pub const fn segmask(self) -> u64 {
        if self.is_64bit {
            ones(self.segbits as u64) | (0b11 << 62)
        } else {
            !0
        }
    }

    /// Mask of the implemented physical address bits
    #[inline]
    pub const fn pamask(self) -> u64 {
        ones(self.pabits as u64)
    }

    /// Canonical register form of a virtual address
    #[inline]
    pub const fn canonical(self, address: Address) -> Address {
        if self.is_64bit {
            address
        } else {
            sign_extend_32(address)
        }
    }
}

/// Processor state consulted by a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressingContext {
    pub mode: ExecutionMode,
    pub status: Status,
    pub asid: u8,
    pub segments: SegmentControl,
    pub geometry: AddressGeometry,
}

impl AddressingContext {
    /// The same context in kernel mode, as used by the hardware page walker.
    /// Error level is kept so that ERL-unmapped segments stay unmapped.
    pub fn kernel(self) -> Self {
        let mode = match self.mode {
            ExecutionMode::ErrorLevel => ExecutionMode::ErrorLevel,
            _ => ExecutionMode::Kernel,
        };
        Self { mode, ..self }
    }
}

/// Translation strategy for mapped segments
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mmu {
    NoMmu,
    FixedMapping,
    R4k(Tlb),
}

impl Mmu {
    /// Translate an address of a mapped segment.
    pub fn map_address(
        &self,
        ctx: &AddressingContext,
        address: Address,
        access: AccessType,
    ) -> Result<Translation, TranslationFault> {
        match self {
            Mmu::NoMmu => Ok(Translation::unmapped(address)),
            Mmu::FixedMapping => Ok(Translation::unmapped(fixed_mapping(ctx, address))),
            Mmu::R4k(tlb) => tlb.lookup(address, ctx.asid, ctx.geometry.segmask(), access),
        }
    }

    pub fn tlb(&self) -> Option<&Tlb> {
        match self {
            Mmu::R4k(tlb) => Some(tlb),
            _ => None,
        }
    }

    pub fn tlb_mut(&mut self) -> Option<&mut Tlb> {
        match self {
            Mmu::R4k(tlb) => Some(tlb),
            _ => None,
        }
    }
}

/// Fixed mapping: useg is offset by 1 GiB unless at error level, kseg0 and
/// kseg1 fold onto the low 512 MiB and the remaining segments are identity
/// mapped.
fn fixed_mapping(ctx: &AddressingContext, address: Address) -> Address {
    let address = sign_extend_32(address);
    if address <= 0x7FFF_FFFF {
        if ctx.status.erl() {
            address
        } else {
            address + 0x4000_0000
        }
    } else if address <= sign_extend_32(0xBFFF_FFFF) {
        address & 0x1FFF_FFFF
    } else {
        address & 0xFFFF_FFFF
    }
}

/// Translate `address` for `access`. Only reads processor state.
pub fn get_physical_address(
    mmu: &Mmu,
    ctx: &AddressingContext,
    address: Address,
    access: AccessType,
) -> Result<Translation, TranslationFault> {
    match segment::decode(ctx, address)? {
        Route::Direct(physical) => Ok(Translation::unmapped(physical)),
        Route::Mapped => mmu.map_address(ctx, address, access),
    }
}
