// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! CPU model descriptions. A model is fixed when a [`Cpu`] is created and
//! selects the translation strategy and address-space geometry.
//!
//! [`Cpu`]: crate::machine_state::Cpu

use super::address_translation::AddressGeometry;
use super::bus::{Address, Endianness};

/// Architectural TLB entries supported at most
pub const MAX_TLB_ENTRIES: u32 = 64;

/// Width of general-purpose registers and virtual addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
pub enum AddressWidth {
    Bits32,
    Bits64,
}

/// Address translation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
pub enum MmuKind {
    /// Mapped segments translate to the same physical address
    NoMmu,
    /// Mapped segments use a fixed offset mapping
    FixedMapping,
    /// R4000-style software-managed TLB
    R4k,
}

/// Errors for models that cannot be instantiated
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Malformed model description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported number of TLB entries: {0}")]
    TlbEntries(u32),

    #[error("Unsupported virtual segment width: {0} bits")]
    SegBits(u32),

    #[error("Unsupported physical address width: {0} bits")]
    PaBits(u32),

    #[error("Unsupported capability size: {0} bytes")]
    CapabilitySize(u64),

    #[error("A hardware page walker requires a TLB")]
    WalkerWithoutTlb,
}

/// Description of a CPU model
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CpuModel {
    pub name: String,
    pub address_width: AddressWidth,
    pub mmu: MmuKind,
    /// Architectural TLB entries, excluding shadow entries
    pub tlb_entries: u32,
    /// Implemented virtual address bits of each 64-bit segment
    pub segbits: u32,
    /// Implemented physical address bits
    pub pabits: u32,
    /// Whether the hardware page-table walker is implemented
    pub page_walker: bool,
    /// Capability size in bytes, also the tag granule
    pub capability_size: u64,
    pub endianness: Endianness,
    /// Base of the boot exception vectors, used while `Status.BEV` is set
    pub exception_base: Address,
}

impl CpuModel {
    /// MIPS32 release 6 processor with a 32-entry TLB and page walker
    pub fn mips32r6() -> Self {
        Self {
            name: "mips32r6-generic".into(),
            address_width: AddressWidth::Bits32,
            mmu: MmuKind::R4k,
            tlb_entries: 32,
            segbits: 32,
            pabits: 32,
            page_walker: true,
            capability_size: 16,
            endianness: Endianness::Big,
            exception_base: 0xFFFF_FFFF_BFC0_0000,
        }
    }

    /// 64-bit CHERI processor with 128-bit capabilities
    pub fn cheri128() -> Self {
        Self {
            name: "cheri128".into(),
            address_width: AddressWidth::Bits64,
            mmu: MmuKind::R4k,
            tlb_entries: 64,
            segbits: 40,
            pabits: 36,
            page_walker: true,
            capability_size: 16,
            endianness: Endianness::Big,
            exception_base: 0xFFFF_FFFF_BFC0_0000,
        }
    }

    /// 64-bit CHERI processor with 256-bit capabilities
    pub fn cheri256() -> Self {
        Self {
            name: "cheri256".into(),
            capability_size: 32,
            ..Self::cheri128()
        }
    }

    /// 32-bit processor with fixed-mapping translation and no TLB
    pub fn fixed_mapping() -> Self {
        Self {
            name: "mips32-fmt".into(),
            mmu: MmuKind::FixedMapping,
            tlb_entries: 1,
            page_walker: false,
            ..Self::mips32r6()
        }
    }

    /// Load a model description from JSON.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    /// Check the model can be instantiated.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.tlb_entries == 0 || self.tlb_entries > MAX_TLB_ENTRIES {
            return Err(ModelError::TlbEntries(self.tlb_entries));
        }

        let (segbits, pabits) = match self.address_width {
            AddressWidth::Bits32 => (32..=32, 32..=36),
            AddressWidth::Bits64 => (32..=62, 32..=59),
        };
        if !segbits.contains(&self.segbits) {
            return Err(ModelError::SegBits(self.segbits));
        }
        if !pabits.contains(&self.pabits) {
            return Err(ModelError::PaBits(self.pabits));
        }

        if !matches!(self.capability_size, 16 | 32) {
            return Err(ModelError::CapabilitySize(self.capability_size));
        }

        if self.page_walker && self.mmu != MmuKind::R4k {
            return Err(ModelError::WalkerWithoutTlb);
        }

        Ok(())
    }

    #[inline]
    pub fn is_64bit(&self) -> bool {
        self.address_width == AddressWidth::Bits64
    }

    pub fn geometry(&self) -> AddressGeometry {
        AddressGeometry {
            is_64bit: self.is_64bit(),
            segbits: self.segbits,
            pabits: self.pabits,
        }
    }
}
