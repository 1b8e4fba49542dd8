// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Coprocessor 0 registers taking part in address translation and exception
//! delivery.
//!
//! Guest writes go through [`Cp0::write`], which applies the writable-field
//! masks of each register and reports whether cached translations became
//! stale.

pub mod bits;
pub mod context;
pub mod entry;
pub mod pwalk;
pub mod segctl;
pub mod status;

use context::{xcontext_with_bad_address, Context};
use entry::{EntryHi, EntryLo, Index, PageGrain, PageMask};
use pwalk::{PWCtl, PWField, PWSize};
use segctl::{SegCtl0, SegCtl1, SegCtl2, SegmentControl};
use status::{Cause, Status};

use super::{
    address_translation::{
        page_walk::WalkerConfig,
        tlb::{TlbContext, TlbRegisters},
        AddressGeometry, AddressingContext,
    },
    bus::Address,
    cpu_model::CpuModel,
};
use crate::bits::{sign_extend_32, Bits64};

/// Reset value of `EBase`
const EBASE_RESET: u64 = 0xFFFF_FFFF_8000_0000;

/// Writable bits of `EBase`
const EBASE_WRITABLE: u64 = 0x3FFF_F000;

/// `Context.PTEBase`
const CONTEXT_PTE_BASE: u64 = !0x7F_FFFF;

/// Writable bits of `Cause`: the software interrupt requests
const CAUSE_WRITABLE: u64 = 0x300;

/// `Status` bits that only exist on 64-bit processors
const STATUS_64BIT_ONLY: u64 = (1 << Status::UX_OFFSET)
    | (1 << Status::SX_OFFSET)
    | (1 << Status::KX_OFFSET)
    | (1 << Status::PX_OFFSET)
    | (1 << Status::MX_OFFSET);

/// CP0 registers by name
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Cp0Register {
    Index,
    Random,
    EntryLo0,
    EntryLo1,
    Context,
    PageMask,
    PageGrain,
    SegCtl0,
    SegCtl1,
    SegCtl2,
    PWBase,
    PWField,
    PWSize,
    Wired,
    PWCtl,
    BadVAddr,
    EntryHi,
    Status,
    Cause,
    EPC,
    EBase,
    XContext,
    ErrorEPC,
}

impl Cp0Register {
    /// Register and select number used by `mfc0`/`mtc0`
    pub fn number(self) -> (u8, u8) {
        match self {
            Self::Index => (0, 0),
            Self::Random => (1, 0),
            Self::EntryLo0 => (2, 0),
            Self::EntryLo1 => (3, 0),
            Self::Context => (4, 0),
            Self::PageMask => (5, 0),
            Self::PageGrain => (5, 1),
            Self::SegCtl0 => (5, 2),
            Self::SegCtl1 => (5, 3),
            Self::SegCtl2 => (5, 4),
            Self::PWBase => (5, 5),
            Self::PWField => (5, 6),
            Self::PWSize => (5, 7),
            Self::Wired => (6, 0),
            Self::PWCtl => (6, 6),
            Self::BadVAddr => (8, 0),
            Self::EntryHi => (10, 0),
            Self::Status => (12, 0),
            Self::Cause => (13, 0),
            Self::EPC => (14, 0),
            Self::EBase => (15, 1),
            Self::XContext => (20, 0),
            Self::ErrorEPC => (30, 0),
        }
    }

    /// The register with the given register and select number
    pub fn from_number(register: u8, select: u8) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|reg| reg.number() == (register, select))
    }

    #[inline]
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Random | Self::BadVAddr)
    }
}

/// What a register write means for cached translations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    None,
    /// Segment decoding or the execution mode changed
    DecodingChanged,
    /// `EntryHi.ASID` changed
    AsidChanged,
}

/// Replacement index generator behind `Random` and `tlbwr`.
///
/// A linear congruential generator which never yields the same index twice
/// in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RandomIndex {
    seed: u32,
    previous: u32,
}

impl Default for RandomIndex {
    fn default() -> Self {
        Self {
            seed: 1,
            previous: 0,
        }
    }
}

impl RandomIndex {
    /// Next index in `[wired, entries)`
    pub fn next(&mut self, wired: u32, entries: u32) -> u32 {
        let candidates = entries.saturating_sub(wired);
        if candidates <= 1 {
            return entries.saturating_sub(1);
        }

        loop {
            self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let index = (self.seed >> 16) % candidates + wired;
            if index != self.previous {
                self.previous = index;
                return index;
            }
        }
    }
}

/// Translation and exception registers of one processor
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cp0 {
    pub index: Index,
    pub random: RandomIndex,
    pub entry_lo0: EntryLo,
    pub entry_lo1: EntryLo,
    pub context: Context,
    pub page_mask: PageMask,
    pub page_grain: PageGrain,
    pub segments: SegmentControl,
    pub pw_base: Address,
    pub pw_field: PWField,
    pub pw_size: PWSize,
    pub wired: u32,
    pub pw_ctl: PWCtl,
    pub bad_vaddr: Address,
    pub entry_hi: EntryHi,
    pub status: Status,
    pub cause: Cause,
    pub epc: Address,
    pub ebase: Address,
    pub xcontext: u64,
    pub error_epc: Address,
    /// CHERI `CapCause`
    pub cap_cause: u16,
    geometry: AddressGeometry,
    tlb_entries: u32,
}

impl Cp0 {
    /// Registers in their reset state
    pub fn new(model: &CpuModel) -> Self {
        Self {
            index: Index::from_bits(0),
            random: RandomIndex::default(),
            entry_lo0: EntryLo::from_bits(0),
            entry_lo1: EntryLo::from_bits(0),
            context: Context::from_bits(0),
            page_mask: PageMask::from_bits(0),
            page_grain: PageGrain::from_bits(0),
            segments: SegmentControl::legacy(),
            pw_base: 0,
            pw_field: PWField::from_bits(0),
            pw_size: PWSize::from_bits(0),
            wired: 0,
            pw_ctl: PWCtl::from_bits(0),
            bad_vaddr: 0,
            entry_hi: EntryHi::from_bits(0),
            status: Status::reset(),
            cause: Cause::from_bits(0),
            epc: 0,
            ebase: EBASE_RESET,
            xcontext: 0,
            error_epc: 0,
            cap_cause: 0,
            geometry: model.geometry(),
            tlb_entries: model.tlb_entries,
        }
    }

    #[inline]
    pub fn geometry(&self) -> AddressGeometry {
        self.geometry
    }

    /// State consulted when translating an address in the current mode
    #[inline]
    pub fn addressing_context(&self) -> AddressingContext {
        AddressingContext {
            mode: self.status.execution_mode(),
            status: self.status,
            asid: self.entry_hi.asid_value(),
            segments: self.segments,
            geometry: self.geometry,
        }
    }

    #[inline]
    pub fn tlb_context(&self) -> TlbContext {
        TlbContext {
            asid: self.entry_hi.asid_value(),
            geometry: self.geometry,
            page_grain: self.page_grain,
        }
    }

    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            base: self.pw_base,
            field: self.pw_field,
            size: self.pw_size,
            ctl: self.pw_ctl,
        }
    }

    /// Values `tlbwi` and `tlbwr` write
    pub fn tlb_registers(&self) -> TlbRegisters {
        TlbRegisters {
            entry_hi: self.entry_hi,
            entry_lo0: self.entry_lo0,
            entry_lo1: self.entry_lo1,
            page_mask: self.page_mask,
        }
    }

    /// Load the result of `tlbr`.
    pub fn set_tlb_registers(&mut self, registers: TlbRegisters) {
        self.entry_hi = registers.entry_hi;
        self.entry_lo0 = registers.entry_lo0;
        self.entry_lo1 = registers.entry_lo1;
        self.page_mask = registers.page_mask;
    }

    /// Record the faulting address of a TLB exception in `EntryHi`, keeping
    /// the ASID.
    pub fn set_entry_hi_vpn2(&mut self, address: Address) {
        let keep = self.entry_hi.raw() & (0xFF | (1 << EntryHi::EHINV_OFFSET));
        let value = keep | (address & EntryHi::VPN2_MASK);
        self.entry_hi = EntryHi::from_bits(self.mask_virtual(value));
    }

    /// Record the faulting address in `Context` and `XContext`.
    pub fn set_context_bad_address(&mut self, address: Address) {
        self.context = self.context.with_bad_address(address);
        if self.geometry.is_64bit {
            self.xcontext = xcontext_with_bad_address(self.xcontext, address, self.geometry.segbits);
        }
    }

    /// Read a register as `mfc0`/`dmfc0` would. Reading `Random` advances the
    /// replacement generator.
    pub fn read(&mut self, reg: Cp0Register) -> u64 {
        let value = match reg {
            Cp0Register::Index => self.index.raw(),
            Cp0Register::Random => self.random.next(self.wired, self.tlb_entries) as u64,
            Cp0Register::EntryLo0 => self.entry_lo_view(self.entry_lo0),
            Cp0Register::EntryLo1 => self.entry_lo_view(self.entry_lo1),
            Cp0Register::Context => self.context.raw(),
            Cp0Register::PageMask => self.page_mask.raw(),
            Cp0Register::PageGrain => self.page_grain.raw(),
            Cp0Register::SegCtl0 => self.segments.seg_ctl0.raw(),
            Cp0Register::SegCtl1 => self.segments.seg_ctl1.raw(),
            Cp0Register::SegCtl2 => self.segments.seg_ctl2.raw(),
            Cp0Register::PWBase => self.pw_base,
            Cp0Register::PWField => self.pw_field.raw(),
            Cp0Register::PWSize => self.pw_size.raw(),
            Cp0Register::Wired => self.wired as u64,
            Cp0Register::PWCtl => self.pw_ctl.raw(),
            Cp0Register::BadVAddr => self.bad_vaddr,
            Cp0Register::EntryHi => self.entry_hi.raw(),
            Cp0Register::Status => self.status.raw(),
            Cp0Register::Cause => self.cause.raw(),
            Cp0Register::EPC => self.epc,
            Cp0Register::EBase => self.ebase,
            Cp0Register::XContext => self.xcontext,
            Cp0Register::ErrorEPC => self.error_epc,
        };

        if self.geometry.is_64bit {
            value
        } else {
            sign_extend_32(value)
        }
    }

    /// Write a register as `mtc0`/`dmtc0` would. Read-only registers and
    /// fields keep their value.
    pub fn write(&mut self, reg: Cp0Register, value: u64) -> WriteEffect {
        let value = if self.geometry.is_64bit {
            value
        } else {
            sign_extend_32(value)
        };

        match reg {
            Cp0Register::Random | Cp0Register::BadVAddr => {}

            Cp0Register::Index => {
                let mask = (self.tlb_entries as u64 + 1).next_power_of_two() - 1;
                self.index = Index::from_bits((self.index.raw() & (1 << Index::P_OFFSET)) | (value & mask));
            }
            Cp0Register::EntryLo0 => self.entry_lo0 = self.entry_lo_from(value),
            Cp0Register::EntryLo1 => self.entry_lo1 = self.entry_lo_from(value),
            Cp0Register::Context => {
                let bad_vpn2 = self.context.raw() & !CONTEXT_PTE_BASE;
                self.context = Context::from_bits((value & CONTEXT_PTE_BASE) | bad_vpn2);
            }
            Cp0Register::PageMask => {
                if let Some(page_mask) = PageMask::try_from_raw(value) {
                    self.page_mask = page_mask;
                }
            }
            Cp0Register::PageGrain => {
                let written = PageGrain::from_bits(value);
                self.page_grain = PageGrain::from_bits(0)
                    .with_rie(written.rie())
                    .with_xie(written.xie())
                    .with_iec(written.iec());
            }
            Cp0Register::SegCtl0 => {
                self.segments.seg_ctl0 = SegCtl0::from_bits(value);
                return WriteEffect::DecodingChanged;
            }
            Cp0Register::SegCtl1 => {
                self.segments.seg_ctl1 = SegCtl1::from_bits(value);
                return WriteEffect::DecodingChanged;
            }
            Cp0Register::SegCtl2 => {
                self.segments.seg_ctl2 = SegCtl2::from_bits(value);
                return WriteEffect::DecodingChanged;
            }
            Cp0Register::PWBase => self.pw_base = value,
            Cp0Register::PWField => self.pw_field = PWField::from_bits(value),
            Cp0Register::PWSize => self.pw_size = PWSize::from_bits(value),
            Cp0Register::Wired => {
                if value < self.tlb_entries as u64 {
                    self.wired = value as u32;
                }
            }
            Cp0Register::PWCtl => self.pw_ctl = PWCtl::from_bits(value),
            Cp0Register::EntryHi => {
                let asid = self.entry_hi.asid_value();
                let writable = EntryHi::VPN2_MASK | 0xFF | (1 << EntryHi::EHINV_OFFSET);
                self.entry_hi = EntryHi::from_bits(self.mask_virtual(value & writable));
                if asid != self.entry_hi.asid_value() {
                    return WriteEffect::AsidChanged;
                }
            }
            Cp0Register::Status => {
                let value = if self.geometry.is_64bit {
                    value
                } else {
                    value & !STATUS_64BIT_ONLY
                };
                let before = self.status.decoding_bits();
                self.status = Status::from_bits(value);
                if before != self.status.decoding_bits() {
                    return WriteEffect::DecodingChanged;
                }
            }
            Cp0Register::Cause => {
                let kept = self.cause.raw() & !CAUSE_WRITABLE;
                self.cause = Cause::from_bits(kept | (value & CAUSE_WRITABLE));
            }
            Cp0Register::EPC => self.epc = value,
            Cp0Register::EBase => {
                self.ebase = (self.ebase & !EBASE_WRITABLE) | (value & EBASE_WRITABLE);
            }
            Cp0Register::XContext => {
                let pte_base = !0 << (self.geometry.segbits - 7);
                self.xcontext = (self.xcontext & !pte_base) | (value & pte_base);
            }
            Cp0Register::ErrorEPC => self.error_epc = value,
        }

        WriteEffect::None
    }

    fn entry_lo_from(&self, value: u64) -> EntryLo {
        if self.geometry.is_64bit {
            EntryLo::from_bits(value)
        } else {
            EntryLo::from_bits_32(value as u32)
        }
    }

    fn entry_lo_view(&self, entry_lo: EntryLo) -> u64 {
        if self.geometry.is_64bit {
            entry_lo.raw()
        } else {
            entry_lo.to_bits_32() as u64
        }
    }

    /// Virtual address register values keep only implemented bits.
    fn mask_virtual(&self, value: u64) -> u64 {
        if self.geometry.is_64bit {
            value & self.geometry.segmask()
        } else {
            sign_extend_32(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cp0, Cp0Register, RandomIndex, WriteEffect};
    use crate::machine_state::{cpu_model::CpuModel, mode::ExecutionMode};
    use proptest::{prop_assert, prop_assert_ne, proptest};
    use strum::IntoEnumIterator;

    #[test]
    fn register_numbers_are_unique() {
        for reg in Cp0Register::iter() {
            let (number, select) = reg.number();
            assert_eq!(Cp0Register::from_number(number, select), Some(reg));
        }
        assert_eq!(Cp0Register::from_number(5, 5), Some(Cp0Register::PWBase));
        assert_eq!(Cp0Register::from_number(31, 0), None);
    }

    #[test]
    fn reset_state() {
        let cp0 = Cp0::new(&CpuModel::mips32r6());
        assert_eq!(
            cp0.addressing_context().mode,
            ExecutionMode::ErrorLevel
        );
        assert!(cp0.status.bev());
        assert_eq!(cp0.ebase, 0xFFFF_FFFF_8000_0000);
    }

    #[test]
    fn random_stays_in_range() {
        proptest!(|(wired in 0_u32..16, reads in 1_usize..64)| {
            let mut random = RandomIndex::default();
            let mut previous = None;
            for _ in 0..reads {
                let index = random.next(wired, 16);
                prop_assert!((wired..16).contains(&index));
                if wired < 15 {
                    prop_assert_ne!(Some(index), previous);
                }
                previous = Some(index);
            }
        });
    }

    #[test]
    fn random_with_single_candidate() {
        let mut random = RandomIndex::default();
        assert_eq!(random.next(15, 16), 15);
        assert_eq!(random.next(15, 16), 15);
        assert_eq!(random.next(0, 1), 0);
    }

    #[test]
    fn write_masks() {
        let mut cp0 = Cp0::new(&CpuModel::mips32r6());

        cp0.write(Cp0Register::Index, 0xFFFF_FFFF);
        assert_eq!(cp0.read(Cp0Register::Index), 0x3F);

        cp0.write(Cp0Register::Wired, 40);
        assert_eq!(cp0.wired, 0);
        cp0.write(Cp0Register::Wired, 4);
        assert_eq!(cp0.wired, 4);

        cp0.write(Cp0Register::PageMask, 0x1 << 13);
        assert_eq!(cp0.read(Cp0Register::PageMask), 0);
        cp0.write(Cp0Register::PageMask, 0x3 << 13);
        assert_eq!(cp0.read(Cp0Register::PageMask), 0x6000);

        cp0.write(Cp0Register::Cause, 0xFFFF_FFFF);
        assert_eq!(cp0.read(Cp0Register::Cause), 0x300);

        cp0.write(Cp0Register::EBase, 0);
        assert_eq!(cp0.read(Cp0Register::EBase), 0xFFFF_FFFF_8000_0000);

        let bad_vaddr = cp0.read(Cp0Register::BadVAddr);
        cp0.write(Cp0Register::BadVAddr, 0x1234);
        assert_eq!(cp0.read(Cp0Register::BadVAddr), bad_vaddr);
    }

    #[test]
    fn write_effects() {
        let mut cp0 = Cp0::new(&CpuModel::mips32r6());

        assert_eq!(cp0.write(Cp0Register::EntryHi, 0x4000_2003), WriteEffect::AsidChanged);
        assert_eq!(cp0.write(Cp0Register::EntryHi, 0x4000_6003), WriteEffect::None);
        // Reserved bits are dropped, 32-bit values sign-extend
        cp0.write(Cp0Register::EntryHi, 0x8000_1B03);
        assert_eq!(cp0.read(Cp0Register::EntryHi), 0xFFFF_FFFF_8000_0003);

        assert_eq!(cp0.write(Cp0Register::Status, 0x0000_0010), WriteEffect::DecodingChanged);
        assert_eq!(cp0.addressing_context().mode, ExecutionMode::User);
        // IE does not influence decoding
        assert_eq!(cp0.write(Cp0Register::Status, 0x0000_0011), WriteEffect::None);
        // UX does not exist on 32-bit processors
        assert_eq!(cp0.write(Cp0Register::Status, 0x0000_0031), WriteEffect::None);

        assert_eq!(cp0.write(Cp0Register::SegCtl1, 0), WriteEffect::DecodingChanged);
    }

    #[test]
    fn entry_lo_views() {
        let mut cp0 = Cp0::new(&CpuModel::mips32r6());
        cp0.write(Cp0Register::EntryLo0, 0xC000_0007);
        assert!(cp0.entry_lo0.ri());
        assert!(cp0.entry_lo0.xi());
        assert_eq!(cp0.read(Cp0Register::EntryLo0), 0xFFFF_FFFF_C000_0007);

        let mut cp0 = Cp0::new(&CpuModel::cheri128());
        cp0.write(Cp0Register::EntryLo0, 0xC000_0000_0000_0007);
        assert!(cp0.entry_lo0.ri());
        assert_eq!(cp0.read(Cp0Register::EntryLo0), 0xC000_0000_0000_0007);
    }

    #[test]
    fn fault_address_registers() {
        let mut cp0 = Cp0::new(&CpuModel::cheri128());
        cp0.write(Cp0Register::EntryHi, 0x2A);
        cp0.set_entry_hi_vpn2(0xC000_0012_3456_7890);
        // ASID kept, VPN2 masked to SEGBITS
        assert_eq!(cp0.entry_hi.raw(), 0xC000_0012_3456_602A);

        cp0.write(Cp0Register::XContext, !0);
        cp0.set_context_bad_address(0x4000_0000_0000_2000);
        assert_eq!(cp0.xcontext >> 33, !0 >> 33);
        assert_eq!((cp0.xcontext >> 31) & 0b11, 0b01);
        assert_eq!((cp0.xcontext >> 4) & 0x7FF_FFFF, 1);
    }
}
