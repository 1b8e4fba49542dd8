// SPDX-FileCopyrightText: 2023-2025 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2024 Nomadic Labs <contact@nomadic-labs.com>
//
// SPDX-License-Identifier: MIT

pub mod address_translation;
pub mod bus;
pub mod cp0;
pub mod cpu_model;
mod exception_handling;
pub mod memory_access;
pub mod mode;
pub mod reservation_set;
pub mod tag_memory;

use address_translation::{
    get_physical_address,
    page_walk::{self, WalkAbort},
    tlb::Tlb,
    translation_cache::TranslationCache,
    AccessType, AddressingContext, Mmu, Translation, TranslationFault,
};
use bus::{Address, Bus, Endianness, Word};
use cp0::{entry::Index, Cp0, Cp0Register, WriteEffect};
use cpu_model::{CpuModel, MmuKind, ModelError};
pub use exception_handling::BranchSize;
use reservation_set::ReservationSet;

use crate::{
    bits::Bits64,
    log::{debug, trace},
    snapshot,
    traps::Exception,
};

/// Address translation state of one processor.
///
/// The processor owns its CP0 registers, TLB, translation cache and LL
/// reservation. Physical memory and the tag store are shared between
/// processors and passed to each operation that needs them.
pub struct Cpu {
    model: CpuModel,
    pub cp0: Cp0,
    mmu: Mmu,
    translation_cache: TranslationCache,
    pub reservation_set: ReservationSet,
}

impl Cpu {
    /// A processor of the given model in its reset state.
    pub fn new(model: CpuModel) -> Result<Self, ModelError> {
        model.validate()?;

        let mmu = match model.mmu {
            MmuKind::NoMmu => Mmu::NoMmu,
            MmuKind::FixedMapping => Mmu::FixedMapping,
            MmuKind::R4k => Mmu::R4k(Tlb::new(model.tlb_entries as usize)),
        };

        Ok(Self {
            cp0: Cp0::new(&model),
            mmu,
            translation_cache: TranslationCache::new(),
            reservation_set: ReservationSet::new(),
            model,
        })
    }

    #[inline]
    pub fn model(&self) -> &CpuModel {
        &self.model
    }

    #[inline]
    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    #[inline]
    pub fn tlb(&self) -> Option<&Tlb> {
        self.mmu.tlb()
    }

    /// Translate `address` for `access`.
    ///
    /// A TLB miss starts the hardware page walker when there is one. A
    /// successful walk installs the refill like `tlbwr` and the translation
    /// is retried once. Capability and tag accesses always come through here,
    /// bypassing the translation cache.
    pub fn translate<B: Bus>(
        &mut self,
        bus: &B,
        address: Address,
        access: AccessType,
    ) -> Result<Translation, Exception> {
        let address = self.cp0.geometry().canonical(address);
        let ctx = self.cp0.addressing_context();

        let mut result = get_physical_address(&self.mmu, &ctx, address, access);
        if result == Err(TranslationFault::NoMatch)
            && self.refill_from_page_tables(bus, &ctx, address)
        {
            result = get_physical_address(&self.mmu, &ctx, address, access);
        }

        result.map_err(|fault| fault.exception(access, address, self.cp0.page_grain))
    }

    /// Physical address of an ordinary fetch, load or store, going through
    /// the translation cache.
    pub(crate) fn translate_cached<B: Bus>(
        &mut self,
        bus: &B,
        address: Address,
        access: AccessType,
    ) -> Result<Address, Exception> {
        let address = self.cp0.geometry().canonical(address);
        let mode = self.cp0.status.execution_mode();
        let asid = self.cp0.entry_hi.asid_value();

        if let Some(physical) = self
            .translation_cache
            .try_translate(mode, asid, address, access)
        {
            return Ok(physical);
        }

        let translation = self.translate(bus, address, access)?;
        self.translation_cache
            .update(mode, asid, address, &translation);
        Ok(translation.physical)
    }

    /// Run the hardware page walker for `address` and install its result.
    /// Returns whether an entry was installed. A failed walk changes nothing.
    fn refill_from_page_tables<B: Bus>(
        &mut self,
        bus: &B,
        ctx: &AddressingContext,
        address: Address,
    ) -> bool {
        let has_tlb = matches!(self.mmu.tlb(), Some(tlb) if tlb.size() > 1);
        if !self.model.page_walker || !has_tlb {
            return false;
        }

        let kernel = ctx.kernel();
        let endianness = self.model.endianness;
        let mmu = &self.mmu;
        let read_entry = |entry_address: Address, shift: u32| {
            let entry_address = kernel.geometry.canonical(entry_address);
            let physical = get_physical_address(mmu, &kernel, entry_address, AccessType::Load)
                .map_err(|_| WalkAbort::Translation(entry_address))?
                .physical;
            read_table_entry(bus, physical, shift, endianness)
        };

        let refill = match page_walk::walk(
            &self.cp0.walker_config(),
            address,
            ctx.asid,
            read_entry,
        ) {
            Ok(refill) => refill,
            Err(abort) => {
                trace!("Page walk for {:#x} abandoned: {}", address, abort);
                return false;
            }
        };

        let tlb_ctx = self.cp0.tlb_context();
        let Some(tlb) = self.mmu.tlb_mut() else {
            return false;
        };
        let slot = self.cp0.random.next(self.cp0.wired, tlb.size() as u32);
        trace!("Page walk for {:#x} refills slot {}", address, slot);
        tlb.write_random(slot as usize, &refill, &tlb_ctx, &mut self.translation_cache);
        true
    }

    /// Read a CP0 register, as `mfc0`/`dmfc0` would.
    pub fn read_cp0(&mut self, reg: Cp0Register) -> u64 {
        self.cp0.read(reg)
    }

    /// Write a CP0 register, as `mtc0`/`dmtc0` would, dropping cached
    /// translations the write makes stale.
    pub fn write_cp0(&mut self, reg: Cp0Register, value: u64) {
        match self.cp0.write(reg, value) {
            WriteEffect::None => {}
            WriteEffect::DecodingChanged => self.translation_cache.invalidate(),
            WriteEffect::AsidChanged => match self.mmu.tlb_mut() {
                Some(tlb) => tlb.flush(&mut self.translation_cache),
                None => self.translation_cache.invalidate(),
            },
        }
    }

    /// Split borrow of the TLB and the translation cache
    fn tlb_and_cache(&mut self) -> Result<(&mut Tlb, &mut TranslationCache), Exception> {
        match self.mmu.tlb_mut() {
            Some(tlb) => Ok((tlb, &mut self.translation_cache)),
            None => Err(Exception::ReservedInstruction),
        }
    }

    /// `tlbwi`
    pub fn tlbwi(&mut self) -> Result<(), Exception> {
        let index = self.cp0.index.index().to_bits() as usize;
        let registers = self.cp0.tlb_registers();
        let ctx = self.cp0.tlb_context();
        let (tlb, cache) = self.tlb_and_cache()?;
        debug!("tlbwi {}: {:?}", index, registers);
        tlb.write_indexed(index, &registers, &ctx, cache);
        Ok(())
    }

    /// `tlbwr`
    pub fn tlbwr(&mut self) -> Result<(), Exception> {
        let registers = self.cp0.tlb_registers();
        let ctx = self.cp0.tlb_context();
        let wired = self.cp0.wired;
        let size = self.tlb_and_cache()?.0.size() as u32;
        let slot = self.cp0.random.next(wired, size);

        let (tlb, cache) = self.tlb_and_cache()?;
        debug!("tlbwr {}: {:?}", slot, registers);
        tlb.write_random(slot as usize, &registers, &ctx, cache);
        Ok(())
    }

    /// `tlbp`: on a hit `Index` holds the matching entry, on a miss `Index.P`
    /// is set.
    pub fn tlbp(&mut self) -> Result<(), Exception> {
        let entry_hi = self.cp0.entry_hi;
        let ctx = self.cp0.tlb_context();
        let (tlb, cache) = self.tlb_and_cache()?;

        self.cp0.index = match tlb.probe(entry_hi, &ctx, cache) {
            Some(index) => Index::from_bits(index as u64),
            None => self.cp0.index.with_p(true),
        };
        Ok(())
    }

    /// `tlbr`
    pub fn tlbr(&mut self) -> Result<(), Exception> {
        let index = self.cp0.index.index().to_bits() as usize;
        let ctx = self.cp0.tlb_context();
        let (tlb, cache) = self.tlb_and_cache()?;

        let registers = tlb.read(index, &ctx, cache);
        self.cp0.set_tlb_registers(registers);
        Ok(())
    }

    /// `tlbinv`
    pub fn tlbinv(&mut self) -> Result<(), Exception> {
        let asid = self.cp0.entry_hi.asid_value();
        let (tlb, cache) = self.tlb_and_cache()?;
        tlb.invalidate_asid(asid, cache);
        Ok(())
    }

    /// `tlbinvf`
    pub fn tlbinvf(&mut self) -> Result<(), Exception> {
        let (tlb, cache) = self.tlb_and_cache()?;
        tlb.invalidate_all(cache);
        Ok(())
    }

    /// Capture the architectural state of the processor.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            model: self.model.clone(),
            cp0: self.cp0.clone(),
            mmu: self.mmu.clone(),
            reservation_set: self.reservation_set,
        }
    }

    /// Rebuild a processor from a snapshot. The translation cache starts
    /// empty.
    pub fn restore(snapshot: CpuSnapshot) -> Result<Self, ModelError> {
        snapshot.model.validate()?;
        Ok(Self {
            model: snapshot.model,
            cp0: snapshot.cp0,
            mmu: snapshot.mmu,
            translation_cache: TranslationCache::new(),
            reservation_set: snapshot.reservation_set,
        })
    }
}

/// Read one page table entry of `1 << shift` bytes.
fn read_table_entry<B: Bus>(
    bus: &B,
    physical: Address,
    shift: u32,
    endianness: Endianness,
) -> Result<u64, WalkAbort> {
    let mut buf = [0u8; 8];
    match shift {
        2 => {
            bus.read(physical, &mut buf[..4])
                .map_err(|_| WalkAbort::BusError(physical))?;
            Ok(u32::from_bytes(&buf, endianness) as u64)
        }
        3 => {
            bus.read(physical, &mut buf)
                .map_err(|_| WalkAbort::BusError(physical))?;
            Ok(u64::from_bytes(&buf, endianness))
        }
        _ => Err(WalkAbort::EntryWidth(1 << shift)),
    }
}

/// Serialisable state of a [`Cpu`]: model, CP0 registers, TLB including
/// shadow entries, and the LL reservation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CpuSnapshot {
    pub model: CpuModel,
    pub cp0: Cp0,
    pub mmu: Mmu,
    pub reservation_set: ReservationSet,
}

impl CpuSnapshot {
    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        snapshot::serialise(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        snapshot::deserialise(bytes)
    }
}
