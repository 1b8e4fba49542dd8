// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Memory accesses of a [`Cpu`].
//!
//! Ordinary fetches, loads and stores go through the translation cache.
//! Capability accesses and tag operations retranslate on every call, so they
//! see TLB changes made in between and fault exactly like the ordinary
//! access of the same kind.
//!
//! Every store clears the tags of the capability slots it touches. Stores
//! crossing a page are split before they reach the tag store, which only
//! accepts ranges inside one physical page.

use super::{
    address_translation::{AccessType, Protection, PAGE_SIZE},
    bus::{Address, Bus, RegionKind, Word},
    tag_memory::{TagDirectory, TagError},
    Cpu,
};
use crate::{
    log::{error, trace},
    traps::Exception,
};

const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Contents of a capability-sized memory slot together with its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// Exactly one capability size of bytes
    pub data: Vec<u8>,
    pub tag: bool,
}

/// Failure of [`Cpu::invalidate_tags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagRangeError {
    #[error(transparent)]
    Exception(#[from] Exception),

    #[error(transparent)]
    Tag(#[from] TagError),
}

/// What backs a physical address, as far as tags are concerned
enum TagBacking {
    Ram(u64),
    Io,
    /// ROM or nothing: tags cannot be changed
    ReadOnly,
}

fn tag_backing<B: Bus>(bus: &B, physical: Address) -> TagBacking {
    match bus.resolve(physical) {
        Some(region) => match (region.kind, region.ram_offset) {
            (RegionKind::Ram, Some(ram_offset)) => TagBacking::Ram(ram_offset),
            (RegionKind::Io, _) => TagBacking::Io,
            _ => TagBacking::ReadOnly,
        },
        None => TagBacking::ReadOnly,
    }
}

/// Whether `len` bytes at `physical` lie in one RAM or IO region. IO devices
/// may still refuse the write.
fn is_writable<B: Bus>(bus: &B, physical: Address, len: usize) -> bool {
    bus.resolve(physical).is_some_and(|region| {
        matches!(region.kind, RegionKind::Ram | RegionKind::Io) && region.remaining >= len as u64
    })
}

#[inline]
fn bus_error(access: AccessType, address: Address) -> Exception {
    match access {
        AccessType::Instruction => Exception::InstructionBusError(address),
        _ => Exception::DataBusError(address),
    }
}

#[inline]
fn check_alignment(access: AccessType, address: Address, size: u64) -> Result<(), Exception> {
    if address & (size - 1) == 0 {
        Ok(())
    } else if access.is_store() {
        Err(Exception::AddressErrorStore(address))
    } else {
        Err(Exception::AddressErrorLoad(address))
    }
}

/// Split `[address, address + len)` at page boundaries into
/// `(offset, length)` pieces.
fn page_chunks(address: Address, len: usize) -> impl Iterator<Item = (usize, usize)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset >= len {
            return None;
        }
        let current = address.wrapping_add(offset as u64);
        let room = (PAGE_SIZE - (current & PAGE_OFFSET_MASK)) as usize;
        let chunk = (offset, room.min(len - offset));
        offset += chunk.1;
        Some(chunk)
    })
}

/// Tag directory failures are host misconfigurations. The guest sees a bus
/// error.
fn tag_failure(address: Address, err: TagError) -> Exception {
    error!("Tag access at {:#x} failed: {}", address, err);
    Exception::DataBusError(address)
}

impl Cpu {
    /// Fetch the instruction word at `address`.
    pub fn fetch<B: Bus>(&mut self, bus: &B, address: Address) -> Result<u32, Exception> {
        self.read_word(bus, address, AccessType::Instruction)
    }

    /// Load a naturally aligned word.
    pub fn load<W: Word, B: Bus>(&mut self, bus: &B, address: Address) -> Result<W, Exception> {
        self.read_word(bus, address, AccessType::Load)
    }

    fn read_word<W: Word, B: Bus>(
        &mut self,
        bus: &B,
        address: Address,
        access: AccessType,
    ) -> Result<W, Exception> {
        let address = self.cp0.geometry().canonical(address);
        check_alignment(access, address, W::SIZE as u64)?;
        let physical = self.translate_cached(bus, address, access)?;

        let mut buf = [0u8; 8];
        bus.read(physical, &mut buf[..W::SIZE])
            .map_err(|_| bus_error(access, address))?;
        Ok(W::from_bytes(&buf, self.model.endianness))
    }

    /// Store a naturally aligned word.
    pub fn store<W: Word, B: Bus>(
        &mut self,
        bus: &mut B,
        tags: &TagDirectory,
        address: Address,
        value: W,
    ) -> Result<(), Exception> {
        let address = self.cp0.geometry().canonical(address);
        check_alignment(AccessType::Store, address, W::SIZE as u64)?;
        let physical = self.translate_cached(bus, address, AccessType::Store)?;

        let mut buf = [0u8; 8];
        value.to_bytes(&mut buf, self.model.endianness);
        self.write_physical(bus, tags, address, physical, &buf[..W::SIZE])
    }

    /// Load `buf.len()` bytes from any address.
    pub fn load_bytes<B: Bus>(
        &mut self,
        bus: &B,
        address: Address,
        buf: &mut [u8],
    ) -> Result<(), Exception> {
        let address = self.cp0.geometry().canonical(address);
        for (offset, len) in page_chunks(address, buf.len()) {
            let current = address.wrapping_add(offset as u64);
            let physical = self.translate_cached(bus, current, AccessType::Load)?;
            bus.read(physical, &mut buf[offset..offset + len])
                .map_err(|_| Exception::DataBusError(current))?;
        }
        Ok(())
    }

    /// Store `data` at any address. Every page is translated, and its target
    /// checked to be writable, before the first byte is written.
    pub fn store_bytes<B: Bus>(
        &mut self,
        bus: &mut B,
        tags: &TagDirectory,
        address: Address,
        data: &[u8],
    ) -> Result<(), Exception> {
        let address = self.cp0.geometry().canonical(address);
        let pieces = page_chunks(address, data.len())
            .map(|(offset, len)| {
                let current = address.wrapping_add(offset as u64);
                let physical = self.translate_cached(bus, current, AccessType::Store)?;
                if !is_writable(bus, physical, len) {
                    return Err(Exception::DataBusError(current));
                }
                Ok((current, physical, offset, len))
            })
            .collect::<Result<Vec<_>, Exception>>()?;

        for (current, physical, offset, len) in pieces {
            self.write_physical(bus, tags, current, physical, &data[offset..offset + len])?;
        }
        Ok(())
    }

    /// `ll`/`lld`: load and reserve the location.
    pub fn load_linked<W: Word, B: Bus>(
        &mut self,
        bus: &B,
        address: Address,
    ) -> Result<W, Exception> {
        let address = self.cp0.geometry().canonical(address);
        check_alignment(AccessType::Load, address, W::SIZE as u64)?;
        let physical = self.translate_cached(bus, address, AccessType::Load)?;

        let mut buf = [0u8; 8];
        bus.read(physical, &mut buf[..W::SIZE])
            .map_err(|_| Exception::DataBusError(address))?;
        self.reservation_set.set(physical, W::SIZE as u64);
        Ok(W::from_bytes(&buf, self.model.endianness))
    }

    /// `sc`/`scd`: store if the location is still reserved. Returns whether
    /// the store happened. Translation faults are raised either way.
    pub fn store_conditional<W: Word, B: Bus>(
        &mut self,
        bus: &mut B,
        tags: &TagDirectory,
        address: Address,
        value: W,
    ) -> Result<bool, Exception> {
        let address = self.cp0.geometry().canonical(address);
        check_alignment(AccessType::Store, address, W::SIZE as u64)?;
        let physical = self.translate_cached(bus, address, AccessType::Store)?;

        if !self.reservation_set.test_and_unset(physical, W::SIZE as u64) {
            return Ok(false);
        }

        let mut buf = [0u8; 8];
        value.to_bytes(&mut buf, self.model.endianness);
        self.write_physical(bus, tags, address, physical, &buf[..W::SIZE])?;
        Ok(true)
    }

    /// Write to physical memory and clear the tags of the written slots.
    fn write_physical<B: Bus>(
        &self,
        bus: &mut B,
        tags: &TagDirectory,
        address: Address,
        physical: Address,
        data: &[u8],
    ) -> Result<(), Exception> {
        let backing = tag_backing(bus, physical);
        if let TagBacking::ReadOnly = backing {
            return Err(Exception::DataBusError(address));
        }

        bus.write(physical, data)
            .map_err(|_| Exception::DataBusError(address))?;

        if let TagBacking::Ram(ram_offset) = backing {
            tags.clear_range(ram_offset, data.len() as u64)
                .map_err(|err| tag_failure(address, err))?;
        }
        Ok(())
    }

    /// Load the capability-aligned capability at `address` with its tag. A
    /// page inhibiting capability loads strips the tag.
    pub fn load_capability<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
    ) -> Result<Capability, Exception> {
        let address = self.cp0.geometry().canonical(address);
        let size = tags.capability_size();
        check_alignment(AccessType::CapabilityLoad, address, size)?;
        let translation = self.translate(bus, address, AccessType::CapabilityLoad)?;

        let mut data = vec![0u8; size as usize];
        bus.read(translation.physical, &mut data)
            .map_err(|_| Exception::DataBusError(address))?;

        let tag = translation.protection.contains(Protection::CAP_LOAD)
            && match tag_backing(bus, translation.physical) {
                TagBacking::Ram(ram_offset) => tags
                    .get_tag(ram_offset)
                    .map_err(|err| tag_failure(address, err))?,
                TagBacking::Io | TagBacking::ReadOnly => false,
            };

        Ok(Capability { data, tag })
    }

    /// Store a capability at the capability-aligned `address`. Storing a
    /// tagged capability is a capability store, subject to the
    /// capability-store inhibit of the page. An untagged one is an ordinary
    /// store.
    pub fn store_capability<B: Bus>(
        &mut self,
        bus: &mut B,
        tags: &TagDirectory,
        address: Address,
        capability: &Capability,
    ) -> Result<(), Exception> {
        let address = self.cp0.geometry().canonical(address);
        let size = tags.capability_size();
        debug_assert_eq!(capability.data.len() as u64, size);

        let access = if capability.tag {
            AccessType::CapabilityStore
        } else {
            AccessType::Store
        };
        check_alignment(access, address, size)?;
        let physical = self.translate(bus, address, access)?.physical;

        self.write_physical(bus, tags, address, physical, &capability.data)?;
        if capability.tag {
            self.set_tag_physical(bus, tags, address, physical)?;
        }
        Ok(())
    }

    /// Set the tag of the capability slot containing `address`.
    pub fn set_tag<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
    ) -> Result<(), Exception> {
        let address = self.cp0.geometry().canonical(address);
        let physical = self
            .translate(bus, address, AccessType::CapabilityStore)?
            .physical;
        self.set_tag_physical(bus, tags, address, physical)
    }

    fn set_tag_physical<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
        physical: Address,
    ) -> Result<(), Exception> {
        let size = tags.capability_size();
        self.reservation_set
            .invalidate_overlapping(physical & !(size - 1), size);

        match tag_backing(bus, physical) {
            TagBacking::Ram(ram_offset) => tags
                .set_tag(ram_offset)
                .map_err(|err| tag_failure(address, err)),
            TagBacking::Io => {
                trace!("Ignoring tag write to IO address {:#x}", physical);
                Ok(())
            }
            TagBacking::ReadOnly => Err(Exception::DataBusError(address)),
        }
    }

    /// Tag of the capability slot containing `address`. Pages inhibiting
    /// capability loads read as untagged.
    pub fn get_tag<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
    ) -> Result<bool, Exception> {
        let address = self.cp0.geometry().canonical(address);
        let translation = self.translate(bus, address, AccessType::CapabilityLoad)?;
        if !translation.protection.contains(Protection::CAP_LOAD) {
            return Ok(false);
        }

        match tag_backing(bus, translation.physical) {
            TagBacking::Ram(ram_offset) => tags
                .get_tag(ram_offset)
                .map_err(|err| tag_failure(address, err)),
            TagBacking::Io | TagBacking::ReadOnly => Ok(false),
        }
    }

    /// Tags of the 8 capability slots of the 8-slot group containing
    /// `address`, slot `i` in bit `i`. The capability-load inhibit does not
    /// apply.
    pub fn get_tag_many<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
    ) -> Result<u8, Exception> {
        let address = self.cp0.geometry().canonical(address);
        let physical = self.translate(bus, address, AccessType::Load)?.physical;

        match tag_backing(bus, physical) {
            TagBacking::Ram(ram_offset) => tags
                .get_tag_many(ram_offset)
                .map_err(|err| tag_failure(address, err)),
            TagBacking::Io | TagBacking::ReadOnly => Ok(0),
        }
    }

    /// Clear the tags of every capability slot overlapping
    /// `[address, address + size)`. The range must not cross a page.
    pub fn invalidate_tags<B: Bus>(
        &mut self,
        bus: &B,
        tags: &TagDirectory,
        address: Address,
        size: u64,
    ) -> Result<(), TagRangeError> {
        let address = self.cp0.geometry().canonical(address);
        if size == 0 {
            return Ok(());
        }
        if (address & PAGE_OFFSET_MASK) + size > PAGE_SIZE {
            error!("Tag invalidation at {:#x} of {} bytes crosses a page", address, size);
            return Err(TagError::CrossesPage { address, size }.into());
        }

        let physical = self.translate(bus, address, AccessType::Store)?.physical;
        match tag_backing(bus, physical) {
            TagBacking::Ram(ram_offset) => Ok(tags.clear_range(ram_offset, size)?),
            TagBacking::Io => Ok(()),
            TagBacking::ReadOnly => Err(Exception::DataBusError(address).into()),
        }
    }
}
