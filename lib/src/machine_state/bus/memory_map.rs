// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! A [`Bus`] built from RAM, ROM and memory-mapped IO regions.
//!
//! RAM and ROM share one host buffer, in the order the regions are added.
//! The position of a byte in that buffer is its RAM offset, which is what the
//! tag store is indexed by. A region's RAM offset agrees with its base address
//! modulo [`HOST_ALIGNMENT`], so capability slots of every region line up with
//! the tag slots.

use super::{Address, BadMemoryAccess, Bus, PhysicalRegion, RegionKind};

/// Alignment of host regions in the backing buffer. A multiple of every
/// capability size.
pub const HOST_ALIGNMENT: u64 = 4096;

/// Device model serving an IO region. Offsets are relative to the region base.
pub trait MmioHandler {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), BadMemoryAccess>;

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), BadMemoryAccess>;
}

/// Errors when building a [`MemoryMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("Region at {base:#x} with size {size:#x} overlaps an existing region")]
    Overlap { base: Address, size: u64 },

    #[error("Region at {base:#x} is empty or wraps around the address space")]
    InvalidSize { base: Address },
}

enum Backing {
    Host { offset: u64 },
    Io(Box<dyn MmioHandler>),
}

struct Region {
    base: Address,
    size: u64,
    kind: RegionKind,
    backing: Backing,
}

impl Region {
    #[inline]
    fn contains(&self, address: Address) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// Offset of `[address, address + len)` inside the region, if it fits.
    #[inline]
    fn offset_of(&self, address: Address, len: usize) -> Result<u64, BadMemoryAccess> {
        let offset = address.checked_sub(self.base).ok_or(BadMemoryAccess)?;
        let end = offset.checked_add(len as u64).ok_or(BadMemoryAccess)?;
        if end > self.size {
            return Err(BadMemoryAccess);
        }
        Ok(offset)
    }
}

/// Physical address space of a machine
#[derive(Default)]
pub struct MemoryMap {
    /// Sorted by base address, never overlapping
    regions: Vec<Region>,
    storage: Vec<u8>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` bytes of zeroed RAM at `base`. Returns the RAM offset of `base`.
    pub fn add_ram(&mut self, base: Address, size: u64) -> Result<u64, MemoryMapError> {
        self.add_host_region(base, size, RegionKind::Ram)
    }

    /// Map a ROM holding `contents` at `base`. Returns the RAM offset of `base`.
    pub fn add_rom(&mut self, base: Address, contents: &[u8]) -> Result<u64, MemoryMapError> {
        let offset = self.add_host_region(base, contents.len() as u64, RegionKind::Rom)?;
        let start = offset as usize;
        self.storage[start..start + contents.len()].copy_from_slice(contents);
        Ok(offset)
    }

    /// Map an IO region at `base` served by `handler`.
    pub fn add_io(
        &mut self,
        base: Address,
        size: u64,
        handler: Box<dyn MmioHandler>,
    ) -> Result<(), MemoryMapError> {
        self.insert(Region {
            base,
            size,
            kind: RegionKind::Io,
            backing: Backing::Io(handler),
        })
    }

    /// Total size of the host backing store, i.e. the exclusive upper bound
    /// of RAM offsets.
    pub fn backing_size(&self) -> u64 {
        self.storage.len() as u64
    }

    /// Host-side write that ignores ROM protection, for loading images.
    pub fn load(&mut self, address: Address, data: &[u8]) -> Result<(), BadMemoryAccess> {
        let region = self.find(address).ok_or(BadMemoryAccess)?;
        let offset = region.offset_of(address, data.len())?;
        let start = match region.backing {
            Backing::Host { offset: base } => (base + offset) as usize,
            Backing::Io(_) => return Err(BadMemoryAccess),
        };
        self.storage[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn add_host_region(
        &mut self,
        base: Address,
        size: u64,
        kind: RegionKind,
    ) -> Result<u64, MemoryMapError> {
        let offset = (self.storage.len() as u64).next_multiple_of(HOST_ALIGNMENT)
            + (base & (HOST_ALIGNMENT - 1));
        self.insert(Region {
            base,
            size,
            kind,
            backing: Backing::Host { offset },
        })?;
        self.storage.resize((offset + size) as usize, 0);
        Ok(offset)
    }

    fn insert(&mut self, region: Region) -> Result<(), MemoryMapError> {
        let base = region.base;
        let size = region.size;
        let last = match size.checked_sub(1).and_then(|len| base.checked_add(len)) {
            Some(last) => last,
            None => return Err(MemoryMapError::InvalidSize { base }),
        };

        let index = self.regions.partition_point(|other| other.base < base);
        let overlaps_previous = index
            .checked_sub(1)
            .and_then(|prev| self.regions.get(prev))
            .is_some_and(|prev| prev.contains(base));
        let overlaps_next = self
            .regions
            .get(index)
            .is_some_and(|next| next.base <= last);
        if overlaps_previous || overlaps_next {
            return Err(MemoryMapError::Overlap { base, size });
        }

        self.regions.insert(index, region);
        Ok(())
    }

    fn find_index(&self, address: Address) -> Option<usize> {
        let index = self
            .regions
            .partition_point(|region| region.base <= address)
            .checked_sub(1)?;
        self.regions[index].contains(address).then_some(index)
    }

    fn find(&self, address: Address) -> Option<&Region> {
        self.find_index(address).map(|index| &self.regions[index])
    }
}

impl Bus for MemoryMap {
    fn resolve(&self, address: Address) -> Option<PhysicalRegion> {
        let region = self.find(address)?;
        let offset = address - region.base;
        let ram_offset = match region.backing {
            Backing::Host { offset: base } => Some(base + offset),
            Backing::Io(_) => None,
        };
        Some(PhysicalRegion {
            kind: region.kind,
            ram_offset,
            remaining: region.size - offset,
        })
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), BadMemoryAccess> {
        let region = self.find(address).ok_or(BadMemoryAccess)?;
        let offset = region.offset_of(address, buf.len())?;
        match &region.backing {
            Backing::Host { offset: base } => {
                let start = (base + offset) as usize;
                buf.copy_from_slice(&self.storage[start..start + buf.len()]);
                Ok(())
            }
            Backing::Io(handler) => handler.read(offset, buf),
        }
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), BadMemoryAccess> {
        let index = self.find_index(address).ok_or(BadMemoryAccess)?;
        let Self { regions, storage } = self;
        let region = &mut regions[index];
        let offset = region.offset_of(address, data.len())?;
        match (region.kind, &mut region.backing) {
            (RegionKind::Rom, _) => Err(BadMemoryAccess),
            (_, Backing::Host { offset: base }) => {
                let start = (*base + offset) as usize;
                storage[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            (_, Backing::Io(handler)) => handler.write(offset, data),
        }
    }
}
