// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Physical memory interface consumed by the MMU and the tag store.

pub mod memory_map;

use derive_more::Error;

/// Virtual or physical address. 32-bit processors keep addresses
/// sign-extended to 64 bits.
pub type Address = u64;

/// An access hit a location with no backing memory or a read-only one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Error, derive_more::Display)]
pub struct BadMemoryAccess;

/// Kind of memory backing a physical address
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RegionKind {
    Ram,
    Rom,
    Io,
}

/// Resolution of a physical address by the memory subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysicalRegion {
    pub kind: RegionKind,
    /// Offset of the address in the host backing store. RAM and ROM have one,
    /// IO regions do not.
    pub ram_offset: Option<u64>,
    /// Bytes from the address to the end of the region
    pub remaining: u64,
}

/// The physical memory subsystem
pub trait Bus {
    /// Find the region containing `address`, or [`None`] if unmapped.
    fn resolve(&self, address: Address) -> Option<PhysicalRegion>;

    /// Read `buf.len()` bytes starting at `address`.
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), BadMemoryAccess>;

    /// Write `data` starting at `address`. Writes to ROM fail.
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), BadMemoryAccess>;
}

/// Byte order of guest memory accesses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Values that can be loaded from or stored to memory in a single access
pub trait Word: Copy {
    /// Access size in bytes, always a power of two
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self;

    /// Encode into exactly [`Self::SIZE`] bytes.
    fn to_bytes(self, buf: &mut [u8], endianness: Endianness);
}

macro_rules! impl_word {
    ( $( $type:ty ),+ ) => {
        $(
            impl Word for $type {
                const SIZE: usize = std::mem::size_of::<$type>();

                #[inline]
                fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$type>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    match endianness {
                        Endianness::Big => <$type>::from_be_bytes(raw),
                        Endianness::Little => <$type>::from_le_bytes(raw),
                    }
                }

                #[inline]
                fn to_bytes(self, buf: &mut [u8], endianness: Endianness) {
                    let raw = match endianness {
                        Endianness::Big => self.to_be_bytes(),
                        Endianness::Little => self.to_le_bytes(),
                    };
                    buf[..Self::SIZE].copy_from_slice(&raw);
                }
            }
        )+
    };
}

impl_word!(u8, u16, u32, u64);

#[cfg(test)]
mod tests {
    use super::{Endianness, Word};

    #[test]
    fn word_byte_order() {
        let mut buf = [0u8; 4];
        0x1122_3344u32.to_bytes(&mut buf, Endianness::Big);
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(u32::from_bytes(&buf, Endianness::Little), 0x4433_2211);

        0xAABBu16.to_bytes(&mut buf, Endianness::Little);
        assert_eq!(buf[..2], [0xBB, 0xAA]);
        assert_eq!(u16::from_bytes(&buf, Endianness::Little), 0xAABB);
        assert_eq!(<u64 as Word>::SIZE, 8);
    }
}
