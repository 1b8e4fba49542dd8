// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Capability tag store.
//!
//! One tag byte per capability-sized, capability-aligned slot of the host
//! backing store. Tags are grouped in blocks of [`TAG_BLOCK_TAGS`] which are
//! allocated on first write and never freed. The directory of blocks is
//! shared by all processors of a machine, so block allocation is an
//! allocate-or-get on a [`OnceLock`]: concurrent allocators of the same block
//! all end up with the block installed by the winner.
//!
//! Offsets here are RAM offsets, see [`PhysicalRegion::ram_offset`].
//! Translation and permission checks happen before reaching this module.
//!
//! [`PhysicalRegion::ram_offset`]: crate::machine_state::bus::PhysicalRegion::ram_offset

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::log::debug;
use crate::machine_state::bus::Address;

/// Number of tags in a block
pub const TAG_BLOCK_TAGS: usize = 1 << TAG_BLOCK_SHIFT;

const TAG_BLOCK_SHIFT: u32 = 12;

const TAG_BLOCK_INDEX_MASK: u64 = (TAG_BLOCK_TAGS as u64) - 1;

/// Errors of the tag store. These are host-side contract violations, not
/// guest-visible exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("RAM offset {ram_offset:#x} is outside the tag directory")]
    OutOfRange { ram_offset: u64 },

    #[error("Tag range at {address:#x} with size {size:#x} crosses a page boundary")]
    CrossesPage { address: Address, size: u64 },

    #[error("Capability size {0} is not supported")]
    CapabilitySize(u64),

    #[error("Snapshot block {block} does not fit the tag directory")]
    MalformedSnapshot { block: usize },
}

/// A block of [`TAG_BLOCK_TAGS`] tags
pub struct TagBlock {
    tags: Box<[AtomicU8]>,
}

impl TagBlock {
    fn new() -> Self {
        Self {
            tags: (0..TAG_BLOCK_TAGS).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.tags[index].load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn set(&self, index: usize, value: bool) {
        self.tags[index].store(value as u8, Ordering::Relaxed)
    }

    /// The 8 tags of the 8-aligned group containing `index`, tag `i` of the
    /// group in bit `i`.
    pub fn get_many(&self, index: usize) -> u8 {
        let start = index & !7;
        self.tags[start..start + 8]
            .iter()
            .enumerate()
            .fold(0, |mask, (bit, tag)| {
                mask | (((tag.load(Ordering::Relaxed) != 0) as u8) << bit)
            })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.tags.iter().map(|tag| tag.load(Ordering::Relaxed)).collect()
    }
}

/// Whether [`TagDirectory::allocate_or_get`] installed a new block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// This call allocated and installed the block
    Installed,
    /// The block already existed, or a concurrent caller installed it first
    Existing,
}

/// Sparse tag storage covering the host backing store of a machine
pub struct TagDirectory {
    blocks: Box<[OnceLock<TagBlock>]>,
    capability_size_log2: u32,
    allocated: AtomicUsize,
}

impl TagDirectory {
    /// Directory covering `backing_size` bytes for capabilities of
    /// `capability_size` bytes.
    pub fn new(backing_size: u64, capability_size: u64) -> Result<Self, TagError> {
        let tags = backing_size.div_ceil(capability_size.max(1));
        let block_count = tags.div_ceil(TAG_BLOCK_TAGS as u64) as usize;
        Self::with_blocks(block_count, capability_size)
    }

    fn with_blocks(block_count: usize, capability_size: u64) -> Result<Self, TagError> {
        if !capability_size.is_power_of_two() || capability_size < 8 {
            return Err(TagError::CapabilitySize(capability_size));
        }

        Ok(Self {
            blocks: (0..block_count).map(|_| OnceLock::new()).collect(),
            capability_size_log2: capability_size.trailing_zeros(),
            allocated: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn capability_size(&self) -> u64 {
        1 << self.capability_size_log2
    }

    /// Number of blocks allocated so far
    pub fn allocated_blocks(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Block number and index inside the block of the tag for `ram_offset`
    #[inline]
    pub fn locate(&self, ram_offset: u64) -> Result<(usize, usize), TagError> {
        let tag = ram_offset >> self.capability_size_log2;
        let block = (tag >> TAG_BLOCK_SHIFT) as usize;
        if block >= self.blocks.len() {
            return Err(TagError::OutOfRange { ram_offset });
        }
        Ok((block, (tag & TAG_BLOCK_INDEX_MASK) as usize))
    }

    /// The block, if it has been allocated
    #[inline]
    pub fn block(&self, block: usize) -> Option<&TagBlock> {
        self.blocks.get(block)?.get()
    }

    /// Return block `block`, allocating it if needed. Among concurrent
    /// callers exactly one installs its allocation, the others drop theirs
    /// and use the installed block.
    pub fn allocate_or_get(&self, block: usize) -> Result<(&TagBlock, Allocation), TagError> {
        let slot = self.blocks.get(block).ok_or(TagError::OutOfRange {
            ram_offset: (block as u64) << (TAG_BLOCK_SHIFT + self.capability_size_log2),
        })?;

        if let Some(existing) = slot.get() {
            return Ok((existing, Allocation::Existing));
        }

        let fresh = TagBlock::new();
        let mut installed = false;
        let winner = slot.get_or_init(|| {
            installed = true;
            fresh
        });

        if installed {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Ok((winner, Allocation::Installed))
        } else {
            debug!("Lost allocation race for tag block {}", block);
            Ok((winner, Allocation::Existing))
        }
    }

    /// Set the tag of the slot containing `ram_offset`.
    pub fn set_tag(&self, ram_offset: u64) -> Result<(), TagError> {
        let (block, index) = self.locate(ram_offset)?;
        let (block, _) = self.allocate_or_get(block)?;
        block.set(index, true);
        Ok(())
    }

    /// Clear the tag of the slot containing `ram_offset`. Never allocates.
    pub fn clear_tag(&self, ram_offset: u64) -> Result<(), TagError> {
        let (block, index) = self.locate(ram_offset)?;
        if let Some(block) = self.block(block) {
            block.set(index, false);
        }
        Ok(())
    }

    /// Tag of the slot containing `ram_offset`. Never allocates.
    pub fn get_tag(&self, ram_offset: u64) -> Result<bool, TagError> {
        let (block, index) = self.locate(ram_offset)?;
        Ok(self.block(block).is_some_and(|block| block.get(index)))
    }

    /// Tags of the 8-slot group containing `ram_offset`, see [`TagBlock::get_many`].
    pub fn get_tag_many(&self, ram_offset: u64) -> Result<u8, TagError> {
        let (block, index) = self.locate(ram_offset)?;
        Ok(self.block(block).map_or(0, |block| block.get_many(index)))
    }

    /// Clear the tag of every slot overlapping `[ram_offset, ram_offset + size)`.
    pub fn clear_range(&self, ram_offset: u64, size: u64) -> Result<(), TagError> {
        let Some(last_byte) = size
            .checked_sub(1)
            .and_then(|len| ram_offset.checked_add(len))
        else {
            return Ok(());
        };

        let first = ram_offset >> self.capability_size_log2;
        let last = last_byte >> self.capability_size_log2;
        // Check the upper bound before touching anything
        self.locate(last_byte)?;

        for tag in first..=last {
            self.clear_tag(tag << self.capability_size_log2)?;
        }
        Ok(())
    }

    /// Copy out the allocated blocks.
    pub fn snapshot(&self) -> TagDirectorySnapshot {
        TagDirectorySnapshot {
            capability_size: self.capability_size(),
            block_count: self.blocks.len(),
            blocks: self
                .blocks
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| Some((index, slot.get()?.to_bytes())))
                .collect(),
        }
    }

    /// Rebuild a directory from a snapshot.
    pub fn restore(snapshot: &TagDirectorySnapshot) -> Result<Self, TagError> {
        let directory = Self::with_blocks(snapshot.block_count, snapshot.capability_size)?;

        for (index, bytes) in snapshot.blocks.iter() {
            if bytes.len() != TAG_BLOCK_TAGS {
                return Err(TagError::MalformedSnapshot { block: *index });
            }
            let (block, _) = directory
                .allocate_or_get(*index)
                .map_err(|_| TagError::MalformedSnapshot { block: *index })?;
            for (tag, byte) in bytes.iter().enumerate() {
                block.set(tag, *byte != 0);
            }
        }
        Ok(directory)
    }
}

/// Serialisable copy of a [`TagDirectory`]: every allocated block as its
/// number and [`TAG_BLOCK_TAGS`] tag bytes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TagDirectorySnapshot {
    pub capability_size: u64,
    pub block_count: usize,
    pub blocks: Vec<(usize, Vec<u8>)>,
}
