// SPDX-FileCopyrightText: 2024 Trilitech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Binary encoding of processor and tag store snapshots.

use bincode::{DefaultOptions, Options};

use crate::machine_state::tag_memory::TagDirectorySnapshot;

/// Constructs the default options for bincode serialisation and deserialisation.
#[inline(always)]
fn bincode_default() -> impl Options {
    DefaultOptions::new()
        .with_no_limit()
        .with_little_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Deserialise a slice of bytes into a value of type `T`.
pub fn deserialise<'de, T: serde::Deserialize<'de>>(data: &'de [u8]) -> bincode::Result<T> {
    bincode_default().deserialize(data)
}

/// Serialize `T` into a vector of bytes.
pub fn serialise<T: serde::Serialize>(value: &T) -> bincode::Result<Vec<u8>> {
    bincode_default().serialize(value)
}

impl TagDirectorySnapshot {
    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        serialise(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        deserialise(bytes)
    }
}
