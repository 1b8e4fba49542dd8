// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Memory management unit of a MIPS processor with CHERI capability tags.
//!
//! A [`Cpu`](machine_state::Cpu) owns its CP0 registers, TLB and
//! translation cache. Physical memory is reached through the
//! [`Bus`](machine_state::bus::Bus) trait, and the
//! [`TagDirectory`](machine_state::tag_memory::TagDirectory) holding
//! capability tags is shared by all processors of a machine.

pub mod bits;
pub mod log;
pub mod machine_state;
pub mod snapshot;
pub mod traps;
