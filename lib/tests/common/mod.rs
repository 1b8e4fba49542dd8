// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use cheri_mips_mmu::{
    bits::{ones, Bits64},
    machine_state::{
        bus::{memory_map::MemoryMap, Address},
        cp0::{entry::EntryLo, Cp0Register},
        cpu_model::CpuModel,
        tag_memory::TagDirectory,
        Cpu,
    },
};

pub const RAM_SIZE: u64 = 0x40_0000;

/// Boot ROM, reached through kseg1 at 0xBFC0_0000
pub const ROM_BASE: Address = 0x1FC0_0000;

/// `Status.KSU` for user mode
pub const STATUS_USER: u64 = 0b10 << 3;

/// Install a subscriber so MMU events show up in failing test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

/// A processor in kernel mode with RAM at physical 0 and a boot ROM, and
/// the tag store covering both.
pub fn machine(model: CpuModel) -> (Cpu, MemoryMap, TagDirectory) {
    init_tracing();

    let mut bus = MemoryMap::new();
    bus.add_ram(0, RAM_SIZE).unwrap();
    bus.add_rom(ROM_BASE, &[0; 0x1000]).unwrap();
    let tags = TagDirectory::new(bus.backing_size(), model.capability_size).unwrap();

    let mut cpu = Cpu::new(model).unwrap();
    cpu.write_cp0(Cp0Register::Status, 0);
    (cpu, bus, tags)
}

/// `EntryLo` value mapping `frame`
pub fn entry_lo(frame: Address, valid: bool, dirty: bool) -> EntryLo {
    EntryLo::from_bits(0)
        .with_v(valid)
        .with_d(dirty)
        .with_frame_address(frame)
}

/// Write a 4 KiB page pair at `virt` with `tlbwi`.
pub fn map_pair(
    cpu: &mut Cpu,
    index: u64,
    virt: Address,
    asid: u8,
    lo0: EntryLo,
    lo1: EntryLo,
) {
    cpu.write_cp0(Cp0Register::Index, index);
    cpu.write_cp0(Cp0Register::PageMask, 0);
    cpu.write_cp0(Cp0Register::EntryHi, virt | asid as u64);
    cpu.write_cp0(Cp0Register::EntryLo0, lo0.raw());
    cpu.write_cp0(Cp0Register::EntryLo1, lo1.raw());
    cpu.tlbwi().unwrap();
}

/// In-memory image of a leaf page table entry with `PWField.PTEI` = `ptei`
pub fn pte(lo: EntryLo, ptei: u32) -> u64 {
    let rixi = (lo.ri() as u64) << 1 | lo.xi() as u64;
    (lo.raw() & ones(60)) << ptei | rixi << (ptei - 2)
}
