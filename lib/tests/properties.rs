// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

mod common;

use cheri_mips_mmu::{
    bits::Bits64,
    machine_state::{
        address_translation::AccessType,
        cp0::{entry::EntryHi, Cp0Register},
        cpu_model::CpuModel,
        tag_memory::{TagDirectory, TagDirectorySnapshot},
        Cpu, CpuSnapshot,
    },
    traps::{Exception, TrapContext},
};
use common::{entry_lo, machine, map_pair};
use proptest::{arbitrary::any, prop_assert, prop_assert_eq, prop_oneof, proptest, strategy::Strategy};

fn tlb_fault() -> impl Strategy<Value = Exception> {
    let address = 0_u64..0x8000_0000;
    prop_oneof![
        address.clone().prop_map(Exception::TlbRefillLoad),
        address.clone().prop_map(Exception::TlbInvalidStore),
        address.prop_map(Exception::TlbModified),
    ]
}

#[test]
fn nested_exceptions_keep_the_first_fault() {
    proptest!(|(
        faults in proptest::collection::vec(tlb_fault(), 2..8),
        pcs in proptest::collection::vec(0_u64..0x8000_0000, 8),
    )| {
        let (mut cpu, _bus, _tags) = machine(CpuModel::mips32r6());

        cpu.take_exception(faults[0], pcs[0] & !3, None);
        let epc = cpu.cp0.epc;
        let bad_vaddr = cpu.cp0.bad_vaddr;
        let context = cpu.cp0.context;

        for (fault, pc) in faults.iter().zip(pcs.iter()).skip(1) {
            let handler = cpu.take_exception(*fault, pc & !3, None);
            let address = fault_address(fault);

            prop_assert_eq!(handler, 0xFFFF_FFFF_8000_0180);
            prop_assert_eq!(cpu.cp0.epc, epc);
            prop_assert_eq!(cpu.cp0.bad_vaddr, bad_vaddr);
            prop_assert_eq!(cpu.cp0.context, context);
            prop_assert_eq!(cpu.cp0.entry_hi.vpn2_address(), address & EntryHi::VPN2_MASK);
            prop_assert_eq!(cpu.cp0.cause.exc_code().to_bits(), fault.exception_code());
            prop_assert!(cpu.cp0.status.exl());
        }

        cpu.eret();
        prop_assert!(!cpu.cp0.status.exl());
    });
}

fn fault_address(fault: &Exception) -> u64 {
    match fault {
        Exception::TlbRefillLoad(address)
        | Exception::TlbInvalidStore(address)
        | Exception::TlbModified(address) => *address,
        _ => unreachable!(),
    }
}

#[test]
fn tlb_entries_never_overlap() {
    proptest!(|(
        writes in proptest::collection::vec(
            (0_u64..4, 0_u8..3, any::<bool>(), any::<bool>(), 0_u64..8),
            1..32,
        ),
    )| {
        let (mut cpu, bus, _tags) = machine(CpuModel::mips32r6());

        for (pair, asid, global, random, index) in writes {
            let lo = entry_lo(pair << 13, true, true).with_g(global);
            cpu.write_cp0(Cp0Register::EntryHi, pair << 13 | asid as u64);
            cpu.write_cp0(Cp0Register::EntryLo0, lo.raw());
            cpu.write_cp0(Cp0Register::EntryLo1, lo.raw());
            cpu.write_cp0(Cp0Register::Index, index);
            if random {
                cpu.tlbwr().unwrap();
            } else {
                cpu.tlbwi().unwrap();
            }

            let tlb = cpu.tlb().unwrap();
            let live = tlb
                .entries()
                .iter()
                .chain(tlb.shadow_entries())
                .filter(|entry| !entry.invalid)
                .collect::<Vec<_>>();
            for (i, first) in live.iter().enumerate() {
                for second in &live[i + 1..] {
                    prop_assert!(!first.overlaps(second), "{first:?} overlaps {second:?}");
                }
            }

            // The entry just written translates
            prop_assert!(cpu.translate(&bus, pair << 13, AccessType::Load).is_ok());
        }
    });
}

#[test]
fn snapshots_restore_translations_and_tags() {
    let (mut cpu, mut bus, tags) = machine(CpuModel::cheri128());
    map_pair(
        &mut cpu,
        5,
        0x0000_0000_1000_0000,
        9,
        entry_lo(0x0008_0000, true, true),
        entry_lo(0x0008_1000, true, false),
    );
    cpu.set_tag(&bus, &tags, 0x1000_0020).unwrap();
    cpu.store(&mut bus, &tags, 0x1000_0040, 7_u64).unwrap();

    let cpu_bytes = cpu.snapshot().to_bytes().unwrap();
    let tag_bytes = tags.snapshot().to_bytes().unwrap();

    let mut restored = Cpu::restore(CpuSnapshot::from_bytes(&cpu_bytes).unwrap()).unwrap();
    let restored_tags =
        TagDirectory::restore(&TagDirectorySnapshot::from_bytes(&tag_bytes).unwrap()).unwrap();

    assert_eq!(restored.snapshot(), cpu.snapshot());
    assert_eq!(restored.cp0.entry_hi.asid_value(), 9);
    assert_eq!(restored.load::<u64, _>(&bus, 0x1000_0040), Ok(7));
    assert_eq!(restored.get_tag(&bus, &restored_tags, 0x1000_0020), Ok(true));
    assert_eq!(restored.get_tag(&bus, &restored_tags, 0x1000_0030), Ok(false));
    assert_eq!(
        restored.store(&mut bus, &restored_tags, 0x1000_1000, 0_u8),
        Err(Exception::TlbModified(0x1000_1000))
    );

    // Trailing bytes are rejected
    let mut padded = cpu_bytes;
    padded.push(0);
    assert!(CpuSnapshot::from_bytes(&padded).is_err());
}

#[test]
fn tags_of_distinct_slots_are_independent() {
    proptest!(|(
        slots in proptest::collection::btree_set(0_u64..1024, 1..32),
        cleared in 0_u64..1024,
    )| {
        let (mut cpu, mut bus, tags) = machine(CpuModel::cheri256());
        let base = 0xFFFF_FFFF_8001_0000_u64;

        for slot in &slots {
            cpu.set_tag(&bus, &tags, base + slot * 32).unwrap();
        }
        cpu.store(&mut bus, &tags, base + cleared * 32 + 31, 0_u8).unwrap();

        for slot in 0..1024 {
            let expected = slots.contains(&slot) && slot != cleared;
            prop_assert_eq!(cpu.get_tag(&bus, &tags, base + slot * 32), Ok(expected));
        }
    });
}

#[test]
fn range_invalidation_clears_exactly_the_overlapping_slots() {
    proptest!(|(
        start in 0_u64..4096,
        size in 1_u64..4096,
    )| {
        let (mut cpu, bus, tags) = machine(CpuModel::cheri128());
        let page = 0xFFFF_FFFF_8000_4000_u64;

        for slot in 0..256 {
            cpu.set_tag(&bus, &tags, page + slot * 16).unwrap();
        }

        let crosses_page = start + size > 4096;
        let result = cpu.invalidate_tags(&bus, &tags, page + start, size);
        prop_assert_eq!(result.is_err(), crosses_page);

        for slot in 0..256 {
            let slot_start = slot * 16;
            let overlaps = slot_start < start + size && start < slot_start + 16;
            let tagged = crosses_page || !overlaps;
            prop_assert_eq!(cpu.get_tag(&bus, &tags, page + slot_start), Ok(tagged));
        }
    });
}
