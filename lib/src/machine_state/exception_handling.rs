// SPDX-FileCopyrightText: 2024 TriliTech <contact@trili.tech>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Exception delivery and return.

use super::{bus::Address, Cpu};
use crate::{
    bits::{Bits64, FixedWidthBits},
    log::debug,
    traps::{TrapContext, VectorClass},
};

/// Offset of the boot exception vectors from the model's exception base
const BEV_VECTOR_OFFSET: u64 = 0x200;

const REFILL_VECTOR: u64 = 0x000;
const XTLB_REFILL_VECTOR: u64 = 0x080;
const GENERAL_VECTOR: u64 = 0x180;

/// Size of the branch whose delay slot holds the faulting instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSize {
    /// 16-bit branch encoding
    Compact,
    Standard,
}

impl BranchSize {
    #[inline]
    fn bytes(self) -> u64 {
        match self {
            BranchSize::Compact => 2,
            BranchSize::Standard => 4,
        }
    }
}

impl Cpu {
    /// Given a trap source, the address of the faulting instruction and the
    /// branch it is the delay slot of, if any, take an exception.
    ///
    /// Return the address of the exception handler.
    ///
    /// Taking an exception while `Status.EXL` is set only updates
    /// `Cause.ExcCode` and the TLB context registers, so that the state of
    /// the first exception survives nested ones.
    pub fn take_exception<TC: TrapContext>(
        &mut self,
        trap_source: TC,
        pc: Address,
        delay_slot: Option<BranchSize>,
    ) -> Address {
        let geometry = self.cp0.geometry();
        let nested = self.cp0.status.exl();
        let bad_vaddr = trap_source.bad_vaddr().map(|address| geometry.canonical(address));

        if let Some(address) = bad_vaddr {
            if trap_source.updates_tlb_context() {
                self.cp0.set_entry_hi_vpn2(address);
            }

            if !nested {
                self.cp0.bad_vaddr = address;
                if trap_source.updates_tlb_context() {
                    self.cp0.set_context_bad_address(address);
                }
            }
        }

        if let Some(cap_cause) = trap_source.capability_cause() {
            self.cp0.cap_cause = cap_cause;
        }

        let offset = match trap_source.vector_class() {
            VectorClass::Refill if !nested => match bad_vaddr {
                Some(address) if geometry.is_64bit && self.xtlb_refill(address) => {
                    XTLB_REFILL_VECTOR
                }
                _ => REFILL_VECTOR,
            },
            _ => GENERAL_VECTOR,
        };

        let cause = self
            .cp0
            .cause
            .with_exc_code(FixedWidthBits::from_bits(trap_source.exception_code()));

        if nested {
            self.cp0.cause = cause;
        } else {
            let (epc, in_delay_slot) = match delay_slot {
                Some(branch) => (pc.wrapping_sub(branch.bytes()), true),
                None => (pc, false),
            };
            self.cp0.epc = geometry.canonical(epc);
            self.cp0.cause = cause.with_bd(in_delay_slot);
            self.cp0.status = self.cp0.status.with_exl(true);
        }

        let base = if self.cp0.status.bev() {
            self.model.exception_base.wrapping_add(BEV_VECTOR_OFFSET)
        } else {
            self.cp0.ebase & !0xFFF
        };
        let handler = geometry.canonical(base.wrapping_add(offset));

        debug!(
            "Exception code {} at {:#x}, handler {:#x}",
            trap_source.exception_code(),
            pc,
            handler
        );
        handler
    }

    /// Whether a refill for `address` goes to the 64-bit refill handler: the
    /// address lies in a 64-bit region enabled for the mode owning it.
    fn xtlb_refill(&self, address: Address) -> bool {
        let status = self.cp0.status;
        match address >> 62 {
            0 => status.ux(),
            1 => status.sx(),
            3 => status.kx(),
            _ => false,
        }
    }

    /// `eret`: leave error level or exception level and return the address
    /// to resume at. Any LL reservation is lost.
    pub fn eret(&mut self) -> Address {
        let status = self.cp0.status;
        self.reservation_set.reset();

        if status.erl() {
            self.cp0.status = status.with_erl(false);
            self.cp0.error_epc
        } else {
            self.cp0.status = status.with_exl(false);
            self.cp0.epc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BranchSize;
    use crate::{
        bits::Bits64,
        machine_state::{cp0::Cp0Register, cpu_model::CpuModel, mode::ExecutionMode, Cpu},
        traps::Exception,
    };

    /// Kernel mode, BEV clear, EBase at its reset value
    fn kernel_cpu(model: CpuModel) -> Cpu {
        let mut cpu = Cpu::new(model).unwrap();
        cpu.write_cp0(Cp0Register::Status, 0);
        cpu
    }

    #[test]
    fn first_exception_records_state() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.write_cp0(Cp0Register::EntryHi, 0x5);

        let handler = cpu.take_exception(
            Exception::TlbInvalidStore(0x0040_3004),
            0x8000_1000,
            None,
        );

        assert_eq!(handler, 0xFFFF_FFFF_8000_0180);
        assert!(cpu.cp0.status.exl());
        assert_eq!(cpu.cp0.epc, 0xFFFF_FFFF_8000_1000);
        assert_eq!(cpu.cp0.bad_vaddr, 0x0040_3004);
        assert_eq!(cpu.cp0.cause.exc_code().to_bits(), 3);
        assert!(!cpu.cp0.cause.bd());
        // ASID kept
        assert_eq!(cpu.cp0.entry_hi.raw(), 0x0040_2005);
        assert_eq!(cpu.cp0.context.bad_vpn2().to_bits(), 0x0040_3004 >> 13);
    }

    #[test]
    fn nested_exception_keeps_first_state() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.take_exception(Exception::TlbRefillLoad(0x0040_0000), 0x0000_1000, None);
        let epc = cpu.cp0.epc;
        let bad_vaddr = cpu.cp0.bad_vaddr;
        let context = cpu.cp0.context;

        let handler = cpu.take_exception(Exception::TlbRefillLoad(0x7FFF_E000), 0x8000_0004, None);

        // Nested refills use the general vector
        assert_eq!(handler, 0xFFFF_FFFF_8000_0180);
        assert_eq!(cpu.cp0.epc, epc);
        assert_eq!(cpu.cp0.bad_vaddr, bad_vaddr);
        assert_eq!(cpu.cp0.context, context);
        // EntryHi still follows the latest fault
        assert_eq!(cpu.cp0.entry_hi.vpn2_address(), 0x7FFF_E000);
    }

    #[test]
    fn refill_vectors() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        assert_eq!(
            cpu.take_exception(Exception::TlbRefillStore(0x1000), 0, None),
            0xFFFF_FFFF_8000_0000
        );

        let mut cpu = kernel_cpu(CpuModel::cheri128());
        // UX clear: the user region uses the 32-bit refill handler
        assert_eq!(
            cpu.take_exception(Exception::TlbRefillLoad(0x1000), 0, None),
            0xFFFF_FFFF_8000_0000
        );

        let mut cpu = kernel_cpu(CpuModel::cheri128());
        cpu.write_cp0(Cp0Register::Status, 1 << 5);
        assert_eq!(
            cpu.take_exception(Exception::TlbRefillLoad(0x1000), 0, None),
            0xFFFF_FFFF_8000_0080
        );
    }

    #[test]
    fn boot_vectors() {
        let mut cpu = Cpu::new(CpuModel::mips32r6()).unwrap();
        cpu.write_cp0(Cp0Register::Status, 1 << 22);
        assert_eq!(
            cpu.take_exception(Exception::AddressErrorLoad(0x1), 0, None),
            0xFFFF_FFFF_BFC0_0380
        );
    }

    #[test]
    fn delay_slot() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.take_exception(
            Exception::AddressErrorStore(0x3),
            0x8000_2004,
            Some(BranchSize::Standard),
        );
        assert_eq!(cpu.cp0.epc, 0xFFFF_FFFF_8000_2000);
        assert!(cpu.cp0.cause.bd());

        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.take_exception(
            Exception::AddressErrorStore(0x3),
            0x8000_2004,
            Some(BranchSize::Compact),
        );
        assert_eq!(cpu.cp0.epc, 0xFFFF_FFFF_8000_2002);
    }

    #[test]
    fn bus_errors_leave_address_registers() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.take_exception(Exception::DataBusError(0x1234), 0x8000_0000, None);
        assert_eq!(cpu.cp0.bad_vaddr, 0);
        assert_eq!(cpu.cp0.cause.exc_code().to_bits(), 7);
    }

    #[test]
    fn capability_store_inhibit_sets_cap_cause() {
        let mut cpu = kernel_cpu(CpuModel::cheri128());
        cpu.take_exception(Exception::CapabilityStoreInhibit(0x4000), 0, None);
        assert_eq!(cpu.cp0.cap_cause, 0x1600);
        assert_eq!(cpu.cp0.cause.exc_code().to_bits(), 18);
    }

    #[test]
    fn eret_leaves_exception_level() {
        let mut cpu = kernel_cpu(CpuModel::mips32r6());
        cpu.reservation_set.set(0x100, 4);
        cpu.take_exception(Exception::TlbModified(0x0040_0000), 0x0000_2000, None);
        assert_eq!(cpu.cp0.status.execution_mode(), ExecutionMode::Kernel);

        assert_eq!(cpu.eret(), 0x2000);
        assert!(!cpu.cp0.status.exl());
        assert_eq!(cpu.reservation_set.reserved(), None);

        // ERL takes precedence
        let mut cpu = Cpu::new(CpuModel::mips32r6()).unwrap();
        cpu.write_cp0(Cp0Register::ErrorEPC, 0xBFC0_0100);
        cpu.write_cp0(Cp0Register::EPC, 0x1000);
        assert_eq!(cpu.eret(), 0xFFFF_FFFF_BFC0_0100);
        assert!(!cpu.cp0.status.erl());
    }
}
