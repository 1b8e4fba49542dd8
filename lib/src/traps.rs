// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Synchronous exceptions raised by address translation and memory access.
//!
//! Every memory operation of [`Cpu`] returns `Result<_, Exception>`. The
//! instruction dispatch loop hands the error to [`Cpu::take_exception`],
//! which is the only place where exception side effects on CP0 happen.
//!
//! [`Cpu`]: crate::machine_state::Cpu
//! [`Cpu::take_exception`]: crate::machine_state::Cpu::take_exception

use std::fmt::Formatter;

use crate::machine_state::bus::Address;

/// CHERI `CapCause.ExcCode` for a tagged capability store through a page
/// whose TLB entry inhibits capability stores.
pub const CAP_CAUSE_TLB_NO_STORE_CAP: u16 = 0x16;

/// MIPS exceptions (synchronous only)
#[derive(PartialEq, Eq, thiserror::Error, strum::Display, Clone, Copy)]
pub enum Exception {
    /// Store to a mapped page whose TLB entry is not dirty
    TlbModified(Address),
    /// No TLB entry matched a load or instruction fetch
    TlbRefillLoad(Address),
    /// No TLB entry matched a store
    TlbRefillStore(Address),
    /// A TLB entry matched a load or fetch but its page is not valid
    TlbInvalidLoad(Address),
    /// A TLB entry matched a store but its page is not valid
    TlbInvalidStore(Address),
    /// Privilege violation, unusable segment or misaligned load or fetch
    AddressErrorLoad(Address),
    /// Privilege violation, unusable segment or misaligned store
    AddressErrorStore(Address),
    /// Instruction fetch from a location with no backing memory
    InstructionBusError(Address),
    /// Data access to a location with no backing memory, or a tag update on
    /// read-only memory
    DataBusError(Address),
    /// TLB instruction executed on a processor without a TLB
    ReservedInstruction,
    /// Load from a read-inhibited page, reported with `PageGrain.IEC` set
    TlbReadInhibit(Address),
    /// Fetch from an execute-inhibited page, reported with `PageGrain.IEC` set
    TlbExecuteInhibit(Address),
    /// Tagged capability store to a page that inhibits capability stores
    CapabilityStoreInhibit(Address),
}

impl core::fmt::Debug for Exception {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::TlbModified(adr) => write!(f, "TlbModified({adr:#X})"),
            Self::TlbRefillLoad(adr) => write!(f, "TlbRefillLoad({adr:#X})"),
            Self::TlbRefillStore(adr) => write!(f, "TlbRefillStore({adr:#X})"),
            Self::TlbInvalidLoad(adr) => write!(f, "TlbInvalidLoad({adr:#X})"),
            Self::TlbInvalidStore(adr) => write!(f, "TlbInvalidStore({adr:#X})"),
            Self::AddressErrorLoad(adr) => write!(f, "AddressErrorLoad({adr:#X})"),
            Self::AddressErrorStore(adr) => write!(f, "AddressErrorStore({adr:#X})"),
            Self::DataBusError(adr) => write!(f, "DataBusError({adr:#X})"),
            other => write!(f, "{other}"),
        }
    }
}

/// Which vector offset an exception is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClass {
    /// TLB refill: offset 0x000, or 0x080 for the 64-bit refill handler,
    /// while `Status.EXL` is clear
    Refill,
    /// General exception vector at offset 0x180
    General,
}

/// Context of an exception used when delivering it
pub trait TrapContext {
    /// Value written to `Cause.ExcCode`
    fn exception_code(&self) -> u64;

    /// Value for `BadVAddr`, if the exception reports a virtual address
    fn bad_vaddr(&self) -> Option<Address>;

    /// Whether `Context`, `XContext` and `EntryHi.VPN2` are updated with the
    /// faulting address, for the refill handler to find the page table entry
    fn updates_tlb_context(&self) -> bool;

    /// Vector used when the exception is taken with `Status.EXL` clear
    fn vector_class(&self) -> VectorClass;

    /// Value for the CHERI `CapCause` register
    fn capability_cause(&self) -> Option<u16>;
}

impl TrapContext for Exception {
    fn exception_code(&self) -> u64 {
        match self {
            Exception::TlbModified(_) => 1,
            Exception::TlbRefillLoad(_) | Exception::TlbInvalidLoad(_) => 2,
            Exception::TlbRefillStore(_) | Exception::TlbInvalidStore(_) => 3,
            Exception::AddressErrorLoad(_) => 4,
            Exception::AddressErrorStore(_) => 5,
            Exception::InstructionBusError(_) => 6,
            Exception::DataBusError(_) => 7,
            Exception::ReservedInstruction => 10,
            Exception::CapabilityStoreInhibit(_) => 18,
            Exception::TlbReadInhibit(_) => 19,
            Exception::TlbExecuteInhibit(_) => 20,
        }
    }

    fn bad_vaddr(&self) -> Option<Address> {
        match self {
            Exception::TlbModified(addr)
            | Exception::TlbRefillLoad(addr)
            | Exception::TlbRefillStore(addr)
            | Exception::TlbInvalidLoad(addr)
            | Exception::TlbInvalidStore(addr)
            | Exception::AddressErrorLoad(addr)
            | Exception::AddressErrorStore(addr)
            | Exception::TlbReadInhibit(addr)
            | Exception::TlbExecuteInhibit(addr)
            | Exception::CapabilityStoreInhibit(addr) => Some(*addr),
            Exception::InstructionBusError(_)
            | Exception::DataBusError(_)
            | Exception::ReservedInstruction => None,
        }
    }

    fn updates_tlb_context(&self) -> bool {
        matches!(
            self,
            Exception::TlbModified(_)
                | Exception::TlbRefillLoad(_)
                | Exception::TlbRefillStore(_)
                | Exception::TlbInvalidLoad(_)
                | Exception::TlbInvalidStore(_)
                | Exception::TlbReadInhibit(_)
                | Exception::TlbExecuteInhibit(_)
                | Exception::CapabilityStoreInhibit(_)
        )
    }

    fn vector_class(&self) -> VectorClass {
        match self {
            Exception::TlbRefillLoad(_) | Exception::TlbRefillStore(_) => VectorClass::Refill,
            _ => VectorClass::General,
        }
    }

    fn capability_cause(&self) -> Option<u16> {
        match self {
            Exception::CapabilityStoreInhibit(_) => Some(CAP_CAUSE_TLB_NO_STORE_CAP << 8),
            _ => None,
        }
    }
}
