// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Hardware page-table walker configuration: `PWField`, `PWSize` and `PWCtl`.
//!
//! `PWField` gives the bit position in the virtual address at which each
//! directory level's index starts, `PWSize` the number of index bits per
//! level. `PWBase` (a plain address) holds the global directory base.

// Allow unused setters & getters & constants
#![allow(dead_code)]
#![allow(non_snake_case, reason = "Register fields use their architectural names")]

use crate::bits::{ConstantBits, FixedWidthBits};
use crate::cp0_register;

cp0_register! {
    /// CP0 register 5, select 6.
    pub struct PWField {
        PTEI: FixedWidthBits<6>,
        PTI: FixedWidthBits<6>,
        MDI: FixedWidthBits<6>,
        UDI: FixedWidthBits<6>,
        GDI: FixedWidthBits<6>,
        RES0: ConstantBits<34>,
    }
}

cp0_register! {
    /// CP0 register 5, select 7. `PTEW` is the log2 of the leaf entry size
    /// relative to the native word, `PS` selects 64-bit directory pointers.
    pub struct PWSize {
        PTEW: FixedWidthBits<6>,
        PTW: FixedWidthBits<6>,
        MDW: FixedWidthBits<6>,
        UDW: FixedWidthBits<6>,
        GDW: FixedWidthBits<6>,
        PS: bool,
        RES0: ConstantBits<33>,
    }
}

cp0_register! {
    /// CP0 register 6, select 6.
    pub struct PWCtl {
        PSN: FixedWidthBits<6>,
        HUGEPG: bool,
        DPH: bool,
        RES0: ConstantBits<23>,
        PWEN: bool,
        RES1: ConstantBits<32>,
    }
}
