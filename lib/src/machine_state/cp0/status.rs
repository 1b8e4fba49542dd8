// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! `Status` and `Cause` registers.

#![allow(non_snake_case, reason = "Register fields use their architectural names")]

use crate::bits::{Bits64, ConstantBits, FixedWidthBits};
use crate::cp0_register;
use crate::machine_state::mode::ExecutionMode;

/// `Status.KSU`: the base operating mode when neither EXL nor ERL is set.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum KsuValue {
    #[default]
    Kernel = 0b00,
    Supervisor = 0b01,
    User = 0b10,
}

impl Bits64 for KsuValue {
    const WIDTH: usize = 2;

    fn from_bits(value: u64) -> Self {
        match value & 0b11 {
            0b00 => KsuValue::Kernel,
            0b01 => KsuValue::Supervisor,
            // 0b11 is reserved, it is treated as user mode
            _ => KsuValue::User,
        }
    }

    fn to_bits(&self) -> u64 {
        *self as u8 as u64
    }
}

cp0_register! {
    /// CP0 register 12, select 0.
    pub struct Status {
        IE: bool,
        EXL: bool,
        ERL: bool,
        KSU: KsuValue,
        UX: bool,
        SX: bool,
        KX: bool,
        IM: FixedWidthBits<8>,
        IMPLEMENTATION: ConstantBits<3>,
        NMI: bool,
        SR: bool,
        TS: bool,
        BEV: bool,
        PX: bool,
        MX: bool,
        RE: bool,
        FR: bool,
        RP: bool,
        CU: FixedWidthBits<4>,
    }
}

impl Status {
    /// Reset value: error level with the bootstrap exception vectors selected.
    pub fn reset() -> Self {
        Self::from_bits(0)
            .with_erl(true)
            .with_bev(true)
            .with_cu(FixedWidthBits::from_bits(0b0001))
    }

    /// The mode used for segment access checks and the translation cache key.
    #[inline]
    pub fn execution_mode(self) -> ExecutionMode {
        if self.erl() {
            ExecutionMode::ErrorLevel
        } else if self.exl() {
            ExecutionMode::Kernel
        } else {
            match self.ksu() {
                KsuValue::Kernel => ExecutionMode::Kernel,
                KsuValue::Supervisor => ExecutionMode::Supervisor,
                KsuValue::User => ExecutionMode::User,
            }
        }
    }

    /// The bits of `Status` that influence address decoding. A write that
    /// changes any of them invalidates cached translations.
    #[inline]
    pub fn decoding_bits(self) -> u64 {
        const MASK: u64 = (1 << Status::EXL_OFFSET)
            | (1 << Status::ERL_OFFSET)
            | (0b11 << Status::KSU_OFFSET)
            | (1 << Status::UX_OFFSET)
            | (1 << Status::SX_OFFSET)
            | (1 << Status::KX_OFFSET);
        self.raw() & MASK
    }
}

cp0_register! {
    /// CP0 register 13, select 0.
    pub struct Cause {
        RES0: ConstantBits<2>,
        EXC_CODE: FixedWidthBits<5>,
        RES1: ConstantBits<1>,
        IP: FixedWidthBits<8>,
        RES2: ConstantBits<12>,
        CE: FixedWidthBits<2>,
        TI: bool,
        BD: bool,
    }
}
