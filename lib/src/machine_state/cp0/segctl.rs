// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Segmentation control registers `SegCtl0`, `SegCtl1` and `SegCtl2`.
//!
//! Each register holds two 16-bit segment configurations. `SegCtl1` and
//! `SegCtl2` additionally carry the access-mode and mapping controls of the
//! 64-bit `xkphys` region.

// Allow unused setters & getters & constants
#![allow(dead_code)]
#![allow(non_snake_case, reason = "Register fields use their architectural names")]

use crate::bits::{Bits64, ConstantBits, FixedWidthBits};
use crate::cp0_register;

/// Segment access mode (`AM`). Selects which execution modes may use a
/// segment and whether it is mapped through the TLB.
#[derive(PartialEq, Eq, Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum AccessMode {
    /// Unmapped, kernel only.
    Uk = 0,
    /// Mapped, kernel only.
    Mk = 1,
    /// Mapped, supervisor and kernel.
    Msk = 2,
    /// Mapped, user, supervisor and kernel.
    Musk = 3,
    /// Mapped for user and supervisor, unmapped for kernel.
    Musuk = 4,
    /// Unmapped, supervisor and kernel.
    Usk = 5,
    Reserved = 6,
    /// Unmapped, user, supervisor and kernel.
    Uusk = 7,
}

impl Bits64 for AccessMode {
    const WIDTH: usize = 3;

    fn from_bits(value: u64) -> Self {
        match value & 0b111 {
            0 => Self::Uk,
            1 => Self::Mk,
            2 => Self::Msk,
            3 => Self::Musk,
            4 => Self::Musuk,
            5 => Self::Usk,
            6 => Self::Reserved,
            _ => Self::Uusk,
        }
    }

    fn to_bits(&self) -> u64 {
        *self as u8 as u64
    }
}

cp0_register! {
    /// One segment configuration: cacheability, error-level unmapping,
    /// access mode and the physical base used when the segment is unmapped.
    pub struct SegmentConfig {
        C: FixedWidthBits<3>,
        EU: bool,
        AM: AccessMode,
        RES0: ConstantBits<2>,
        PA: FixedWidthBits<7>,
    }
}

impl SegmentConfig {
    /// Physical base of an unmapped access through this segment.
    /// `PA` supplies physical address bits `[35:29]`.
    #[inline]
    pub fn physical_base(self) -> u64 {
        self.pa().to_bits() << 29
    }

    /// Shorthand used to describe reset layouts.
    pub fn with_layout(am: AccessMode, eu: bool, pa: u64, c: u64) -> Self {
        Self::from_bits(0)
            .with_am(am)
            .with_eu(eu)
            .with_pa(FixedWidthBits::from_bits(pa))
            .with_c(FixedWidthBits::from_bits(c))
    }
}

cp0_register! {
    /// CP0 register 5, select 2. `CFG0` covers kseg3 and `CFG1` kseg2.
    pub struct SegCtl0 {
        CFG0: SegmentConfig,
        CFG1: SegmentConfig,
        RES0: ConstantBits<32>,
    }
}

cp0_register! {
    /// CP0 register 5, select 3. `CFG2` covers kseg1 and `CFG3` kseg0.
    /// `XAM` is the access mode used for `xkphys` windows selected by
    /// `SegCtl2.XR`.
    pub struct SegCtl1 {
        CFG2: SegmentConfig,
        CFG3: SegmentConfig,
        RES0: ConstantBits<27>,
        XAM: AccessMode,
        RES1: ConstantBits<2>,
    }
}

cp0_register! {
    /// CP0 register 5, select 4. `CFG4` covers the upper half of useg and
    /// `CFG5` the lower half. Each `XR` bit routes one `xkphys` cacheability
    /// window through `SegCtl1.XAM` instead of the legacy kernel-only check.
    pub struct SegCtl2 {
        CFG4: SegmentConfig,
        CFG5: SegmentConfig,
        RES0: ConstantBits<24>,
        XR: FixedWidthBits<8>,
    }
}

/// The three segmentation control registers as a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SegmentControl {
    pub seg_ctl0: SegCtl0,
    pub seg_ctl1: SegCtl1,
    pub seg_ctl2: SegCtl2,
}

impl SegmentControl {
    /// The legacy MIPS32 layout: useg mapped for all modes (unmapped under
    /// ERL), kseg0 and kseg1 unmapped kernel windows onto physical address
    /// 0, kseg2 mapped for supervisor and kernel, kseg3 mapped for kernel.
    pub fn legacy() -> Self {
        use AccessMode::*;

        let kseg3 = SegmentConfig::with_layout(Mk, false, 0, 0);
        let kseg2 = SegmentConfig::with_layout(Msk, false, 0, 0);
        let kseg1 = SegmentConfig::with_layout(Uk, false, 0, 2);
        let kseg0 = SegmentConfig::with_layout(Uk, false, 0, 3);
        let useg_high = SegmentConfig::with_layout(Musk, true, 2, 2);
        let useg_low = SegmentConfig::with_layout(Musk, true, 0, 2);

        Self {
            seg_ctl0: SegCtl0::from_bits(0).with_cfg0(kseg3).with_cfg1(kseg2),
            seg_ctl1: SegCtl1::from_bits(0)
                .with_cfg2(kseg1)
                .with_cfg3(kseg0)
                .with_xam(Uk),
            seg_ctl2: SegCtl2::from_bits(0)
                .with_cfg4(useg_high)
                .with_cfg5(useg_low),
        }
    }
}

impl Default for SegmentControl {
    fn default() -> Self {
        Self::legacy()
    }
}
