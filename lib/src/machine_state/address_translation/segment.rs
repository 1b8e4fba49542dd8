// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Segment decoding of virtual addresses.
//!
//! The 32-bit segments (useg, kseg0-3) are configured by `SegCtl0-2`. 64-bit
//! processors add xuseg, xsseg, xkphys and xkseg between useg and kseg0, each
//! enabled by one of `Status.UX/SX/KX`.

use super::{AddressingContext, TranslationFault};
use crate::{
    bits::{sign_extend_32, Bits64},
    machine_state::{
        bus::Address,
        cp0::segctl::{AccessMode, SegmentConfig},
        mode::ExecutionMode,
    },
};

/// Architectural segments of the virtual address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Segment {
    Useg,
    Xuseg,
    Xsseg,
    Xkphys,
    Xkseg,
    Kseg0,
    Kseg1,
    Kseg2,
    Kseg3,
}

impl Segment {
    /// The segment containing the canonical `address`
    pub fn of(address: Address, is_64bit: bool) -> Self {
        let address = if is_64bit {
            address
        } else {
            sign_extend_32(address)
        };

        match address {
            0..=0x7FFF_FFFF => Segment::Useg,
            _ if is_64bit && address < 0x4000_0000_0000_0000 => Segment::Xuseg,
            _ if is_64bit && address < 0x8000_0000_0000_0000 => Segment::Xsseg,
            _ if is_64bit && address < 0xC000_0000_0000_0000 => Segment::Xkphys,
            _ if is_64bit && address < KSEG0_BASE => Segment::Xkseg,
            _ if address < KSEG1_BASE => Segment::Kseg0,
            _ if address < KSEG2_BASE => Segment::Kseg1,
            _ if address < KSEG3_BASE => Segment::Kseg2,
            _ => Segment::Kseg3,
        }
    }
}

const KSEG0_BASE: u64 = sign_extend_32(0x8000_0000);
const KSEG1_BASE: u64 = sign_extend_32(0xA000_0000);
const KSEG2_BASE: u64 = sign_extend_32(0xC000_0000);
const KSEG3_BASE: u64 = sign_extend_32(0xE000_0000);

/// Offset mask of useg in each half of its configuration
const USEG_MASK: u64 = 0x3FFF_FFFF;
/// Offset mask of kseg0-3
const KSEG_MASK: u64 = 0x1FFF_FFFF;

/// Offset bits of an xkphys address, above them sits the cacheability window
const XKPHYS_OFFSET_MASK: u64 = 0x07FF_FFFF_FFFF_FFFF;
const XKPHYS_WINDOW_SHIFT: u32 = 59;

/// Where a virtual address is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Unmapped segment, already translated
    Direct(Address),
    /// Mapped segment, the MMU strategy translates it
    Mapped,
}

/// How an access mode behaves for an execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    AddressError,
    Unmapped,
    Mapped,
}

/// Classify an access through a segment with access mode `am`. Segments with
/// `eu` set are unmapped at error level.
pub fn classify(am: AccessMode, eu: bool, mode: ExecutionMode) -> Mapping {
    use AccessMode::*;
    use Mapping::*;

    match mode {
        ExecutionMode::ErrorLevel if eu => Unmapped,
        ExecutionMode::Kernel | ExecutionMode::ErrorLevel => match am {
            Mk | Msk | Musk => Mapped,
            Uk | Musuk | Usk | Reserved | Uusk => Unmapped,
        },
        ExecutionMode::Supervisor => match am {
            Uk | Mk => AddressError,
            Msk | Musk | Musuk => Mapped,
            Usk | Reserved | Uusk => Unmapped,
        },
        ExecutionMode::User => match am {
            Uk | Mk | Msk | Usk => AddressError,
            Musk | Musuk => Mapped,
            Reserved | Uusk => Unmapped,
        },
    }
}

/// Route an access through a segment described by an access mode, an offset
/// mask and a physical base.
fn route(
    mode: ExecutionMode,
    address: Address,
    am: AccessMode,
    eu: bool,
    segmask: u64,
    physical_base: u64,
) -> Result<Route, TranslationFault> {
    match classify(am, eu, mode) {
        Mapping::AddressError => Err(TranslationFault::BadAddress),
        Mapping::Unmapped => Ok(Route::Direct((address & segmask) | physical_base)),
        Mapping::Mapped => Ok(Route::Mapped),
    }
}

/// Route through a segment configured by a `SegCtl` field. Physical base
/// bits inside the segment offset are ignored.
#[inline]
fn route_configured(
    mode: ExecutionMode,
    address: Address,
    config: SegmentConfig,
    segmask: u64,
) -> Result<Route, TranslationFault> {
    route(
        mode,
        address,
        config.am(),
        config.eu(),
        segmask,
        config.physical_base() & !segmask,
    )
}

/// Route a 64-bit segment that is always mapped, provided its enable bit is
/// set and the address lies in the implemented range.
#[inline]
fn route_extended(enabled: bool, address: Address, limit: u64) -> Result<Route, TranslationFault> {
    if enabled && address <= limit {
        Ok(Route::Mapped)
    } else {
        Err(TranslationFault::BadAddress)
    }
}

/// `Status` enable bit checked for each xkphys access mode
fn xkphys_enabled(ctx: &AddressingContext, am: AccessMode) -> bool {
    use AccessMode::*;

    let status = ctx.status;
    match am {
        Uk | Mk | Reserved => status.kx(),
        Msk | Usk => status.sx(),
        Musk | Musuk | Uusk => status.ux(),
    }
}

/// Decode `address` into the segment's route.
pub fn decode(ctx: &AddressingContext, address: Address) -> Result<Route, TranslationFault> {
    let geometry = ctx.geometry;
    let address = geometry.canonical(address);
    let segmask = geometry.segmask();
    let segments = &ctx.segments;
    let mode = ctx.mode;

    match Segment::of(address, geometry.is_64bit) {
        Segment::Useg => {
            let config = if address >= 0x4000_0000 {
                segments.seg_ctl2.cfg4()
            } else {
                segments.seg_ctl2.cfg5()
            };
            route_configured(mode, address, config, USEG_MASK)
        }
        Segment::Xuseg => route_extended(
            ctx.status.ux(),
            address,
            0x3FFF_FFFF_FFFF_FFFF & segmask,
        ),
        Segment::Xsseg => route_extended(
            mode != ExecutionMode::User && ctx.status.sx(),
            address,
            0x7FFF_FFFF_FFFF_FFFF & segmask,
        ),
        Segment::Xkphys => {
            let pamask = geometry.pamask();
            if address & XKPHYS_OFFSET_MASK > pamask {
                return Err(TranslationFault::BadAddress);
            }

            let window = (address >> XKPHYS_WINDOW_SHIFT) & 0b111;
            let windows = segments.seg_ctl2.xr().to_bits();
            let am = if windows & (1 << window) != 0 {
                segments.seg_ctl1.xam()
            } else {
                AccessMode::Uk
            };

            if !xkphys_enabled(ctx, am) {
                return Err(TranslationFault::BadAddress);
            }
            route(mode, address, am, false, pamask, 0)
        }
        Segment::Xkseg => route_extended(
            mode.is_kernel() && ctx.status.kx(),
            address,
            0xFFFF_FFFF_7FFF_FFFF & segmask,
        ),
        Segment::Kseg0 => route_configured(mode, address, segments.seg_ctl1.cfg3(), KSEG_MASK),
        Segment::Kseg1 => route_configured(mode, address, segments.seg_ctl1.cfg2(), KSEG_MASK),
        Segment::Kseg2 => route_configured(mode, address, segments.seg_ctl0.cfg1(), KSEG_MASK),
        Segment::Kseg3 => route_configured(mode, address, segments.seg_ctl0.cfg0(), KSEG_MASK),
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, decode, Mapping, Route, Segment};
    use crate::{
        bits::{Bits64, FixedWidthBits},
        machine_state::{
            address_translation::{AddressGeometry, AddressingContext, TranslationFault},
            cp0::{
                segctl::{AccessMode, SegmentConfig, SegmentControl},
                status::Status,
            },
            mode::ExecutionMode,
        },
    };
    use proptest::{prop_assert_eq, proptest};
    use strum::IntoEnumIterator;

    fn context(mode: ExecutionMode, is_64bit: bool) -> AddressingContext {
        let (segbits, pabits) = if is_64bit { (40, 36) } else { (32, 32) };
        AddressingContext {
            mode,
            status: Status::from_bits(0),
            asid: 0,
            segments: SegmentControl::legacy(),
            geometry: AddressGeometry {
                is_64bit,
                segbits,
                pabits,
            },
        }
    }

    #[test]
    fn segment_boundaries() {
        assert_eq!(Segment::of(0x7FFF_FFFF, false), Segment::Useg);
        assert_eq!(Segment::of(0x8000_0000, false), Segment::Kseg0);
        assert_eq!(Segment::of(0xA000_0000, false), Segment::Kseg1);
        assert_eq!(Segment::of(0xC000_0000, false), Segment::Kseg2);
        assert_eq!(Segment::of(0xE000_0000, false), Segment::Kseg3);

        assert_eq!(Segment::of(0x8000_0000, true), Segment::Xuseg);
        assert_eq!(Segment::of(0x4000_0000_0000_0000, true), Segment::Xsseg);
        assert_eq!(Segment::of(0x9000_0000_0000_0000, true), Segment::Xkphys);
        assert_eq!(Segment::of(0xC000_0000_0000_0000, true), Segment::Xkseg);
        assert_eq!(Segment::of(0xFFFF_FFFF_8000_0000, true), Segment::Kseg0);
    }

    #[test]
    fn access_mode_table() {
        use AccessMode::*;
        use Mapping::*;

        let expected = [
            (Uk, [AddressError, AddressError, Unmapped]),
            (Mk, [AddressError, AddressError, Mapped]),
            (Msk, [AddressError, Mapped, Mapped]),
            (Musk, [Mapped, Mapped, Mapped]),
            (Musuk, [Mapped, Mapped, Unmapped]),
            (Usk, [AddressError, Unmapped, Unmapped]),
            (Reserved, [Unmapped, Unmapped, Unmapped]),
            (Uusk, [Unmapped, Unmapped, Unmapped]),
        ];

        for (am, [user, supervisor, kernel]) in expected {
            assert_eq!(classify(am, false, ExecutionMode::User), user, "{am:?}");
            assert_eq!(
                classify(am, false, ExecutionMode::Supervisor),
                supervisor,
                "{am:?}"
            );
            assert_eq!(classify(am, false, ExecutionMode::Kernel), kernel, "{am:?}");
            assert_eq!(
                classify(am, false, ExecutionMode::ErrorLevel),
                kernel,
                "{am:?}"
            );
            assert_eq!(classify(am, true, ExecutionMode::ErrorLevel), Unmapped);
        }
    }

    #[test]
    fn legacy_layout_32() {
        let kernel = context(ExecutionMode::Kernel, false);
        let user = context(ExecutionMode::User, false);
        let erl = context(ExecutionMode::ErrorLevel, false);

        assert_eq!(decode(&kernel, 0x8000_1234), Ok(Route::Direct(0x1234)));
        assert_eq!(decode(&kernel, 0xBFC0_0000), Ok(Route::Direct(0x1FC0_0000)));
        assert_eq!(decode(&kernel, 0xC000_0000), Ok(Route::Mapped));
        assert_eq!(decode(&kernel, 0xE000_0000), Ok(Route::Mapped));
        assert_eq!(decode(&kernel, 0x1000), Ok(Route::Mapped));

        assert_eq!(decode(&user, 0x7000_0000), Ok(Route::Mapped));
        assert_eq!(
            decode(&user, 0x8000_0000),
            Err(TranslationFault::BadAddress)
        );
        assert_eq!(
            decode(&context(ExecutionMode::Supervisor, false), 0xC000_0000),
            Ok(Route::Mapped)
        );
        assert_eq!(
            decode(&context(ExecutionMode::Supervisor, false), 0xE000_0000),
            Err(TranslationFault::BadAddress)
        );

        // Under ERL useg is an identity window
        assert_eq!(decode(&erl, 0x1000), Ok(Route::Direct(0x1000)));
        assert_eq!(decode(&erl, 0x7000_0000), Ok(Route::Direct(0x7000_0000)));
    }

    #[test]
    fn configured_physical_base() {
        let mut ctx = context(ExecutionMode::ErrorLevel, false);
        let kseg0 = SegmentConfig::with_layout(AccessMode::Uk, false, 0b000_0011, 3);
        ctx.segments.seg_ctl1.set_cfg3(kseg0);
        assert_eq!(
            decode(&ctx, 0x8000_0010),
            Ok(Route::Direct(0x6000_0010))
        );

        // PA bit 29 falls inside the useg offset and is ignored
        let useg = SegmentConfig::with_layout(AccessMode::Musk, true, 0b000_0011, 2);
        ctx.segments.seg_ctl2.set_cfg5(useg);
        assert_eq!(decode(&ctx, 0x10), Ok(Route::Direct(0x4000_0010)));
    }

    #[test]
    fn extended_segments_need_enable_bits() {
        let mut kernel = context(ExecutionMode::Kernel, true);
        let xuseg = 0x0000_0010_0000_0000;
        let xkseg = 0xC000_0000_0000_1000;

        assert_eq!(decode(&kernel, xuseg), Err(TranslationFault::BadAddress));
        assert_eq!(decode(&kernel, xkseg), Err(TranslationFault::BadAddress));

        kernel.status.set_ux(true);
        kernel.status.set_kx(true);
        assert_eq!(decode(&kernel, xuseg), Ok(Route::Mapped));
        assert_eq!(decode(&kernel, xkseg), Ok(Route::Mapped));

        // Beyond SEGBITS
        assert_eq!(
            decode(&kernel, 0x0000_0100_0000_0000),
            Err(TranslationFault::BadAddress)
        );

        let mut supervisor = context(ExecutionMode::Supervisor, true);
        supervisor.status.set_sx(true);
        assert_eq!(
            decode(&supervisor, 0x4000_0000_0000_1000),
            Ok(Route::Mapped)
        );
        supervisor.status.set_kx(true);
        assert_eq!(decode(&supervisor, xkseg), Err(TranslationFault::BadAddress));
    }

    #[test]
    fn xkphys_windows() {
        let mut kernel = context(ExecutionMode::Kernel, true);
        let address = 0x9800_0000_1234_5678;

        assert_eq!(decode(&kernel, address), Err(TranslationFault::BadAddress));
        kernel.status.set_kx(true);
        assert_eq!(decode(&kernel, address), Ok(Route::Direct(0x1234_5678)));

        // Beyond PABITS
        assert_eq!(
            decode(&kernel, 0x9800_0010_0000_0000),
            Err(TranslationFault::BadAddress)
        );

        // Route window 3 through XAM = USK for supervisor access
        let mut supervisor = context(ExecutionMode::Supervisor, true);
        supervisor
            .segments
            .seg_ctl2
            .set_xr(FixedWidthBits::from_bits(1 << 3));
        supervisor.segments.seg_ctl1.set_xam(AccessMode::Usk);
        assert_eq!(
            decode(&supervisor, address),
            Err(TranslationFault::BadAddress)
        );
        supervisor.status.set_sx(true);
        assert_eq!(decode(&supervisor, address), Ok(Route::Direct(0x1234_5678)));

        // Other windows stay kernel only
        assert_eq!(
            decode(&supervisor, 0x9000_0000_0000_1000),
            Err(TranslationFault::BadAddress)
        );
    }

    #[test]
    fn kseg_in_64bit_mode() {
        let kernel = context(ExecutionMode::Kernel, true);
        assert_eq!(
            decode(&kernel, 0xFFFF_FFFF_A000_1000),
            Ok(Route::Direct(0x1000))
        );
        assert_eq!(decode(&kernel, 0xFFFF_FFFF_C000_1000), Ok(Route::Mapped));
    }

    #[test]
    fn unmapped_segments_are_linear() {
        proptest!(|(offset in 0_u64..0x2000_0000)| {
            for mode in ExecutionMode::iter().filter(|mode| mode.is_kernel()) {
                let ctx = context(mode, false);
                prop_assert_eq!(decode(&ctx, 0x8000_0000 + offset), Ok(Route::Direct(offset)));
                prop_assert_eq!(decode(&ctx, 0xA000_0000 + offset), Ok(Route::Direct(offset)));
            }
        });
    }
}
