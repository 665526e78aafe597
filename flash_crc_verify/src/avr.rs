// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live program memory and linker symbols on AVR.
//!
//! The checksum slot `crc_value` is emitted into `.progmemx.data.crc_value`
//! with the value of the symbol `crc.value`.  The first link uses a
//! placeholder (`-Wl,--defsym,crc.value=0`); once `flash-crc-gen` has
//! computed the real value, the final link passes that instead.

use crate::{verify_or_halt, ProgAddr, ProgramMemory};
use core::arch::{asm, global_asm};
use flash_crc::{Boundaries, Checksum, RodataRegion};
#[cfg(feature = "rodata-region")]
use flash_crc::RodataOrder;

global_asm!(
    ".pushsection .progmemx.data.crc_value,\"a\",@progbits",
    ".global crc_value",
    ".type crc_value,@object",
    "crc_value:",
    ".2byte crc.value",
    ".size crc_value, . - crc_value",
    ".popsection",
);

// Zero-size markers from the default linker script; only their addresses
// mean anything.  The rodata ones only exist when there is a rodata MEMORY
// region.
#[allow(non_upper_case_globals)]
extern "C" {
    static __vectors: u8;
    static __data_load_start: u8;
    static __data_load_end: u8;
    static crc_value: Checksum;
    #[cfg(feature = "rodata-region")]
    static __rodata_load_start: u8;
    #[cfg(feature = "rodata-region")]
    static __rodata_load_end: u8;
}

/// Loads the full program-memory address of a symbol.
///
/// Taking `&sym` only yields 16 bits, so the address is materialized with
/// `lo8`/`hi8`/`hh8` relocations instead.
macro_rules! prog_addr {
    ($sym:path) => {{
        let lo: u8;
        let hi: u8;
        let hh: u8;
        // SAFETY: only loads immediates
        unsafe {
            asm!(
                "ldi {lo}, lo8({s})",
                "ldi {hi}, hi8({s})",
                "ldi {hh}, hh8({s})",
                lo = out(reg_upper) lo,
                hi = out(reg_upper) hi,
                hh = out(reg_upper) hh,
                s = sym $sym,
                options(pure, nomem, nostack),
            );
        }
        narrow(u32::from_le_bytes([lo, hi, hh, 0]))
    }};
}

#[cfg(feature = "far")]
#[inline(always)]
fn narrow(addr: u32) -> ProgAddr {
    addr
}

#[cfg(not(feature = "far"))]
#[inline(always)]
fn narrow(addr: u32) -> ProgAddr {
    addr as u16
}

/// This device's own flash.
pub struct FlashMemory;

impl ProgramMemory for FlashMemory {
    type Addr = ProgAddr;

    #[cfg(not(feature = "far"))]
    #[inline]
    fn read_u8(&self, addr: u16) -> u8 {
        let byte: u8;
        // SAFETY: lpm reads program memory and has no other effect
        unsafe {
            asm!(
                "lpm {byte}, Z",
                byte = out(reg) byte,
                in("Z") addr,
                options(pure, readonly, nostack),
            );
        }
        byte
    }

    #[cfg(feature = "far")]
    #[inline]
    fn read_u8(&self, addr: u32) -> u8 {
        let [lo, hi, hh, _] = addr.to_le_bytes();
        let z = u16::from_le_bytes([lo, hi]);
        let byte: u8;
        // SAFETY: sets RAMPZ (0x3b), which nothing else relies on before
        // startup completes, then reads program memory
        unsafe {
            asm!(
                "out 0x3b, {hh}",
                "elpm {byte}, Z",
                hh = in(reg) hh,
                byte = out(reg) byte,
                in("Z") z,
                options(readonly, nostack),
            );
        }
        byte
    }
}

#[cfg(feature = "rodata-region")]
const RODATA_ORDER: RodataOrder = if cfg!(feature = "rodata-before-data") {
    RodataOrder::BeforeData
} else {
    RodataOrder::AfterData
};

#[cfg(feature = "rodata-region")]
fn rodata() -> Option<RodataRegion<ProgAddr>> {
    Some(RodataRegion {
        start: prog_addr!(__rodata_load_start),
        end: prog_addr!(__rodata_load_end),
        order: RODATA_ORDER,
    })
}

#[cfg(not(feature = "rodata-region"))]
fn rodata() -> Option<RodataRegion<ProgAddr>> {
    None
}

/// Resolves the boundary symbols of the running image.
pub fn linked_boundaries() -> Boundaries<ProgAddr> {
    Boundaries {
        vectors: prog_addr!(__vectors),
        checksum: prog_addr!(crc_value),
        data_load_start: prog_addr!(__data_load_start),
        data_load_end: prog_addr!(__data_load_end),
        rodata: rodata(),
    }
}

/// The CRC over this image's program memory.
pub fn flash_crc() -> Result<Checksum, crate::VerifyError> {
    crate::compute(&FlashMemory, &linked_boundaries())
}

/// The value patched into `crc_value`.
pub fn stored_crc() -> Checksum {
    FlashMemory.read_checksum(prog_addr!(crc_value))
}

/// Startup hook: halts unless the image is intact.
pub fn boot_check() {
    verify_or_halt(&FlashMemory, &linked_boundaries());
}
