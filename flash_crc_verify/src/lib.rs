// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time check of the program-memory CRC
//!
//! The firmware calls this once, early in startup and before interrupts are
//! enabled.  It folds every planned region of its own program memory
//! through the CRC and compares the result against the value the build
//! patched into the checksum slot.  A mismatch means the image cannot be
//! trusted, so there is nothing to recover: [`verify_or_halt`] panics and
//! the firmware's panic handler stops the device.
//!
//! Which device class is being built for is a compile-time fact:
//!
//! - `far`: flash beyond 64 KiB, read with `elpm` through 24-bit addresses
//! - `rodata-region`: the device has a discrete rodata MEMORY region
//! - `rodata-before-data`: that region is linked below the data load image
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

mod memory;

#[cfg(target_arch = "avr")]
pub mod avr;

pub use memory::{ProgAddr, ProgramMemory, SliceMemory};

use core::fmt;
use flash_crc::{Boundaries, Checksum, Crc16, LayoutError};
use log::debug;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VerifyError {
    Layout(LayoutError),
    Mismatch { computed: Checksum, stored: Checksum },
}

impl From<LayoutError> for VerifyError {
    fn from(e: LayoutError) -> Self {
        VerifyError::Layout(e)
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Layout(e) => write!(f, "bad flash layout: {e}"),
            VerifyError::Mismatch { computed, stored } => write!(
                f,
                "flash CRC mismatch: computed {computed:#06x}, stored {stored:#06x}"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VerifyError {}

/// Folds every planned region of `mem` through the CRC.
pub fn compute<M: ProgramMemory>(
    mem: &M,
    boundaries: &Boundaries<M::Addr>,
) -> Result<Checksum, VerifyError> {
    let plan = boundaries.plan()?;

    let mut crc = Crc16::new();
    for region in plan.iter() {
        debug!(
            "{:?}: {:#x}..={:#x}",
            region.source, region.first, region.last
        );
        region.for_each_addr(|addr| crc.update(mem.read_u8(addr)));
    }
    Ok(crc.get())
}

/// Computes the CRC and compares it against the checksum slot.
pub fn verify<M: ProgramMemory>(
    mem: &M,
    boundaries: &Boundaries<M::Addr>,
) -> Result<Checksum, VerifyError> {
    let computed = compute(mem, boundaries)?;
    let stored = mem.read_checksum(boundaries.checksum);

    debug!("flash_crc = {computed:#x}");
    debug!("crc_value = {stored:#x}");

    if computed != stored {
        return Err(VerifyError::Mismatch { computed, stored });
    }
    Ok(computed)
}

/// Pass/fail form of [`verify`].
pub fn check<M: ProgramMemory>(mem: &M, boundaries: &Boundaries<M::Addr>) -> bool {
    verify(mem, boundaries).is_ok()
}

/// Like [`verify`], but panics on failure.
pub fn verify_or_halt<M: ProgramMemory>(mem: &M, boundaries: &Boundaries<M::Addr>) {
    if let Err(e) = verify(mem, boundaries) {
        panic!("{e}");
    }
}
