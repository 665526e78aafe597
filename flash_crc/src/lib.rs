// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Program-memory CRC shared between the firmware and the build host.
//!
//! At build time the host folds the extracted `.text`, `.data` and
//! `.rodata` images through a CRC-16 and the result is patched into a
//! two-byte slot inside the image.  At boot the firmware folds the same
//! bytes, read straight out of its own program memory, and compares the
//! result against the slot.  The two computations only agree if they use
//! the same kernel ([`crc16`]) and visit the same bytes in the same order
//! ([`layout`]), so both live here.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod crc16;
pub mod layout;

pub use crc16::{fold, update, Crc16};
pub use layout::{
    Address, Boundaries, FilePlan, FileStep, ImageKind, Plan, Region, RodataOrder, RodataRegion,
    SkipWindow, Source,
};

use core::fmt;

/// The value stored in the checksum slot.
pub type Checksum = u16;

/// Width of the checksum slot, which is excluded from the checksum.
pub const CHECKSUM_SIZE: usize = core::mem::size_of::<Checksum>();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayoutError {
    SlotBeforeVectors { checksum: u32, vectors: u32 },
    SlotOverflow { checksum: u32 },
    SlotPastText { checksum: u32, data_load_start: u32 },
    DataReversed { start: u32, end: u32 },
    RodataReversed { start: u32, end: u32 },
    RodataOverlap { start: u32, end: u32 },
    AmbiguousRodataOrder { address: u32 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LayoutError::SlotBeforeVectors { checksum, vectors } => write!(
                f,
                "checksum slot at {checksum:#x} lies before the start of text at {vectors:#x}"
            ),
            LayoutError::SlotOverflow { checksum } => {
                write!(f, "checksum slot at {checksum:#x} runs off the address space")
            }
            LayoutError::SlotPastText {
                checksum,
                data_load_start,
            } => write!(
                f,
                "checksum slot at {checksum:#x} runs into the data load image at \
                 {data_load_start:#x}"
            ),
            LayoutError::DataReversed { start, end } => {
                write!(f, "data load image ends ({end:#x}) before it starts ({start:#x})")
            }
            LayoutError::RodataReversed { start, end } => {
                write!(f, "rodata region ends ({end:#x}) before it starts ({start:#x})")
            }
            LayoutError::RodataOverlap { start, end } => write!(
                f,
                "rodata region {start:#x}..{end:#x} overlaps text or the data load image"
            ),
            LayoutError::AmbiguousRodataOrder { address } => write!(
                f,
                "rodata and data load images both start at {address:#x}; \
                 cannot tell which comes first"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LayoutError {}
