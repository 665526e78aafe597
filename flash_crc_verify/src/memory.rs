// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use flash_crc::{Address, Checksum};

/// Program-memory address as seen by the read primitive.
///
/// Devices with more than 64 KiB of flash need `elpm` and a 24-bit
/// address; everything else fits in a `u16` and uses `lpm`.
#[cfg(feature = "far")]
pub type ProgAddr = u32;
#[cfg(not(feature = "far"))]
pub type ProgAddr = u16;

/// Byte-wise read access to program memory.
pub trait ProgramMemory {
    type Addr: Address;

    fn read_u8(&self, addr: Self::Addr) -> u8;

    /// Reads the value stored in the checksum slot at `addr`.
    fn read_checksum(&self, addr: Self::Addr) -> Checksum {
        Checksum::from_le_bytes([self.read_u8(addr), self.read_u8(addr.wrapping_next())])
    }
}

/// A flash image held in RAM, mapped at `base`.
///
/// Addresses outside the image read as `0xff`, like erased flash.
#[derive(Copy, Clone, Debug)]
pub struct SliceMemory<'a, A = ProgAddr> {
    base: A,
    bytes: &'a [u8],
}

impl<'a, A: Address> SliceMemory<'a, A> {
    pub fn new(base: A, bytes: &'a [u8]) -> Self {
        SliceMemory { base, bytes }
    }

    fn index(&self, addr: A) -> Option<usize> {
        let offset = addr.widen().checked_sub(self.base.widen())?;
        usize::try_from(offset).ok()
    }
}

impl<A: Address> ProgramMemory for SliceMemory<'_, A> {
    type Addr = A;

    fn read_u8(&self, addr: A) -> u8 {
        self.index(addr)
            .and_then(|i| self.bytes.get(i))
            .copied()
            .unwrap_or(0xff)
    }
}
