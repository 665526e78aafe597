// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CRC-16/ARC, bit-for-bit identical to avr-libc's `_crc16_update`
//!
//! poly: 0x8005 (0xa001 reflected)
//! initial: 0x0000
//! final xor: 0x0000
//! reflected: yes (right shifting)

use crate::Checksum;

/// Folds one byte into `crc`.
#[inline]
pub const fn update(crc: Checksum, byte: u8) -> Checksum {
    let mut crc = crc ^ byte as Checksum;
    let mut i = 0;
    while i < 8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ 0xa001;
        } else {
            crc >>= 1;
        }
        i += 1;
    }
    crc
}

/// Folds `bytes` into `crc` strictly in iteration order.
pub fn fold<I>(crc: Checksum, bytes: I) -> Checksum
where
    I: IntoIterator<Item = u8>,
{
    bytes.into_iter().fold(crc, update)
}

/// Running CRC accumulator, starting from 0.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Crc16 {
    crc: Checksum,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { crc: 0 }
    }

    #[inline]
    pub fn update(&mut self, byte: u8) {
        self.crc = update(self.crc, byte);
    }

    pub fn digest(&mut self, bytes: &[u8]) {
        self.crc = fold(self.crc, bytes.iter().copied());
    }

    pub const fn get(&self) -> Checksum {
        self.crc
    }
}
