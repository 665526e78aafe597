// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod generate;
pub mod symbols;

pub use generate::{crc_update_from_reader, format_checksum, generate, Images};
pub use symbols::Symbols;

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot open file {} for reading: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("symbols file parse error: {0}")]
    Symbols(#[from] toml::de::Error),

    #[error("layout error: {0}")]
    Layout(#[from] flash_crc::LayoutError),

    #[error("rodata-load-start and rodata-load-end must be given together")]
    IncompleteRodata,

    #[error("no rodata-order given, and no data-load-start to derive it from")]
    NoDataLoadStart,

    #[error(
        "checksum slot at offset {offset:#x} does not fit in the {len}-byte text image"
    )]
    SlotOutsideImage { offset: u32, len: u64 },
}
