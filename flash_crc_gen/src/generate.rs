// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Error;
use flash_crc::{update, Checksum, FilePlan, ImageKind, SkipWindow};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// The three binary extracts of one linked image.
#[derive(Clone, Debug)]
pub struct Images {
    pub text: PathBuf,
    pub data: PathBuf,
    pub rodata: PathBuf,
}

impl Images {
    pub fn path(&self, image: ImageKind) -> &Path {
        match image {
            ImageKind::Text => &self.text,
            ImageKind::Data => &self.data,
            ImageKind::Rodata => &self.rodata,
        }
    }
}

/// Folds every byte of `reader` into `crc`, except those whose offset from
/// the start of the stream lies in `skip`.
///
/// Returns the new CRC and the number of bytes read.
pub fn crc_update_from_reader<R: Read>(
    mut crc: Checksum,
    reader: R,
    skip: Option<SkipWindow<u32>>,
) -> std::io::Result<(Checksum, u64)> {
    let mut n: u64 = 0;
    for byte in BufReader::new(reader).bytes() {
        let byte = byte?;
        let skipped = skip.map_or(false, |w| {
            u32::try_from(n).map_or(false, |offset| w.contains(offset))
        });
        if !skipped {
            crc = update(crc, byte);
        }
        n += 1;
    }
    Ok((crc, n))
}

/// Runs `plan` over the extracted images, opening and reading each file
/// exactly once, in plan order.
pub fn generate(plan: &FilePlan, images: &Images) -> Result<Checksum, Error> {
    let mut crc = 0;
    for step in plan.steps() {
        let path = images.path(step.image);
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })?;
        let (next, len) =
            crc_update_from_reader(crc, file, step.skip).map_err(|source| Error::Read {
                path: path.to_owned(),
                source,
            })?;

        // A slot past the end of the image would silently exclude nothing
        if let Some(w) = step.skip {
            if u64::from(w.start) + u64::from(w.len) > len {
                return Err(Error::SlotOutsideImage {
                    offset: w.start,
                    len,
                });
            }
        }

        debug!(
            "{} ({}): {len} bytes, crc {next:#x}",
            step.image,
            path.display()
        );
        crc = next;
    }
    Ok(crc)
}

/// Formats a checksum the way the patching step expects it.
pub fn format_checksum(crc: Checksum) -> String {
    format!("{crc:#x}")
}
