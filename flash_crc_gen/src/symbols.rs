// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Error;
use flash_crc::{FilePlan, RodataOrder};
use serde::Deserialize;
use std::path::Path;

/// Link-time addresses for one build, written next to the `.bin` extracts
/// from the same ELF.
///
/// ```toml
/// text-start = 0x0
/// crc-address = 0x1f2e
/// data-load-start = 0x1f40
/// rodata-load-start = 0x8000
/// rodata-load-end = 0x8120
/// ```
///
/// The `rodata-load-*` keys are present only on devices with a discrete
/// rodata MEMORY region.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Symbols {
    /// Address the text image is linked at.
    pub text_start: u32,

    /// Absolute address of `crc_value`.
    pub crc_address: u32,

    /// `__data_load_start`; needed only to derive the rodata order.
    #[serde(default)]
    pub data_load_start: Option<u32>,

    #[serde(default)]
    pub rodata_load_start: Option<u32>,

    #[serde(default)]
    pub rodata_load_end: Option<u32>,

    /// Overrides the order derived from the rodata and data addresses.
    #[serde(default)]
    pub rodata_order: Option<RodataOrderCfg>,
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RodataOrderCfg {
    BeforeData,
    AfterData,
}

impl From<RodataOrderCfg> for RodataOrder {
    fn from(o: RodataOrderCfg) -> Self {
        match o {
            RodataOrderCfg::BeforeData => RodataOrder::BeforeData,
            RodataOrderCfg::AfterData => RodataOrder::AfterData,
        }
    }
}

impl Symbols {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })?;
        let symbols: Symbols = toml::from_str(&contents)?;
        // Catch inconsistent rodata keys now rather than at plan time
        symbols.rodata_order()?;
        Ok(symbols)
    }

    /// Where a discrete rodata region goes relative to the data load
    /// image, or `None` if there is no such region.
    pub fn rodata_order(&self) -> Result<Option<RodataOrder>, Error> {
        let start = match (self.rodata_load_start, self.rodata_load_end) {
            (None, None) => return Ok(None),
            (Some(start), Some(_)) => start,
            _ => return Err(Error::IncompleteRodata),
        };

        if let Some(order) = self.rodata_order {
            return Ok(Some(order.into()));
        }
        let data = self.data_load_start.ok_or(Error::NoDataLoadStart)?;
        Ok(Some(RodataOrder::from_addresses(start, data)?))
    }

    pub fn file_plan(&self) -> Result<FilePlan, Error> {
        Ok(FilePlan::new(
            self.text_start,
            self.crc_address,
            self.rodata_order()?,
        )?)
    }
}
