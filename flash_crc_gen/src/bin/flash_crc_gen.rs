// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use clap::Parser;
use flash_crc_gen::{format_checksum, generate, Images, Symbols};
use log::info;
use std::path::PathBuf;

/// Computes the program-memory CRC of a linked image from its binary
/// extracts, and prints it in hex for the final link.
#[derive(Debug, Parser)]
#[clap(name = "flash-crc-gen")]
struct Opts {
    /// Symbols file generated from the same ELF as the extracts
    #[clap(short, long, env = "FLASH_CRC_SYMBOLS", default_value = "syms.toml")]
    symbols: PathBuf,

    /// Override `text-start` from the symbols file
    #[clap(long, value_parser = parse_int::parse::<u32>)]
    text_start: Option<u32>,

    /// Override `crc-address` from the symbols file
    #[clap(long, value_parser = parse_int::parse::<u32>)]
    crc_address: Option<u32>,

    /// Log each region as it is folded
    #[clap(short, long)]
    verbose: bool,

    /// `.text` extract (binary)
    text: PathBuf,
    /// `.data` extract (binary)
    data: PathBuf,
    /// `.rodata` extract (binary)
    rodata: PathBuf,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opts.verbose { "debug" } else { "warn" }),
    )
    .init();

    let mut symbols = Symbols::load(&opts.symbols)
        .with_context(|| format!("could not load symbols from {}", opts.symbols.display()))?;
    if let Some(addr) = opts.text_start {
        symbols.text_start = addr;
    }
    if let Some(addr) = opts.crc_address {
        symbols.crc_address = addr;
    }

    let plan = symbols.file_plan()?;
    info!(
        "crc_value at {:#x}, offset {:#x} into text",
        symbols.crc_address,
        symbols.crc_address - symbols.text_start
    );

    let images = Images {
        text: opts.text,
        data: opts.data,
        rodata: opts.rodata,
    };
    let crc = generate(&plan, &images)?;
    println!("{}", format_checksum(crc));

    Ok(())
}
