//! Formats a regular file as a WFS image: lays out the superblock,
//! bitmaps, and inode table, and seeds the root directory.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::Verbosity;

use wfs::format::format;
use wfs::layout::{Superblock, BLOCK_SIZE};

/// Format a disk image for use with `wfs`.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the disk image to format.
    #[arg(short = 'i', long = "image")]
    image: PathBuf,

    /// Number of inodes to provision (rounded up to a multiple of 32).
    #[arg(short = 'n', long = "inodes", default_value_t = 32)]
    inodes: u64,

    /// Number of data blocks to provision (rounded up to a multiple of 32).
    #[arg(short = 'b', long = "blocks", default_value_t = 128)]
    blocks: u64,

    #[command(flatten)]
    verbosity: Verbosity,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let num_inodes = (cli.inodes + 31) / 32 * 32;
    let num_blocks = (cli.blocks + 31) / 32 * 32;
    let required_len = Superblock::bitmap_words(num_inodes) * 4
        + Superblock::bitmap_words(num_blocks) * 4
        + 48
        + num_inodes * BLOCK_SIZE
        + num_blocks * BLOCK_SIZE;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&cli.image)
        .with_context(|| format!("opening {}", cli.image.display()))?;
    file.set_len(required_len)
        .with_context(|| format!("sizing {} to {required_len} bytes", cli.image.display()))?;
    drop(file);

    format(&cli.image, cli.inodes, cli.blocks)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("formatting {}", cli.image.display()))?;

    log::info!(
        "formatted {} with {num_inodes} inodes and {num_blocks} data blocks ({required_len} bytes)",
        cli.image.display()
    );
    Ok(())
}
