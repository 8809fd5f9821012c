//! C1: the container image.
//!
//! The spec models the image as a byte-addressable mapped region with
//! typed views into it. This implementation backs that abstraction
//! with positioned reads/writes against the open container file
//! (`FileExt::read_exact_at` / `write_all_at`) rather than a live
//! `mmap`: every access goes straight to the file, so there is no
//! caching layer to keep coherent and no long-lived aliasing pointer
//! into a single mapped region to reason about — each accessor hands
//! back a fresh, owned value or writes one back immediately, which is
//! what the "disjoint views coexist" design note asks for. See
//! DESIGN.md for why this departs from a literal mmap.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use zerocopy::{AsBytes, FromBytes};

use crate::error::{Result, WfsError};
use crate::layout::BLOCK_SIZE;

pub struct Image {
    file: File,
    pub len: u64,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| WfsError::NotFound)?;
        let len = file.metadata().map_err(|_| WfsError::Io)?.len();
        Ok(Image { file, len })
    }

    /// Reads a typed record at `offset`. The record must not straddle
    /// the end of the image.
    pub fn read<T: AsBytes + FromBytes + Default>(&self, offset: u64) -> Result<T> {
        let mut value = T::default();
        self.file
            .read_exact_at(value.as_bytes_mut(), offset)
            .map_err(|e| {
                log::error!("image read at {offset} failed: {e}");
                WfsError::Io
            })?;
        Ok(value)
    }

    /// Writes a typed record at `offset`.
    pub fn write<T: AsBytes>(&self, offset: u64, value: &T) -> Result<()> {
        self.file.write_all_at(value.as_bytes(), offset).map_err(|e| {
            log::error!("image write at {offset} failed: {e}");
            WfsError::Io
        })
    }

    /// Reads `len` bytes starting at `offset` into `buf[..len]`.
    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset).map_err(|e| {
            log::error!("image read at {offset} failed: {e}");
            WfsError::Io
        })
    }

    /// Writes `buf` at `offset`.
    pub fn write_bytes(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset).map_err(|e| {
            log::error!("image write at {offset} failed: {e}");
            WfsError::Io
        })
    }

    /// Zeroes `len` bytes starting at `offset`.
    pub fn zero(&self, offset: u64, len: u64) -> Result<()> {
        let zeros = vec![0u8; len as usize];
        self.write_bytes(offset, &zeros)
    }

    /// Zeroes exactly one block at `offset`.
    pub fn zero_block(&self, offset: u64) -> Result<()> {
        self.zero(offset, BLOCK_SIZE)
    }
}
