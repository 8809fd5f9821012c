//! C3: first-free bitmap allocator shared by the inode bitmap and the
//! data bitmap.
//!
//! Word size is 32 bits, little-end-in-word (bit 0 is the least
//! significant bit of word 0). First-fit: words equal to all-ones are
//! skipped outright; otherwise the first clear bit, scanning low to
//! high, wins.

use crate::error::{Result, WfsError};
use crate::image::Image;

pub const WORD_BITS: u32 = 32;

pub struct Bitmap<'a> {
    image: &'a Image,
    /// Byte offset of the bitmap region within the image.
    base: u64,
    /// Number of meaningful bits in the region (the region itself is
    /// rounded up to a whole number of words by the formatter).
    bits: u64,
}

impl<'a> Bitmap<'a> {
    pub fn new(image: &'a Image, base: u64, bits: u64) -> Self {
        Bitmap { image, base, bits }
    }

    fn word_count(&self) -> u64 {
        (self.bits + WORD_BITS as u64 - 1) / WORD_BITS as u64
    }

    fn read_word(&self, word: u64) -> Result<u32> {
        self.image.read(self.base + word * 4)
    }

    fn write_word(&self, word: u64, value: u32) -> Result<()> {
        self.image.write(self.base + word * 4, &value)
    }

    /// Scans for the first clear bit and sets it. Returns the bit
    /// index, or `WfsError::NoSpace` if every bit in the region is
    /// set.
    pub fn alloc(&self) -> Result<u32> {
        for word_idx in 0..self.word_count() {
            let word = self.read_word(word_idx)?;
            if word == u32::MAX {
                continue;
            }
            for bit in 0..WORD_BITS {
                if word & (1 << bit) == 0 {
                    self.write_word(word_idx, word | (1 << bit))?;
                    return Ok((word_idx as u32) * WORD_BITS + bit);
                }
            }
        }
        Err(WfsError::NoSpace)
    }

    /// Clears the bit at `index`. Out-of-range indices are an engine
    /// invariant violation: logged, not mutated, not panicked on.
    pub fn free(&self, index: u32) {
        if index as u64 >= self.bits {
            log::error!("bitmap free of out-of-range index {index}");
            return;
        }
        let word_idx = (index / WORD_BITS) as u64;
        let bit = index % WORD_BITS;
        match self.read_word(word_idx) {
            Ok(word) => {
                if let Err(e) = self.write_word(word_idx, word & !(1 << bit)) {
                    log::error!("bitmap free failed to write word {word_idx}: {e}");
                }
            }
            Err(e) => log::error!("bitmap free failed to read word {word_idx}: {e}"),
        }
    }

    pub fn is_set(&self, index: u32) -> Result<bool> {
        if index as u64 >= self.bits {
            return Ok(false);
        }
        let word = self.read_word((index / WORD_BITS) as u64)?;
        Ok(word & (1 << (index % WORD_BITS)) != 0)
    }

    /// Number of clear bits among the first `self.bits` bits.
    pub fn count_clear(&self) -> Result<u64> {
        let mut free = 0u64;
        for idx in 0..self.bits {
            if !self.is_set(idx as u32)? {
                free += 1;
            }
        }
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use tempfile::NamedTempFile;

    fn scratch_image(len: u64) -> (NamedTempFile, Image) {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(len).unwrap();
        let image = Image::open(tmp.path()).unwrap();
        (tmp, image)
    }

    #[test]
    fn first_fit_allocates_in_order() {
        let (_tmp, image) = scratch_image(64);
        let bm = Bitmap::new(&image, 0, 40);
        assert_eq!(bm.alloc().unwrap(), 0);
        assert_eq!(bm.alloc().unwrap(), 1);
        bm.free(0);
        assert_eq!(bm.alloc().unwrap(), 0);
    }

    #[test]
    fn alloc_skips_full_words() {
        let (_tmp, image) = scratch_image(64);
        let bm = Bitmap::new(&image, 0, 40);
        for _ in 0..32 {
            bm.alloc().unwrap();
        }
        assert_eq!(bm.alloc().unwrap(), 32);
    }

    #[test]
    fn alloc_reports_no_space() {
        let (_tmp, image) = scratch_image(64);
        let bm = Bitmap::new(&image, 0, 8);
        for _ in 0..8 {
            bm.alloc().unwrap();
        }
        assert_eq!(bm.alloc(), Err(WfsError::NoSpace));
    }

    #[test]
    fn count_clear_reflects_allocations() {
        let (_tmp, image) = scratch_image(64);
        let bm = Bitmap::new(&image, 0, 16);
        assert_eq!(bm.count_clear().unwrap(), 16);
        bm.alloc().unwrap();
        bm.alloc().unwrap();
        assert_eq!(bm.count_clear().unwrap(), 14);
    }
}
