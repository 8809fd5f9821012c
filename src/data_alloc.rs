//! Allocator over the data-block region specifically: wraps the
//! generic C3 bitmap with the data region's base offset and turns
//! allocated bit indices into on-disk byte offsets.

use crate::bitmap::Bitmap;
use crate::error::Result;
use crate::image::Image;
use crate::layout::{Superblock, BLOCK_SIZE};

pub struct DataAlloc<'a> {
    image: &'a Image,
    sb: Superblock,
}

impl<'a> DataAlloc<'a> {
    pub fn new(image: &'a Image, sb: Superblock) -> Self {
        DataAlloc { image, sb }
    }

    pub fn bitmap(&self) -> Bitmap<'a> {
        Bitmap::new(self.image, self.sb.d_bitmap_ptr, self.sb.num_data_blocks)
    }

    /// Allocates a free data block and zeroes it, returning its
    /// on-disk byte offset.
    pub fn alloc_zeroed(&self) -> Result<u64> {
        let idx = self.bitmap().alloc()?;
        let offset = self.sb.d_blocks_ptr + idx as u64 * BLOCK_SIZE;
        self.image.zero_block(offset)?;
        Ok(offset)
    }

    /// Frees the data block at `offset` and zeroes it. An offset
    /// outside the data region is an engine invariant violation:
    /// logged, not mutated.
    pub fn free(&self, offset: u64) {
        let region_end = self.sb.d_blocks_ptr + self.sb.num_data_blocks * BLOCK_SIZE;
        if offset < self.sb.d_blocks_ptr || offset >= region_end {
            log::error!("data block offset {offset} out of range");
            return;
        }
        let idx = ((offset - self.sb.d_blocks_ptr) / BLOCK_SIZE) as u32;
        self.bitmap().free(idx);
        if let Err(e) = self.image.zero_block(offset) {
            log::error!("failed to zero freed block at {offset}: {e}");
        }
    }
}
