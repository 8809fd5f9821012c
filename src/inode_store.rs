//! C4: inode allocation, release, and retrieval.

use crate::bitmap::Bitmap;
use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::layout::{Inode, Superblock, BLOCK_SIZE};
use crate::time::now;

/// A lightweight handle to an inode slot: just its number and its
/// byte offset in the image. Every field access re-reads (or
/// re-writes) a fresh copy from the image rather than holding a live
/// borrow across calls, so disjoint handles can coexist freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRef {
    pub num: i32,
    pub offset: u64,
}

impl InodeRef {
    pub fn load(&self, image: &Image) -> Result<Inode> {
        image.read(self.offset)
    }

    pub fn store(&self, image: &Image, inode: &Inode) -> Result<()> {
        debug_assert_eq!(inode.num, self.num);
        image.write(self.offset, inode)
    }
}

pub struct InodeStore<'a> {
    image: &'a Image,
    sb: Superblock,
}

impl<'a> InodeStore<'a> {
    pub fn new(image: &'a Image, sb: Superblock) -> Self {
        InodeStore { image, sb }
    }

    pub fn bitmap(&self) -> Bitmap<'a> {
        Bitmap::new(self.image, self.sb.i_bitmap_ptr, self.sb.num_inodes)
    }

    fn offset_of(&self, num: i32) -> u64 {
        self.sb.i_blocks_ptr + num as u64 * BLOCK_SIZE
    }

    /// Allocates a bit, zeroes the block, and writes a fresh inode
    /// record (`nlinks = 1`, timestamps = now, color = none).
    pub fn allocate(&self) -> Result<InodeRef> {
        let num = self.bitmap().alloc()? as i32;
        let offset = self.offset_of(num);
        self.image.zero_block(offset)?;
        let now = now();
        let inode = Inode {
            num,
            nlinks: 1,
            atim: now,
            mtim: now,
            ctim: now,
            ..Inode::default()
        };
        self.image.write(offset, &inode)?;
        Ok(InodeRef { num, offset })
    }

    /// Clears the bitmap bit and zeroes the block.
    pub fn free(&self, inode_ref: InodeRef) {
        self.bitmap().free(inode_ref.num as u32);
        if let Err(e) = self.image.zero_block(inode_ref.offset) {
            log::error!("failed to zero freed inode {}: {e}", inode_ref.num);
        }
    }

    /// Bounds- and bitmap-checks `num`, returning `WfsError::NotFound`
    /// if it is out of range or the bit is clear.
    pub fn retrieve(&self, num: i32) -> Result<InodeRef> {
        if num < 0 || num as u64 >= self.sb.num_inodes {
            return Err(WfsError::NotFound);
        }
        if !self.bitmap().is_set(num as u32)? {
            return Err(WfsError::NotFound);
        }
        Ok(InodeRef {
            num,
            offset: self.offset_of(num),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format;
    use tempfile::NamedTempFile;

    fn scratch(inodes: u64, blocks: u64) -> (NamedTempFile, Image, Superblock) {
        let tmp = NamedTempFile::new().unwrap();
        let size = 48 + inodes.div_ceil(32) * 4 + blocks.div_ceil(32) * 4 + inodes * BLOCK_SIZE + blocks * BLOCK_SIZE;
        tmp.as_file().set_len(size).unwrap();
        format(tmp.path(), inodes, blocks).unwrap();
        let image = Image::open(tmp.path()).unwrap();
        let sb: Superblock = image.read(0).unwrap();
        (tmp, image, sb)
    }

    #[test]
    fn allocate_then_retrieve_round_trips() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let ir = store.allocate().unwrap();
        assert_eq!(ir.num, 1); // 0 is the root, taken by format()
        let inode = store.retrieve(ir.num).unwrap().load(&image).unwrap();
        assert_eq!(inode.nlinks, 1);
    }

    #[test]
    fn free_then_retrieve_fails() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let ir = store.allocate().unwrap();
        store.free(ir);
        assert_eq!(store.retrieve(ir.num), Err(WfsError::NotFound));
    }

    #[test]
    fn retrieve_out_of_range_fails() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        assert_eq!(store.retrieve(-1), Err(WfsError::NotFound));
        assert_eq!(store.retrieve(1000), Err(WfsError::NotFound));
    }
}
