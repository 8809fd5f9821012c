//! C5: translating a file byte offset into a location in the image,
//! via an inode's direct and single-indirect block pointers.
//!
//! Holes are legal: resolving an offset that falls on an unallocated
//! block with `alloc = false` returns `Ok(None)`; callers (currently
//! only `read`) treat that as zero-filled.

use crate::data_alloc::DataAlloc;
use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::layout::{Inode, Superblock, BLOCK_SIZE, D_BLOCK, MAX_FILE_SIZE};

pub struct BlockAddressing<'a> {
    image: &'a Image,
    data: DataAlloc<'a>,
}

impl<'a> BlockAddressing<'a> {
    pub fn new(image: &'a Image, sb: Superblock) -> Self {
        BlockAddressing {
            image,
            data: DataAlloc::new(image, sb),
        }
    }

    /// Resolves the block (not byte-within-block) holding
    /// `byte_offset`, provisioning storage along the way when `alloc`
    /// is set. Every block freshly allocated during this call (the
    /// indirect block and/or the leaf block) is appended to
    /// `allocated`, so a caller that fails partway through a
    /// multi-block operation can free exactly what it provisioned.
    fn resolve_block_tracked(
        &self,
        inode: &mut Inode,
        byte_offset: u64,
        alloc: bool,
        allocated: &mut Vec<u64>,
    ) -> Result<Option<u64>> {
        if byte_offset >= MAX_FILE_SIZE {
            return Err(WfsError::NoSpace);
        }

        let block_idx = byte_offset / BLOCK_SIZE;

        if (block_idx as usize) < D_BLOCK {
            let slot = &mut inode.blocks[block_idx as usize];
            if *slot == 0 {
                if !alloc {
                    return Ok(None);
                }
                *slot = self.data.alloc_zeroed()?;
                allocated.push(*slot);
            }
            return Ok(Some(*slot));
        }

        let indirect_idx = block_idx - D_BLOCK as u64;
        if inode.indirect_ptr() == 0 {
            if !alloc {
                return Ok(None);
            }
            let ptr = self.data.alloc_zeroed()?;
            inode.set_indirect_ptr(ptr);
            allocated.push(ptr);
        }

        let entry_offset = inode.indirect_ptr() + indirect_idx * 8;
        let mut ptr: u64 = self.image.read(entry_offset)?;
        if ptr == 0 {
            if !alloc {
                return Ok(None);
            }
            ptr = self.data.alloc_zeroed()?;
            self.image.write(entry_offset, &ptr)?;
            allocated.push(ptr);
        }
        Ok(Some(ptr))
    }

    /// As `resolve_block_tracked`, but returns the full image offset
    /// (block offset + byte-within-block) alongside whatever blocks
    /// were freshly allocated to resolve it.
    pub fn data_offset_tracked(
        &self,
        inode: &mut Inode,
        byte_offset: u64,
        alloc: bool,
    ) -> Result<(Option<u64>, Vec<u64>)> {
        let within = byte_offset % BLOCK_SIZE;
        let mut allocated = Vec::new();
        let block = self.resolve_block_tracked(inode, byte_offset, alloc, &mut allocated)?;
        Ok((block.map(|b| b + within), allocated))
    }

    /// As `data_offset_tracked`, but discards the allocation list for
    /// callers that don't need rollback (reads, and writes that
    /// persist the inode before any later step can fail).
    pub fn data_offset(&self, inode: &mut Inode, byte_offset: u64, alloc: bool) -> Result<Option<u64>> {
        Ok(self.data_offset_tracked(inode, byte_offset, alloc)?.0)
    }

    /// Frees a block this instance previously allocated. Exposed so
    /// callers that tracked their own allocations (via
    /// `data_offset_tracked`) can roll them back on a later failure.
    pub fn free_block(&self, offset: u64) {
        self.data.free(offset);
    }

    /// Frees every direct block and, if present, the indirect block
    /// and everything it points to. Used by `unlink`/`rmdir`.
    pub fn truncate(&self, inode: &mut Inode) {
        for slot in inode.blocks[..D_BLOCK].iter_mut() {
            if *slot != 0 {
                self.data.free(*slot);
                *slot = 0;
            }
        }
        let indirect = inode.indirect_ptr();
        if indirect != 0 {
            let per_block = (BLOCK_SIZE / 8) as usize;
            for i in 0..per_block {
                let entry_off = indirect + (i as u64) * 8;
                match self.image.read::<u64>(entry_off) {
                    Ok(child) if child != 0 => self.data.free(child),
                    Ok(_) => {}
                    Err(e) => log::error!("failed reading indirect entry {i}: {e}"),
                }
            }
            self.data.free(indirect);
            inode.set_indirect_ptr(0);
        }
    }
}
