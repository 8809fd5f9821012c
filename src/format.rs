//! C9: the formatter. Lays out a fresh superblock over a pre-sized
//! image file and seeds inode 0 as the root directory, matching
//! `mkfs.c`'s `setup_sb`/`wfs_mkfs`.

use std::path::Path;

use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::inode_store::InodeStore;
use crate::layout::{Inode, Superblock, BLOCK_SIZE, ROOT_INODE, SUPERBLOCK_SIZE};
use crate::time::now;

/// Rounds `n` up to the nearest multiple of 32, matching the original
/// formatter's bitmap-word alignment.
fn roundup32(n: u64) -> u64 {
    (n + 31) / 32 * 32
}

/// Formats the image backing `path` with room for (at least) `inodes`
/// inodes and `blocks` data blocks, both rounded up to a multiple of
/// 32 so the bitmaps land on whole-word boundaries. The file must
/// already be large enough to hold the computed layout; `format`
/// itself never resizes it.
pub fn format(path: impl AsRef<Path>, inodes: u64, blocks: u64) -> Result<()> {
    let num_inodes = roundup32(inodes.max(1));
    let num_data_blocks = roundup32(blocks.max(1));

    let i_bitmap_ptr = SUPERBLOCK_SIZE;
    let d_bitmap_ptr = i_bitmap_ptr + Superblock::bitmap_words(num_inodes) * 4;
    let i_blocks_ptr = d_bitmap_ptr + Superblock::bitmap_words(num_data_blocks) * 4;
    let d_blocks_ptr = i_blocks_ptr + num_inodes * BLOCK_SIZE;
    let total_len = d_blocks_ptr + num_data_blocks * BLOCK_SIZE;

    let image = Image::open(&path)?;
    if image.len < total_len {
        log::error!(
            "image too small for requested layout: have {}, need {total_len}",
            image.len
        );
        return Err(WfsError::NoSpace);
    }

    let sb = Superblock {
        num_inodes,
        num_data_blocks,
        i_bitmap_ptr,
        d_bitmap_ptr,
        i_blocks_ptr,
        d_blocks_ptr,
    };
    image.write(0, &sb)?;
    image.zero(i_bitmap_ptr, d_blocks_ptr - i_bitmap_ptr)?;
    image.zero(d_blocks_ptr, num_data_blocks * BLOCK_SIZE)?;

    let inode_store = InodeStore::new(&image, sb);
    let root_bit = inode_store.bitmap().alloc()?;
    debug_assert_eq!(root_bit as i32, ROOT_INODE);

    let now = now();
    let root = Inode {
        num: ROOT_INODE,
        mode: libc::S_IFDIR as u32 | 0o755,
        nlinks: 1,
        atim: now,
        ctim: now,
        mtim: now,
        ..Inode::default()
    };
    let root_offset = i_blocks_ptr + ROOT_INODE as u64 * BLOCK_SIZE;
    image.write(root_offset, &root)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sized_image(inodes: u64, blocks: u64) -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        let size = SUPERBLOCK_SIZE
            + inodes.div_ceil(32) * 4
            + blocks.div_ceil(32) * 4
            + inodes * BLOCK_SIZE
            + blocks * BLOCK_SIZE;
        tmp.as_file().set_len(size).unwrap();
        tmp
    }

    #[test]
    fn format_lays_out_superblock_and_root() {
        let tmp = sized_image(32, 32);
        format(tmp.path(), 32, 32).unwrap();
        let image = Image::open(tmp.path()).unwrap();
        let sb: Superblock = image.read(0).unwrap();
        assert_eq!(sb.num_inodes, 32);
        assert_eq!(sb.num_data_blocks, 32);

        let store = InodeStore::new(&image, sb);
        let root = store.retrieve(ROOT_INODE).unwrap().load(&image).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlinks, 1);
        assert_eq!(root.size, 0);
    }

    #[test]
    fn format_rejects_undersized_file() {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(64).unwrap();
        assert_eq!(format(tmp.path(), 32, 32), Err(WfsError::NoSpace));
    }

    #[test]
    fn format_rounds_counts_up_to_32() {
        let tmp = sized_image(32, 32);
        format(tmp.path(), 5, 10).unwrap();
        let image = Image::open(tmp.path()).unwrap();
        let sb: Superblock = image.read(0).unwrap();
        assert_eq!(sb.num_inodes, 32);
        assert_eq!(sb.num_data_blocks, 32);
    }
}
