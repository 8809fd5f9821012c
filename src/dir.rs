//! C6: the directory entry store.
//!
//! Directories only ever use the direct block pointers (never the
//! single-indirect block) — matching the original engine's explicit
//! choice not to extend directories past `D_BLOCK` data blocks. A
//! removed entry is never compacted: its slot is zeroed in place
//! (`num == 0`) and is the first candidate `add` reuses, so holes left
//! by `remove` don't grow the directory unnecessarily.

use crate::block::BlockAddressing;
use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::layout::{Dentry, Inode, Superblock, BLOCK_SIZE, D_BLOCK, DENTRIES_PER_BLOCK, DENTRY_SIZE, MAX_NAME};
use crate::time::now;

pub struct DirStore<'a> {
    image: &'a Image,
    addressing: BlockAddressing<'a>,
}

impl<'a> DirStore<'a> {
    pub fn new(image: &'a Image, sb: Superblock) -> Self {
        DirStore {
            image,
            addressing: BlockAddressing::new(image, sb),
        }
    }

    fn direct_block_offset(&self, dir: &Inode, slot: usize) -> u64 {
        dir.blocks[slot]
    }

    /// Looks up `name` in `dir`, returning its inode number.
    pub fn lookup(&self, dir: &Inode, name: &str) -> Result<i32> {
        for i in 0..D_BLOCK {
            let block = self.direct_block_offset(dir, i);
            if block == 0 {
                continue;
            }
            for j in 0..DENTRIES_PER_BLOCK {
                let dentry: Dentry = self.image.read(block + j * DENTRY_SIZE)?;
                if !dentry.is_vacant() && dentry.name_str() == name {
                    return Ok(dentry.num);
                }
            }
        }
        Err(WfsError::NotFound)
    }

    /// Inserts `(name, num)` into `dir`, reusing the first vacant slot
    /// across its allocated blocks, or allocating a new block if every
    /// allocated block is full. `dir` is mutated in place (size,
    /// mtim/ctim, and possibly a newly allocated block pointer); the
    /// caller is responsible for writing it back.
    pub fn add(&self, dir: &mut Inode, name: &str, num: i32) -> Result<()> {
        if !dir.is_dir() {
            return Err(WfsError::NotADirectory);
        }
        if name.len() >= MAX_NAME {
            return Err(WfsError::InvalidArgument);
        }

        let mut next_empty_block: Option<usize> = None;
        let mut free_slot: Option<u64> = None;

        for i in 0..D_BLOCK {
            let block = dir.blocks[i];
            if block == 0 {
                if next_empty_block.is_none() {
                    next_empty_block = Some(i);
                }
                continue;
            }
            for j in 0..DENTRIES_PER_BLOCK {
                let offset = block + j * DENTRY_SIZE;
                let dentry: Dentry = self.image.read(offset)?;
                if dentry.is_vacant() {
                    if free_slot.is_none() {
                        free_slot = Some(offset);
                    }
                    continue;
                }
                if dentry.name_str() == name {
                    return Err(WfsError::AlreadyExists);
                }
            }
        }

        let offset = if let Some(offset) = free_slot {
            offset
        } else {
            let i = next_empty_block.ok_or(WfsError::NoSpace)?;
            let new_block = self.addressing.data_offset(dir, i as u64 * BLOCK_SIZE, true)?.unwrap();
            let needed_size = (i as u64 + 1) * BLOCK_SIZE;
            if dir.size < needed_size {
                dir.size = needed_size;
            }
            new_block
        };

        let mut entry = Dentry::default();
        entry.set_name(name);
        entry.num = num;
        self.image.write(offset, &entry)?;

        let now = now();
        dir.mtim = now;
        dir.ctim = now;
        Ok(())
    }

    /// Zeroes the dentry matching `num` in `dir`, leaving a hole for a
    /// later `add` to reuse. Returns `WfsError::NotFound` if `num`
    /// isn't present.
    pub fn remove(&self, dir: &mut Inode, num: i32) -> Result<()> {
        for i in 0..D_BLOCK {
            let block = dir.blocks[i];
            if block == 0 {
                continue;
            }
            for j in 0..DENTRIES_PER_BLOCK {
                let offset = block + j * DENTRY_SIZE;
                let dentry: Dentry = self.image.read(offset)?;
                if !dentry.is_vacant() && dentry.num == num {
                    self.image.write(offset, &Dentry::default())?;
                    let now = now();
                    dir.mtim = now;
                    dir.ctim = now;
                    return Ok(());
                }
            }
        }
        Err(WfsError::NotFound)
    }

    /// Returns every live `(name, num)` pair in `dir`, in on-disk
    /// order. Vacant slots are skipped.
    pub fn iter(&self, dir: &Inode) -> Result<Vec<(String, i32)>> {
        let mut out = Vec::new();
        for i in 0..D_BLOCK {
            let block = dir.blocks[i];
            if block == 0 {
                continue;
            }
            for j in 0..DENTRIES_PER_BLOCK {
                let dentry: Dentry = self.image.read(block + j * DENTRY_SIZE)?;
                if !dentry.is_vacant() {
                    out.push((dentry.name_str().to_string(), dentry.num));
                }
            }
        }
        Ok(out)
    }

    /// True if `dir` holds nothing but `.` and `..`.
    pub fn is_empty(&self, dir: &Inode) -> Result<bool> {
        Ok(self.iter(dir)?.iter().all(|(name, _)| name == "." || name == ".."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format;
    use crate::inode_store::InodeStore;
    use crate::layout::Superblock;
    use rstest::rstest;
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
    fn add_then_lookup_round_trips() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let root_ref = store.retrieve(0).unwrap();
        let mut root = root_ref.load(&image).unwrap();
        let dirs = DirStore::new(&image, sb);
        dirs.add(&mut root, "foo", 5).unwrap();
        root_ref.store(&image, &root).unwrap();
        assert_eq!(dirs.lookup(&root, "foo").unwrap(), 5);
    }

    #[test]
    fn add_duplicate_name_fails() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let root_ref = store.retrieve(0).unwrap();
        let mut root = root_ref.load(&image).unwrap();
        let dirs = DirStore::new(&image, sb);
        dirs.add(&mut root, "foo", 5).unwrap();
        assert_eq!(dirs.add(&mut root, "foo", 6), Err(WfsError::AlreadyExists));
    }

    #[test]
    fn remove_then_add_reuses_slot() {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let root_ref = store.retrieve(0).unwrap();
        let mut root = root_ref.load(&image).unwrap();
        let dirs = DirStore::new(&image, sb);
        dirs.add(&mut root, "foo", 5).unwrap();
        dirs.remove(&mut root, 5).unwrap();
        assert_eq!(dirs.lookup(&root, "foo"), Err(WfsError::NotFound));
        dirs.add(&mut root, "bar", 6).unwrap();
        assert_eq!(dirs.lookup(&root, "bar").unwrap(), 6);
    }

    #[rstest]
    #[case(MAX_NAME - 2, true)]
    #[case(MAX_NAME - 1, true)]
    #[case(MAX_NAME, false)]
    fn name_length_boundary_table(#[case] len: usize, #[case] should_succeed: bool) {
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let root_ref = store.retrieve(0).unwrap();
        let mut root = root_ref.load(&image).unwrap();
        let dirs = DirStore::new(&image, sb);
        let name: String = "a".repeat(len);
        assert_eq!(dirs.add(&mut root, &name, 5).is_ok(), should_succeed);
    }

    #[test]
    fn fresh_root_has_no_physical_dentries() {
        // `.`/`..` are synthesized by `ops::Wfs::readdir`, never stored.
        let (_tmp, image, sb) = scratch(32, 32);
        let store = InodeStore::new(&image, sb);
        let root = store.retrieve(0).unwrap().load(&image).unwrap();
        let dirs = DirStore::new(&image, sb);
        assert!(dirs.is_empty(&root).unwrap());
        assert!(dirs.iter(&root).unwrap().is_empty());
        assert_eq!(root.size, 0);
    }
}
