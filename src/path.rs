//! C7: path resolution.
//!
//! Components are walked one at a time via directory lookups, starting
//! from the root inode. `..` pops a parent off a small stack sized to
//! the path's depth rather than the inode count — an `ArrayVec` is
//! enough since FUSE paths arrive bounded by `PATH_MAX` in practice,
//! and a fixed-capacity stack avoids a heap allocation on every
//! lookup.

use arrayvec::ArrayVec;

use crate::dir::DirStore;
use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::inode_store::InodeStore;
use crate::layout::{Inode, Superblock, ROOT_INODE};

/// Maximum number of ancestors tracked while resolving a single path.
/// Exceeding it is reported as `WfsError::RangeError` rather than
/// growing unbounded.
pub const MAX_PATH_DEPTH: usize = 64;

pub struct Resolver<'a> {
    image: &'a Image,
    inodes: InodeStore<'a>,
    dirs: DirStore<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(image: &'a Image, sb: Superblock) -> Self {
        Resolver {
            image,
            inodes: InodeStore::new(image, sb),
            dirs: DirStore::new(image, sb),
        }
    }

    fn load(&self, num: i32) -> Result<Inode> {
        self.inodes.retrieve(num)?.load(self.image)
    }

    /// Resolves an absolute, `/`-separated path to an inode number.
    /// `.` and `..` are handled against a bounded ancestor stack; `..`
    /// at the root is a no-op, matching typical Unix path semantics.
    pub fn resolve(&self, path: &str) -> Result<i32> {
        let mut current = ROOT_INODE;
        let mut stack: ArrayVec<i32, MAX_PATH_DEPTH> = ArrayVec::new();

        for component in path.split('/').filter(|c| !c.is_empty()) {
            match component {
                "." => continue,
                ".." => {
                    current = stack.pop().unwrap_or(ROOT_INODE);
                }
                name => {
                    let dir = self.load(current)?;
                    if !dir.is_dir() {
                        return Err(WfsError::NotADirectory);
                    }
                    let next = self.dirs.lookup(&dir, name)?;
                    stack.try_push(current).map_err(|_| WfsError::RangeError)?;
                    current = next;
                }
            }
        }
        Ok(current)
    }

    /// Splits `path` into the inode number of its parent directory and
    /// the final path component (the name to create/remove/look up
    /// within that directory). Fails if the parent doesn't resolve or
    /// isn't a directory.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> Result<(i32, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (parent_path, name) = match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..=idx], &trimmed[idx + 1..]),
            None => ("/", trimmed),
        };
        if name.is_empty() || name == "." || name == ".." {
            return Err(WfsError::InvalidArgument);
        }
        let parent_num = self.resolve(parent_path)?;
        let parent = self.load(parent_num)?;
        if !parent.is_dir() {
            return Err(WfsError::NotADirectory);
        }
        Ok((parent_num, name))
    }
}
