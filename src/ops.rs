//! C8: the engine — the single entry point tying the allocator,
//! inode store, directory store, and path resolver together into the
//! operations a filesystem bridge calls.
//!
//! Every path-taking method strips ANSI control sequences from its
//! input first (so a name can't be used to inject escape codes into a
//! terminal reading `ls` output), matching every entry point in the
//! original engine doing the same before touching the image.

use scopeguard::guard;

use crate::block::BlockAddressing;
use crate::color;
use crate::data_alloc::DataAlloc;
use crate::dir::DirStore;
use crate::error::{Result, WfsError};
use crate::image::Image;
use crate::inode_store::InodeStore;
use crate::layout::{Inode, Superblock, BLOCK_SIZE, MAX_NAME};
use crate::path::Resolver;
use crate::time::now;

/// Caller identity as seen by `readdir`: only used to decide whether
/// to colorize names (the original colorizes only when the calling
/// process is literally named `ls`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerContext {
    pub is_ls: bool,
}

/// A `stat`-shaped attribute snapshot, independent of any bridge
/// crate's own type so the engine has no FUSE-specific dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ino: i32,
    pub mode: u32,
    pub nlinks: i32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl From<&Inode> for Attr {
    fn from(inode: &Inode) -> Self {
        Attr {
            ino: inode.num,
            mode: inode.mode,
            nlinks: inode.nlinks,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            blocks: (inode.size + 511) / 512,
            atime: inode.atim,
            mtime: inode.mtim,
            ctime: inode.ctim,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub blocks_free: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u64,
    pub name_max: u64,
}

/// One directory entry as surfaced by `readdir`: the raw inode number
/// plus the display name, already colorized if applicable.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub num: i32,
    pub display_name: String,
    pub is_dir: bool,
}

pub struct Wfs {
    image: Image,
    sb: Superblock,
}

impl Wfs {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let image = Image::open(path)?;
        let sb: Superblock = image.read(0)?;
        Ok(Wfs { image, sb })
    }

    fn inodes(&self) -> InodeStore<'_> {
        InodeStore::new(&self.image, self.sb)
    }

    fn dirs(&self) -> DirStore<'_> {
        DirStore::new(&self.image, self.sb)
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.image, self.sb)
    }

    fn blocks(&self) -> BlockAddressing<'_> {
        BlockAddressing::new(&self.image, self.sb)
    }

    fn clean(path: &str) -> String {
        color::strip_ansi(path)
    }

    fn load(&self, num: i32) -> Result<Inode> {
        self.inodes().retrieve(num)?.load(&self.image)
    }

    pub fn getattr(&self, path: &str) -> Result<Attr> {
        let path = Self::clean(path);
        let num = self.resolver().resolve(&path)?;
        let inode = self.load(num)?;
        Ok(Attr::from(&inode))
    }

    /// Creates a regular file at `path` with the given permission bits
    /// (caller supplies the full `mode`, including `S_IFREG`).
    pub fn mknod(&self, path: &str, mode: u32) -> Result<Attr> {
        let path = Self::clean(path);
        let file_type = mode & libc::S_IFMT as u32;
        if file_type == libc::S_IFCHR as u32 || file_type == libc::S_IFBLK as u32 {
            return Err(WfsError::PermissionDenied);
        }
        let resolver = self.resolver();
        let (parent_num, name) = resolver.resolve_parent(&path)?;
        if name.len() >= MAX_NAME {
            return Err(WfsError::InvalidArgument);
        }

        let inodes = self.inodes();
        let dirs = self.dirs();
        let parent_ref = inodes.retrieve(parent_num)?;
        let mut parent = parent_ref.load(&self.image)?;

        let child_ref = inodes.allocate()?;
        let rollback_child = guard(child_ref, |r| inodes.free(r));

        let mut child = child_ref.load(&self.image)?;
        child.mode = mode;
        child.size = 0;
        child_ref.store(&self.image, &child)?;

        dirs.add(&mut parent, name, child_ref.num)?;
        parent_ref.store(&self.image, &parent)?;

        scopeguard::ScopeGuard::into_inner(rollback_child);
        Ok(Attr::from(&child))
    }

    /// Creates a directory at `path`. `.` and `..` are never stored as
    /// physical dentries — `readdir` synthesizes them, matching the
    /// original engine's `wfs_readdir`/`get_inode_from_path`.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<Attr> {
        let path = Self::clean(path);
        let resolver = self.resolver();
        if resolver.resolve(&path).is_ok() {
            return Err(WfsError::AlreadyExists);
        }
        let (parent_num, name) = resolver.resolve_parent(&path)?;
        if name.len() >= MAX_NAME {
            return Err(WfsError::InvalidArgument);
        }

        let inodes = self.inodes();
        let dirs = self.dirs();
        let parent_ref = inodes.retrieve(parent_num)?;
        let mut parent = parent_ref.load(&self.image)?;

        let child_ref = inodes.allocate()?;
        let rollback_child = guard(child_ref, |r| inodes.free(r));

        let mut child = child_ref.load(&self.image)?;
        child.mode = (libc::S_IFDIR as u32) | mode;
        child.size = 0;
        child_ref.store(&self.image, &child)?;

        dirs.add(&mut parent, name, child_ref.num)?;
        parent_ref.store(&self.image, &parent)?;

        scopeguard::ScopeGuard::into_inner(rollback_child);
        Ok(Attr::from(&child))
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning
    /// the number of bytes actually filled. Offsets past end-of-file
    /// read zero bytes; holes inside the file read as zeroes.
    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let path = Self::clean(path);
        let num = self.resolver().resolve(&path)?;
        let inode_ref = self.inodes().retrieve(num)?;
        let mut inode = inode_ref.load(&self.image)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }
        if offset >= inode.size {
            return Ok(0);
        }

        let to_read = buf.len().min((inode.size - offset) as usize);
        let blocks = self.blocks();
        let mut done = 0usize;
        while done < to_read {
            let cur_off = offset + done as u64;
            let within = (cur_off % BLOCK_SIZE) as usize;
            let chunk = (BLOCK_SIZE as usize - within).min(to_read - done);
            match blocks.data_offset(&mut inode, cur_off, false)? {
                Some(src) => self.image.read_bytes(src, &mut buf[done..done + chunk])?,
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }

        inode.atim = now();
        inode_ref.store(&self.image, &inode)?;
        Ok(to_read)
    }

    /// Writes `data` at `offset`, extending the file (and allocating
    /// blocks, including a single-indirect block past `D_BLOCK`) as
    /// needed.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let path = Self::clean(path);
        let num = self.resolver().resolve(&path)?;
        let inode_ref = self.inodes().retrieve(num)?;
        let mut inode = inode_ref.load(&self.image)?;
        if inode.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        let blocks = self.blocks();
        let mut allocated = Vec::new();
        let mut done = 0usize;
        let result: Result<()> = (|| {
            while done < data.len() {
                let cur_off = offset + done as u64;
                let within = (cur_off % BLOCK_SIZE) as usize;
                let chunk = (BLOCK_SIZE as usize - within).min(data.len() - done);
                let (dst, fresh) = blocks.data_offset_tracked(&mut inode, cur_off, true)?;
                allocated.extend(fresh);
                let dst = dst.ok_or(WfsError::NoSpace)?;
                self.image.write_bytes(dst, &data[done..done + chunk])?;
                done += chunk;
            }
            Ok(())
        })();
        if let Err(e) = result {
            // Every block in `allocated` is already committed in the data
            // bitmap but not yet referenced by any stored inode — free
            // them rather than leaking a bit nothing points to.
            for block in allocated {
                blocks.free_block(block);
            }
            return Err(e);
        }

        let end = offset + data.len() as u64;
        if end > inode.size {
            inode.size = end;
        }
        let ts = now();
        inode.mtim = ts;
        inode.ctim = ts;
        inode_ref.store(&self.image, &inode)?;
        Ok(data.len())
    }

    /// Lists `path`'s entries, colorizing names when `ctx.is_ls` and
    /// the child has a non-`none` color set.
    fn display_name(ctx: CallerContext, color_code: u8, name: &str) -> String {
        if ctx.is_ls && color_code != 0 {
            color::colorize(color_code, name)
        } else {
            color::strip_ansi(name)
        }
    }

    /// Lists `path`'s entries. `.` and `..` are never stored as
    /// physical dentries (see `mkdir`); they're synthesized here,
    /// matching the original engine's `wfs_readdir`.
    pub fn readdir(&self, path: &str, ctx: CallerContext) -> Result<Vec<DirEntry>> {
        let path = Self::clean(path);
        let resolver = self.resolver();
        let num = resolver.resolve(&path)?;
        let inodes = self.inodes();
        let inode_ref = inodes.retrieve(num)?;
        let mut inode = inode_ref.load(&self.image)?;
        if !inode.is_dir() {
            return Err(WfsError::NotADirectory);
        }

        let parent_num = if path == "/" {
            num
        } else {
            resolver.resolve_parent(&path)?.0
        };
        let parent_color = if parent_num == num {
            inode.color
        } else {
            match inodes.retrieve(parent_num) {
                Ok(r) => r.load(&self.image)?.color,
                Err(_) => 0,
            }
        };

        let mut out = Vec::new();
        out.push(DirEntry {
            num,
            display_name: Self::display_name(ctx, inode.color, "."),
            is_dir: true,
        });
        out.push(DirEntry {
            num: parent_num,
            display_name: Self::display_name(ctx, parent_color, ".."),
            is_dir: true,
        });

        let dirs = self.dirs();
        for (name, child_num) in dirs.iter(&inode)? {
            let child = match inodes.retrieve(child_num) {
                Ok(r) => r.load(&self.image)?,
                Err(_) => continue,
            };
            out.push(DirEntry {
                num: child_num,
                display_name: Self::display_name(ctx, child.color, &name),
                is_dir: child.is_dir(),
            });
        }

        inode.atim = now();
        inode_ref.store(&self.image, &inode)?;
        Ok(out)
    }

    /// Removes a non-directory entry, freeing its data blocks
    /// (including any single-indirect block and everything it points
    /// to) once its directory entry is gone.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let path = Self::clean(path);
        if path == "/" {
            return Err(WfsError::IsADirectory);
        }
        let resolver = self.resolver();
        let (parent_num, name) = resolver.resolve_parent(&path)?;

        let inodes = self.inodes();
        let dirs = self.dirs();
        let parent_ref = inodes.retrieve(parent_num)?;
        let mut parent = parent_ref.load(&self.image)?;

        let child_num = dirs.lookup(&parent, name)?;
        let child_ref = inodes.retrieve(child_num)?;
        let mut child = child_ref.load(&self.image)?;
        if child.is_dir() {
            return Err(WfsError::IsADirectory);
        }

        dirs.remove(&mut parent, child_num)?;
        parent_ref.store(&self.image, &parent)?;

        self.blocks().truncate(&mut child);
        inodes.free(child_ref);
        Ok(())
    }

    /// Removes a directory entry. Matches the original engine: an
    /// existing non-empty directory is still removed (see DESIGN.md).
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let path = Self::clean(path);
        if path == "/" {
            return Err(WfsError::PermissionDenied);
        }
        let resolver = self.resolver();
        let (parent_num, name) = resolver.resolve_parent(&path)?;

        let inodes = self.inodes();
        let dirs = self.dirs();
        let parent_ref = inodes.retrieve(parent_num)?;
        let mut parent = parent_ref.load(&self.image)?;

        let child_num = dirs.lookup(&parent, name)?;
        let child_ref = inodes.retrieve(child_num)?;
        let mut child = child_ref.load(&self.image)?;
        if !child.is_dir() {
            return Err(WfsError::NotADirectory);
        }

        self.blocks().truncate(&mut child);
        dirs.remove(&mut parent, child_num)?;
        parent_ref.store(&self.image, &parent)?;
        inodes.free(child_ref);
        Ok(())
    }

    pub fn statfs(&self) -> Result<StatFs> {
        let inodes = self.inodes();
        let data = DataAlloc::new(&self.image, self.sb);
        Ok(StatFs {
            blocks: self.sb.num_data_blocks,
            blocks_free: data.bitmap().count_clear()?,
            files: self.sb.num_inodes,
            files_free: inodes.bitmap().count_clear()?,
            block_size: BLOCK_SIZE,
            name_max: MAX_NAME as u64,
        })
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &str) -> Result<()> {
        let path = Self::clean(path);
        if name != "user.color" {
            return Err(WfsError::NoXattr);
        }
        let num = self.resolver().resolve(&path)?;
        let inode_ref = self.inodes().retrieve(num)?;
        let mut inode = inode_ref.load(&self.image)?;

        let lowered = value.to_lowercase();
        let stripped = color::strip_ansi(&lowered);
        let code = color::parse_color_name(stripped.trim()).ok_or(WfsError::InvalidArgument)?;
        inode.color = code;
        inode.ctim = now();
        inode_ref.store(&self.image, &inode)
    }

    /// Returns the color's name. `buf_len` mirrors the bridge's
    /// two-phase xattr protocol: `0` means "just tell me the required
    /// length", a too-small nonzero length is `RangeError`.
    /// Returns the xattr value for a zero-length `buf_len` (the size
    /// query), or the value plus its NUL terminator once `buf_len` is
    /// large enough to hold both, matching the original's
    /// `memcpy`-including-terminator behavior.
    pub fn getxattr(&self, path: &str, name: &str, buf_len: usize) -> Result<String> {
        let path = Self::clean(path);
        if name != "user.color" {
            return Err(WfsError::NoXattr);
        }
        let num = self.resolver().resolve(&path)?;
        let inode = self.load(num)?;
        let value = color::color_name(inode.color).to_string();
        if buf_len == 0 {
            return Ok(value);
        }
        if buf_len < value.len() + 1 {
            return Err(WfsError::RangeError);
        }
        Ok(value + "\0")
    }

    pub fn removexattr(&self, path: &str, name: &str) -> Result<()> {
        let path = Self::clean(path);
        if name != "user.color" {
            return Err(WfsError::NoXattr);
        }
        let num = self.resolver().resolve(&path)?;
        let inode_ref = self.inodes().retrieve(num)?;
        let mut inode = inode_ref.load(&self.image)?;
        inode.color = 0;
        inode.ctim = now();
        inode_ref.store(&self.image, &inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format;
    use tempfile::NamedTempFile;

    fn scratch(inodes: u64, blocks: u64) -> (NamedTempFile, Wfs) {
        let tmp = NamedTempFile::new().unwrap();
        let size = 48 + inodes.div_ceil(32) * 4 + blocks.div_ceil(32) * 4 + inodes * BLOCK_SIZE + blocks * BLOCK_SIZE;
        tmp.as_file().set_len(size).unwrap();
        format(tmp.path(), inodes, blocks).unwrap();
        let wfs = Wfs::open(tmp.path()).unwrap();
        (tmp, wfs)
    }

    #[test]
    fn mknod_then_getattr() {
        let (_tmp, wfs) = scratch(32, 32);
        let attr = wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        assert_eq!(attr.size, 0);
        let got = wfs.getattr("/a.txt").unwrap();
        assert_eq!(got.ino, attr.ino);
    }

    #[test]
    fn mknod_rejects_device_nodes() {
        let (_tmp, wfs) = scratch(32, 32);
        assert_eq!(
            wfs.mknod("/dev_c", libc::S_IFCHR as u32 | 0o644),
            Err(WfsError::PermissionDenied)
        );
        assert_eq!(
            wfs.mknod("/dev_b", libc::S_IFBLK as u32 | 0o644),
            Err(WfsError::PermissionDenied)
        );
    }

    #[test]
    fn mknod_duplicate_fails() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        assert_eq!(
            wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644),
            Err(WfsError::AlreadyExists)
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        let n = wfs.write("/a.txt", 0, b"hello world").unwrap();
        assert_eq!(n, 11);
        let mut buf = [0u8; 11];
        let read = wfs.read("/a.txt", 0, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.write("/a.txt", 0, b"hi").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(wfs.read("/a.txt", 10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn write_hole_reads_as_zero() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.write("/a.txt", 1000, b"end").unwrap();
        let mut buf = [0xffu8; 10];
        let read = wfs.read("/a.txt", 0, &mut buf).unwrap();
        assert_eq!(read, 10);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn mkdir_and_readdir() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mkdir("/sub", 0o755).unwrap();
        let entries = wfs.readdir("/", CallerContext::default()).unwrap();
        assert!(entries.iter().any(|e| e.display_name == "sub" && e.is_dir));
    }

    #[test]
    fn unlink_frees_inode_and_removes_entry() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.unlink("/a.txt").unwrap();
        assert_eq!(wfs.getattr("/a.txt"), Err(WfsError::NotFound));
    }

    #[test]
    fn unlink_directory_fails() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mkdir("/sub", 0o755).unwrap();
        assert_eq!(wfs.unlink("/sub"), Err(WfsError::IsADirectory));
    }

    #[test]
    fn rmdir_nonempty_still_succeeds() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mkdir("/sub", 0o755).unwrap();
        wfs.mknod("/sub/file.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.rmdir("/sub").unwrap();
        assert_eq!(wfs.getattr("/sub"), Err(WfsError::NotFound));
    }

    #[test]
    fn xattr_round_trips() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.setxattr("/a.txt", "user.color", "Red").unwrap();
        assert_eq!(wfs.getxattr("/a.txt", "user.color", 16).unwrap(), "red\0");
        wfs.removexattr("/a.txt", "user.color").unwrap();
        assert_eq!(wfs.getxattr("/a.txt", "user.color", 16).unwrap(), "none\0");
    }

    #[test]
    fn getxattr_data_path_includes_nul_terminator() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.setxattr("/a.txt", "user.color", "red").unwrap();
        let value = wfs.getxattr("/a.txt", "user.color", 4).unwrap();
        assert_eq!(value.as_bytes(), b"red\0");
    }

    #[test]
    fn getxattr_zero_len_reports_required_size() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.setxattr("/a.txt", "user.color", "blue").unwrap();
        let len = wfs.getxattr("/a.txt", "user.color", 0).unwrap();
        assert_eq!(len, "blue");
    }

    #[test]
    fn getxattr_too_small_buffer_fails() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.setxattr("/a.txt", "user.color", "magenta").unwrap();
        assert_eq!(wfs.getxattr("/a.txt", "user.color", 2), Err(WfsError::RangeError));
    }

    #[test]
    fn write_past_capacity_frees_blocks_allocated_this_call() {
        let (_tmp, wfs) = scratch(32, 32);
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        let before = wfs.statfs().unwrap();
        let huge = vec![0u8; (crate::layout::MAX_FILE_SIZE + BLOCK_SIZE) as usize];
        assert_eq!(wfs.write("/a.txt", 0, &huge), Err(WfsError::NoSpace));
        let after = wfs.statfs().unwrap();
        assert_eq!(after.blocks_free, before.blocks_free);
        assert_eq!(wfs.getattr("/a.txt").unwrap().size, 0);
    }

    #[test]
    fn statfs_reflects_allocations() {
        let (_tmp, wfs) = scratch(32, 32);
        let before = wfs.statfs().unwrap();
        wfs.mknod("/a.txt", libc::S_IFREG as u32 | 0o644).unwrap();
        wfs.write("/a.txt", 0, b"data").unwrap();
        let after = wfs.statfs().unwrap();
        assert!(after.files_free < before.files_free);
        assert!(after.blocks_free < before.blocks_free);
    }
}
