//! The FUSE bridge: a thin `fuser::Filesystem` adapter over the
//! path-based `wfs::Wfs` engine.
//!
//! FUSE identifies files by opaque 64-bit inode numbers and asks for
//! children by `(parent_ino, name)`; the engine instead resolves
//! `/`-separated path strings. The bridge's only real job is holding
//! the map between the two: a `parent_ino -> (name -> ino)` directory
//! cache plus an `ino -> path` table, extended on every `lookup` and
//! consulted everywhere else.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyStatfs, ReplyWrite, ReplyXattr, Request,
};
use libc::ENOENT;

use wfs::{Attr, CallerContext, WfsError};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Maps engine inode numbers (which start at 0) to FUSE inode numbers
/// (which must start at 1, since FUSE reserves 1 for the root).
fn engine_to_fuse(num: i32) -> u64 {
    num as u64 + 1
}

fn fuse_to_engine(ino: u64) -> i32 {
    (ino - 1) as i32
}

fn secs_to_systemtime(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

fn to_file_attr(attr: &Attr) -> FileAttr {
    let kind = if attr.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: engine_to_fuse(attr.ino),
        size: attr.size,
        blocks: attr.blocks,
        atime: secs_to_systemtime(attr.atime),
        mtime: secs_to_systemtime(attr.mtime),
        ctime: secs_to_systemtime(attr.ctime),
        crtime: secs_to_systemtime(attr.ctime),
        kind,
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlinks.max(0) as u32,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

struct Bridge {
    wfs: wfs::Wfs,
    /// Every known inode's resolved path, keyed by FUSE ino.
    paths: HashMap<u64, String>,
}

impl Bridge {
    fn new(wfs: wfs::Wfs) -> Self {
        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        Bridge { wfs, paths }
    }

    fn path_of(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    fn caller_is_ls(req: &Request<'_>) -> bool {
        let comm = std::fs::read_to_string(format!("/proc/{}/comm", req.pid()));
        matches!(comm, Ok(name) if name.trim() == "ls")
    }
}

impl Filesystem for Bridge {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Bridge::child_path(&parent_path, name);
        match self.wfs.getattr(&path) {
            Ok(attr) => {
                let ino = engine_to_fuse(attr.ino);
                self.paths.insert(ino, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        match self.wfs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Bridge::child_path(&parent_path, name);
        match self.wfs.mknod(&path, libc::S_IFREG as u32 | mode) {
            Ok(attr) => {
                let ino = engine_to_fuse(attr.ino);
                self.paths.insert(ino, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Bridge::child_path(&parent_path, name);
        match self.wfs.mkdir(&path, mode) {
            Ok(attr) => {
                let ino = engine_to_fuse(attr.ino);
                self.paths.insert(ino, path);
                reply.entry(&TTL, &to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.wfs.read(&path, offset.max(0) as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        match self.wfs.write(&path, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&mut self, req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = CallerContext { is_ls: Bridge::caller_is_ls(req) };
        let entries = match self.wfs.readdir(&path, ctx) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        for (i, entry) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            let child_ino = engine_to_fuse(entry.num);
            let kind = if entry.is_dir { FileType::Directory } else { FileType::RegularFile };
            let display_name = entry.display_name.clone();
            if display_name != "." && display_name != ".." {
                self.paths.insert(child_ino, Bridge::child_path(&path, &display_name));
            }
            if reply.add(child_ino, (i + 1) as i64, kind, &display_name) {
                break;
            }
        }
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Bridge::child_path(&parent_path, name);
        match self.wfs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Bridge::child_path(&parent_path, name);
        match self.wfs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.wfs.statfs() {
            Ok(st) => reply.statfs(
                st.blocks,
                st.blocks_free,
                st.blocks_free,
                st.files,
                st.files_free,
                st.block_size as u32,
                st.name_max as u32,
                0,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Ok(value) = std::str::from_utf8(value) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.wfs.setxattr(&path, name, value) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.wfs.getxattr(&path, name, size as usize) {
            Ok(value) if size == 0 => reply.size(value.len() as u32 + 1),
            Ok(value) => reply.data(value.as_bytes()),
            Err(WfsError::NoXattr) => reply.error(libc::ENODATA),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino).map(String::from) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.wfs.removexattr(&path, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

/// Mount a WFS image at a directory.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to a previously formatted disk image.
    image: PathBuf,

    /// Directory to mount the file system at.
    mountpoint: PathBuf,

    #[command(flatten)]
    verbosity: Verbosity,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let wfs = wfs::Wfs::open(&cli.image).map_err(|e| anyhow::anyhow!("opening {}: {e}", cli.image.display()))?;
    let options = vec![MountOption::FSName("wfs".to_string()), MountOption::RW];
    log::info!("mounting {} at {}", cli.image.display(), cli.mountpoint.display());
    fuser::mount2(Bridge::new(wfs), &cli.mountpoint, &options)?;
    Ok(())
}
