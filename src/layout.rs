//! On-disk record layout: superblock, inode, dentry.
//!
//! Disk layout, in order, all offsets relative to image start:
//! [ superblock | inode bitmap | data bitmap | inode table | data region ]
//!
//! Every record here derives zero-copy (de)serialization so that a
//! "typed view" is a reinterpretation of raw bytes read from (or about
//! to be written to) the image, never a parsed copy.

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

/// Size of one block, and of one inode slot.
pub const BLOCK_SIZE: u64 = 512;

/// Maximum length of a dentry name, including the NUL terminator.
pub const MAX_NAME: usize = 28;

/// Number of direct block pointers in an inode's address array.
pub const D_BLOCK: usize = 6;

/// Length of an inode's address array: `D_BLOCK` direct entries plus
/// one single-indirect entry at index `D_BLOCK`.
pub const BLOCKS_LEN: usize = D_BLOCK + 1;

/// Inode number of the root directory. Doubles as the dentry "deleted"
/// sentinel: a dentry with `num == 0` is vacant.
pub const ROOT_INODE: i32 = 0;

/// Number of raw offsets packed into one indirect block.
pub const INDIRECT_PER_BLOCK: u64 = BLOCK_SIZE / core::mem::size_of::<u64>() as u64;

/// Maximum file size addressable via direct + single-indirect blocks.
pub const MAX_FILE_SIZE: u64 = (D_BLOCK as u64 + INDIRECT_PER_BLOCK) * BLOCK_SIZE;

/// Superblock record, written once by the formatter at offset 0.
///
/// ```text
///         d_bitmap_ptr       d_blocks_ptr
///              v                  v
/// +----+---------+---------+--------+--------------------------+
/// | SB | IBITMAP | DBITMAP | INODES |       DATA BLOCKS        |
/// +----+---------+---------+--------+--------------------------+
/// 0    ^                   ^
/// i_bitmap_ptr        i_blocks_ptr
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct Superblock {
    pub num_inodes: u64,
    pub num_data_blocks: u64,
    pub i_bitmap_ptr: u64,
    pub d_bitmap_ptr: u64,
    pub i_blocks_ptr: u64,
    pub d_blocks_ptr: u64,
}

pub const SUPERBLOCK_SIZE: u64 = core::mem::size_of::<Superblock>() as u64;

impl Superblock {
    /// Number of whole 32-bit words needed to hold `count` bits.
    pub fn bitmap_words(count: u64) -> u64 {
        (count + 31) / 32
    }

    pub fn i_bitmap_len(&self) -> u64 {
        Self::bitmap_words(self.num_inodes) * 4
    }

    pub fn d_bitmap_len(&self) -> u64 {
        Self::bitmap_words(self.num_data_blocks) * 4
    }
}

/// On-disk inode. Occupies exactly one block; trailing bytes are
/// unused padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct Inode {
    pub num: i32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlinks: i32,
    /// Explicit alignment padding ahead of the 8-byte-aligned timestamps.
    /// zerocopy's derive rejects implicit repr(C) padding, so this has to
    /// be a real field rather than left to the compiler.
    _pad_nlinks: [u8; 4],
    pub atim: i64,
    pub ctim: i64,
    pub mtim: i64,
    pub color: u8,
    _pad_color: [u8; 7],
    pub blocks: [u64; BLOCKS_LEN],
}

const_assert!(core::mem::size_of::<Inode>() as u64 <= BLOCK_SIZE);

impl Default for Inode {
    fn default() -> Self {
        Inode {
            num: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            nlinks: 0,
            _pad_nlinks: [0; 4],
            atim: 0,
            ctim: 0,
            mtim: 0,
            color: 0,
            _pad_color: [0; 7],
            blocks: [0; BLOCKS_LEN],
        }
    }
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn indirect_ptr(&self) -> u64 {
        self.blocks[D_BLOCK]
    }

    pub fn set_indirect_ptr(&mut self, off: u64) {
        self.blocks[D_BLOCK] = off;
    }
}

/// Directory entry: a fixed-size (name, inode-number) record. A dentry
/// whose `num == 0` or whose name is empty is a vacant slot
/// ("tombstone").
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct Dentry {
    pub name: [u8; MAX_NAME],
    pub num: i32,
}

pub const DENTRY_SIZE: u64 = core::mem::size_of::<Dentry>() as u64;
pub const DENTRIES_PER_BLOCK: u64 = BLOCK_SIZE / DENTRY_SIZE;

const_assert!(BLOCK_SIZE % DENTRY_SIZE == 0);

impl Default for Dentry {
    fn default() -> Self {
        Dentry {
            name: [0; MAX_NAME],
            num: 0,
        }
    }
}

impl Dentry {
    pub fn is_vacant(&self) -> bool {
        self.num == 0 || self.name[0] == 0
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.name = [0; MAX_NAME];
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}
