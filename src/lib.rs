//! A single-image, user-space file system engine mounted through FUSE.
//!
//! The engine (this crate) knows nothing about FUSE; `src/bin/wfs.rs`
//! adapts it to `fuser::Filesystem` by maintaining its own inode-number
//! to path mapping, the way any path-based filesystem bridge must.

pub mod bitmap;
pub mod block;
pub mod color;
pub mod data_alloc;
pub mod dir;
pub mod error;
pub mod format;
pub mod image;
pub mod inode_store;
pub mod layout;
pub mod ops;
pub mod path;
pub mod time;

pub use error::{Result, WfsError};
pub use ops::{Attr, CallerContext, DirEntry, StatFs, Wfs};
