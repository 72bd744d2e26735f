//! our custom filesystem
pub mod bitmap;
pub mod block_store;
pub mod error;
pub mod filekind;
pub mod fs_layout;
pub mod inode;
pub mod path;
pub mod superblock;

mod directory;
mod fs_api_impl;
mod inode_table;
mod storage;

pub use block_store::*;
pub use directory::{DirEntry, DIRENT_SIZE, DIR_NAME_LENGTH};
pub use error::*;
pub use filekind::*;
pub use fs_layout::*;
pub use inode::*;
pub use inode_table::MAX_INODE_BLOCKS;
pub use storage::*;
pub use superblock::*;

const FS_MAGIC: u32 = 0xf0f0_3410;
pub const ROOT_INODE: u32 = 0;
pub const BLOCK_SIZE: u32 = 4096;
/// slot size of one inode record in the inode table
pub const INODE_SIZE: u32 = 128;
pub const DIRECT_POINTERS: usize = 12;
/// block index pointers held by one indirect block
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE as usize / std::mem::size_of::<u32>();

pub const SUPERBLOCK_BLOCK: u32 = 0;
pub const BITMAP_BLOCK: u32 = 1;
pub const INODE_TABLE_START: u32 = 2;

pub const DEFAULT_BLOCK_COUNT: u32 = 256;
pub const DEFAULT_INODE_LIMIT: u32 = 64;

/// index of a block in the image
pub type BlockNo = u32;
/// index of an inode in the inode table
pub type InodeNo = u32;
