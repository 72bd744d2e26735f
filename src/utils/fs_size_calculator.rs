//! This module contains functions to calculate the size of differennt fs components

use crate::fs::{BLOCK_SIZE, INODE_SIZE, INODE_TABLE_START};

/// calculate how many blocks are needed to hold `bytes` bytes
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::bytes_to_blocks;
/// assert_eq!(bytes_to_blocks(0), 0);
/// assert_eq!(bytes_to_blocks(1), 1);
/// assert_eq!(bytes_to_blocks(4096), 1);
/// assert_eq!(bytes_to_blocks(4097), 2);
/// ```
pub const fn bytes_to_blocks(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE as u64)
}

/// calculate needed bitmap size in bytes
/// # Arguments
/// - `element_count`: the number of tracked resources
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::bitmap_size;
/// assert_eq!(bitmap_size(100), 13);
/// assert_eq!(bitmap_size(256), 32);
/// ```
pub const fn bitmap_size(element_count: u32) -> u32 {
    element_count.div_ceil(8)
}

/// calculate how many blocks the inode table occupies
pub const fn inode_table_blocks(inode_limit: u32) -> u32 {
    (inode_limit as u64 * INODE_SIZE as u64).div_ceil(BLOCK_SIZE as u64) as u32
}

/// the first block not reserved for metadata
/// (superblock, bitmaps and inode table)
pub const fn data_start(inode_limit: u32) -> u32 {
    INODE_TABLE_START + inode_table_blocks(inode_limit)
}

/// check that both bitmaps fit in the bitmap block
pub const fn bitmaps_fit(block_count: u32, inode_limit: u32) -> bool {
    bitmap_size(block_count) as u64 + bitmap_size(inode_limit) as u64 <= BLOCK_SIZE as u64
}
