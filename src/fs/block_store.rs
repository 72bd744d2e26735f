//! a fixed-length image split into addressable fixed-size blocks
use std::{fs::OpenOptions, path::Path};

use log::debug;
use memmap2::MmapMut;

use super::{BlockNo, FsError, FsResult, BLOCK_SIZE};
use crate::utils::fs_size_calculator;

/// the backing memory of an image, addressed block by block
///
/// Blocks are handed out as plain byte slices. Which blocks are owned by
/// whom is decided by the bitmap and inode layers, not here.
#[derive(Debug)]
pub struct BlockStore {
    mmap: MmapMut,
    block_count: u32,
}

impl BlockStore {
    /// create (or resize) the image file at `path` to hold exactly
    /// `block_count` blocks and map it into memory
    pub fn create<P>(path: P, block_count: u32) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        // all other region are set to zero using `set_len` method
        file.set_len(block_count as u64 * BLOCK_SIZE as u64)?;
        // Safety
        // the file is opened for read and write and is not expected to be
        // resized by anyone else while it is mapped
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(
            "mapped image {:?} with {block_count} blocks",
            path.as_ref()
        );
        Ok(BlockStore { mmap, block_count })
    }

    /// map an existing image file, taking its length as the geometry
    pub fn open<P>(path: P) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        // open the "device" for read and write
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        let block_count = u32::try_from(len / BLOCK_SIZE as u64)
            .map_err(|_| FsError::Format(format!("image of {len} bytes is too large")))?;
        if block_count == 0 {
            return Err(FsError::Format(format!(
                "image of {len} bytes holds no complete block"
            )));
        }
        // Safety
        // same as in `create`: the mapping requires read and write access
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!("mapped image {:?} with {block_count} blocks", path.as_ref());
        Ok(BlockStore { mmap, block_count })
    }

    /// an image that lives only in anonymous memory
    pub fn anonymous(block_count: u32) -> FsResult<Self> {
        let mmap = MmapMut::map_anon(block_count as usize * BLOCK_SIZE as usize)?;
        Ok(BlockStore { mmap, block_count })
    }

    #[inline]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    #[inline]
    pub const fn block_size(&self) -> u32 {
        BLOCK_SIZE
    }

    #[inline]
    pub const fn bytes_to_blocks(bytes: u64) -> u64 {
        fs_size_calculator::bytes_to_blocks(bytes)
    }

    /// the bytes of block `index`
    pub fn block(&self, index: BlockNo) -> FsResult<&[u8]> {
        let range = self.block_range(index)?;
        Ok(&self.mmap[range])
    }

    /// the bytes of block `index`, writable
    pub fn block_mut(&mut self, index: BlockNo) -> FsResult<&mut [u8]> {
        let range = self.block_range(index)?;
        Ok(&mut self.mmap[range])
    }

    pub fn zero_block(&mut self, index: BlockNo) -> FsResult<()> {
        self.block_mut(index)?.fill(0);
        Ok(())
    }

    /// push dirty pages of a file backed image to disk
    pub fn flush(&self) -> FsResult<()> {
        Ok(self.mmap.flush()?)
    }

    fn block_range(&self, index: BlockNo) -> FsResult<std::ops::Range<usize>> {
        if index >= self.block_count {
            return Err(FsError::Corrupt(format!(
                "block {index} is out of range (image has {} blocks)",
                self.block_count
            )));
        }
        let start = index as usize * BLOCK_SIZE as usize;
        Ok(start..start + BLOCK_SIZE as usize)
    }
}
