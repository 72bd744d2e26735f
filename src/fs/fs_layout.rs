//! what does our filesystem look like in the memory

use log::{debug, info, warn};
use std::path::Path;

use super::{
    bitmap::{self, Bitmap},
    BlockNo, BlockStore, FsError, FsResult, InodeNo, SuperBlock, BITMAP_BLOCK, BLOCK_SIZE,
    DEFAULT_BLOCK_COUNT, DEFAULT_INODE_LIMIT, ROOT_INODE, SUPERBLOCK_BLOCK,
};
use crate::utils::{fs_size_calculator, traits::FixedRecord};

/// geometry chosen at format time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// total blocks in the image, metadata included
    pub block_count: u32,
    /// capacity of the inode table
    pub inode_limit: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            block_count: DEFAULT_BLOCK_COUNT,
            inode_limit: DEFAULT_INODE_LIMIT,
        }
    }
}

impl FsConfig {
    /// geometry for an image of `image_size` bytes,
    /// any trailing partial block is dropped
    pub fn from_image_size(image_size: u64, inode_limit: u32) -> FsResult<Self> {
        let block_count = u32::try_from(image_size / BLOCK_SIZE as u64).map_err(|_| {
            FsError::Format(format!("image size {image_size} exceeds the block range"))
        })?;
        let config = FsConfig {
            block_count,
            inode_limit,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.inode_limit == 0 {
            return Err(FsError::Format("inode count must be at least 1".into()));
        }
        if !fs_size_calculator::bitmaps_fit(self.block_count, self.inode_limit) {
            return Err(FsError::Format(format!(
                "bitmaps for {} blocks and {} inodes don't fit in one block",
                self.block_count, self.inode_limit
            )));
        }
        // the root directory needs one data block
        let needed = fs_size_calculator::data_start(self.inode_limit) + 1;
        if self.block_count < needed {
            return Err(FsError::Format(format!(
                "{} blocks are too few, {} inodes need at least {needed}",
                self.block_count, self.inode_limit
            )));
        }
        Ok(())
    }
}

/// it has the following layout:
/// - block 0: superblock
/// - block 1: block bitmap, then inode bitmap
/// - inode table
/// - data blocks
#[derive(Debug)]
pub struct Storage {
    /// the superblock of this filesystem
    superblock: SuperBlock,
    /// the mapped image
    pub(crate) store: BlockStore,
}

impl Storage {
    /// create a fresh filesystem in the image file at `image_path`,
    /// sized to `config`
    pub fn format<P>(image_path: P, config: FsConfig) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        config.validate()?;
        let store = BlockStore::create(image_path.as_ref(), config.block_count)?;
        info!("formatting {:?} with {config:?}", image_path.as_ref());
        Self::format_store(store, config)
    }

    /// a filesystem living only in anonymous memory
    pub fn in_memory(config: FsConfig) -> FsResult<Self> {
        config.validate()?;
        let store = BlockStore::anonymous(config.block_count)?;
        Self::format_store(store, config)
    }

    /// restore the filesystem stored in an existing image
    pub fn open<P>(image_path: P) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        let store = BlockStore::open(image_path.as_ref())?;
        let mut superblock = SuperBlock::decode_from(store.block(SUPERBLOCK_BLOCK)?)?;
        superblock.validate(store.block_count())?;
        let fs = Storage { superblock, store };
        if !fs.has_inode(ROOT_INODE)? {
            return Err(FsError::Format("root directory is missing".into()));
        }
        info!(
            "opened {:?}: {} blocks, {} inodes",
            image_path.as_ref(),
            fs.superblock.block_count,
            fs.superblock.inode_limit
        );
        Ok(fs)
    }

    /// open the image if it holds one of our filesystems,
    /// otherwise format it with the default geometry
    ///
    /// Only a missing image or one whose superblock block is all zeros
    /// gets formatted. A damaged superblock is reported, never overwritten.
    pub fn init<P>(image_path: P) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        let image_path = image_path.as_ref();
        if image_path.exists() {
            match Self::open(image_path) {
                Ok(fs) => return Ok(fs),
                Err(FsError::Format(reason)) if Self::is_blank(image_path)? => {
                    warn!("{image_path:?} is blank ({reason}), formatting it");
                }
                Err(e) => return Err(e),
            }
        }
        Self::format(image_path, FsConfig::default())
    }

    /// an image shorter than a block or with a zeroed superblock block
    fn is_blank(image_path: &Path) -> FsResult<bool> {
        if std::fs::metadata(image_path)?.len() < BLOCK_SIZE as u64 {
            return Ok(true);
        }
        let store = BlockStore::open(image_path)?;
        Ok(store.block(SUPERBLOCK_BLOCK)?.iter().all(|byte| *byte == 0))
    }

    fn format_store(mut store: BlockStore, config: FsConfig) -> FsResult<Self> {
        for block in 0..store.block_count() {
            store.zero_block(block)?;
        }
        let superblock = SuperBlock::new(config.block_count, config.inode_limit)?;
        superblock.encode_into(store.block_mut(SUPERBLOCK_BLOCK)?)?;
        let mut fs = Storage { superblock, store };
        // superblock, bitmaps and inode table are never handed out
        let reserved = fs.superblock.data_start as usize;
        let mut blocks = fs.block_bitmap()?;
        for block in 0..reserved {
            blocks.set(block);
        }
        fs.init_root()?;
        Ok(fs)
    }

    /// push every change of a file backed image to disk
    pub fn flush(&self) -> FsResult<()> {
        self.store.flush()
    }
}

/// get [SuperBlock] and geometry of this filesystem
impl Storage {
    #[inline]
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    #[inline]
    pub fn block_count(&self) -> u32 {
        self.superblock.block_count
    }

    #[inline]
    pub fn inode_limit(&self) -> u32 {
        self.superblock.inode_limit
    }

    #[inline]
    pub fn data_start(&self) -> BlockNo {
        self.superblock.data_start
    }
}

/// bitmap allocation of data blocks and inode slots
impl Storage {
    fn bitmap_ranges(&self) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let blocks_len = fs_size_calculator::bitmap_size(self.block_count()) as usize;
        let inodes_len = fs_size_calculator::bitmap_size(self.inode_limit()) as usize;
        (0..blocks_len, blocks_len..blocks_len + inodes_len)
    }

    fn block_bitmap(&mut self) -> FsResult<Bitmap<'_>> {
        let (range, _) = self.bitmap_ranges();
        let len = self.block_count() as usize;
        let bytes = self.store.block_mut(BITMAP_BLOCK)?;
        Ok(Bitmap::new(&mut bytes[range], len))
    }

    fn inode_bitmap(&mut self) -> FsResult<Bitmap<'_>> {
        let (_, range) = self.bitmap_ranges();
        let len = self.inode_limit() as usize;
        let bytes = self.store.block_mut(BITMAP_BLOCK)?;
        Ok(Bitmap::new(&mut bytes[range], len))
    }

    /// check if data block `block` is in use
    pub fn has_block(&self, block: BlockNo) -> FsResult<bool> {
        let (range, _) = self.bitmap_ranges();
        let bytes = self.store.block(BITMAP_BLOCK)?;
        Ok(block < self.block_count() && bitmap::is_set(&bytes[range], block as usize))
    }

    /// check if inode slot `inum` is in use
    pub fn has_inode(&self, inum: InodeNo) -> FsResult<bool> {
        let (_, range) = self.bitmap_ranges();
        let bytes = self.store.block(BITMAP_BLOCK)?;
        Ok(inum < self.inode_limit() && bitmap::is_set(&bytes[range], inum as usize))
    }

    /// claim the first free data block past the metadata region;
    /// its contents are zeroed
    pub fn allocate_block(&mut self) -> FsResult<BlockNo> {
        let start = self.data_start() as usize;
        let block = self
            .block_bitmap()?
            .allocate(start)
            .ok_or(FsError::NoSpace)? as BlockNo;
        self.store.zero_block(block)?;
        debug!("allocate_block() -> {block}");
        Ok(block)
    }

    /// release a data block previously returned by [Storage::allocate_block]
    pub fn free_block(&mut self, block: BlockNo) -> FsResult<()> {
        if block < self.data_start() || block >= self.block_count() {
            return Err(FsError::Corrupt(format!(
                "block {block} is not a data block"
            )));
        }
        debug!("free_block({block})");
        self.block_bitmap()?.clear(block as usize);
        Ok(())
    }

    pub(crate) fn claim_inode_slot(&mut self) -> FsResult<InodeNo> {
        let slot = self
            .inode_bitmap()?
            .allocate(0)
            .ok_or(FsError::InodesExhausted)?;
        Ok(slot as InodeNo)
    }

    pub(crate) fn release_inode_slot(&mut self, inum: InodeNo) -> FsResult<()> {
        self.inode_bitmap()?.clear(inum as usize);
        Ok(())
    }

    /// free data blocks and inode slots
    pub fn free_counts(&self) -> FsResult<(u32, u32)> {
        let (blocks, inodes) = self.bitmap_ranges();
        let bytes = self.store.block(BITMAP_BLOCK)?;
        let used_blocks = bitmap::count_used(&bytes[blocks], self.block_count() as usize);
        let used_inodes = bitmap::count_used(&bytes[inodes], self.inode_limit() as usize);
        Ok((
            self.block_count() - used_blocks as u32,
            self.inode_limit() - used_inodes as u32,
        ))
    }
}
