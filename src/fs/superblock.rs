use serde::{Deserialize, Serialize};

use crate::utils::{
    digest,
    fs_size_calculator,
    time_util::{self, Timestamp},
    traits::{DigestInSelf, FixedRecord},
};

use super::{BlockNo, FsError, FsResult, BLOCK_SIZE, FS_MAGIC, INODE_TABLE_START};

/// The superblock of this filesystem, written once at format time
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// total block count of the image, metadata blocks included
    pub block_count: u32,
    /// data block size
    pub block_size: u32,
    /// capacity of the inode table
    pub inode_limit: u32,
    /// first block of the inode table
    pub inode_table_start: BlockNo,
    /// first block available for file data
    pub data_start: BlockNo,
    pub created_at: Timestamp,
    /// to verify the integrity of this superblock
    pub digest: [u8; 32],
}

impl SuperBlock {
    pub fn new(block_count: u32, inode_limit: u32) -> FsResult<Self> {
        let mut superblock = Self {
            magic: FS_MAGIC,
            block_count,
            block_size: BLOCK_SIZE,
            inode_limit,
            inode_table_start: INODE_TABLE_START,
            data_start: fs_size_calculator::data_start(inode_limit),
            created_at: time_util::now(),
            digest: [0u8; 32],
        };
        superblock.digest()?;
        Ok(superblock)
    }

    /// check a superblock read back from an image holding `image_blocks` blocks
    pub fn validate(&mut self, image_blocks: u32) -> FsResult<()> {
        if self.magic != FS_MAGIC {
            return Err(FsError::Format(format!(
                "bad magic number {:#x}, expected {FS_MAGIC:#x}",
                self.magic
            )));
        }
        if !self.verify_digest()? {
            return Err(FsError::Format("superblock digest mismatch".into()));
        }
        if self.block_size != BLOCK_SIZE {
            return Err(FsError::Format(format!(
                "unsupported block size {}",
                self.block_size
            )));
        }
        if self.block_count > image_blocks {
            return Err(FsError::Format(format!(
                "superblock claims {} blocks but the image holds {image_blocks}",
                self.block_count
            )));
        }
        if self.inode_limit == 0
            || self.data_start != fs_size_calculator::data_start(self.inode_limit)
            || self.data_start >= self.block_count
            || !fs_size_calculator::bitmaps_fit(self.block_count, self.inode_limit)
        {
            return Err(FsError::Format(format!(
                "inconsistent geometry: {} blocks, {} inodes, data at block {}",
                self.block_count, self.inode_limit, self.data_start
            )));
        }
        Ok(())
    }
}

impl DigestInSelf for SuperBlock {
    fn digest(&mut self) -> FsResult<()> {
        self.digest = [0u8; 32];
        self.digest = digest::digest(self)?;
        Ok(())
    }

    fn verify_digest(&mut self) -> FsResult<bool> {
        // get digest from itself
        let digest = self.digest;
        // clear the digest from struct
        self.digest = [0u8; 32];
        // calulate the digest
        let digest2 = digest::digest(self)?;
        self.digest = digest;
        Ok(digest == digest2)
    }
}

impl FixedRecord for SuperBlock {
    const RECORD_SIZE: usize = BLOCK_SIZE as usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip_and_validate() {
        let superblock = SuperBlock::new(256, 64).unwrap();
        assert_eq!(superblock.data_start, 4);
        let mut block = vec![0u8; BLOCK_SIZE as usize];
        superblock.encode_into(&mut block).unwrap();
        let mut read_back = SuperBlock::decode_from(&block).unwrap();
        assert_eq!(read_back, superblock);
        read_back.validate(256).unwrap();
    }

    #[test]
    fn test_validate_rejects_tampering() {
        let mut superblock = SuperBlock::new(256, 64).unwrap();
        superblock.inode_limit = 65;
        assert!(matches!(superblock.validate(256), Err(FsError::Format(_))));

        let mut superblock = SuperBlock::new(256, 64).unwrap();
        superblock.magic = 0;
        assert!(matches!(superblock.validate(256), Err(FsError::Format(_))));

        // image shorter than the recorded geometry
        let mut superblock = SuperBlock::new(256, 64).unwrap();
        assert!(matches!(superblock.validate(128), Err(FsError::Format(_))));
    }

    #[test]
    fn test_zeroed_block_is_not_a_superblock() {
        let block = vec![0u8; BLOCK_SIZE as usize];
        let mut superblock = SuperBlock::decode_from(&block).unwrap();
        assert!(superblock.validate(256).is_err());
    }
}
