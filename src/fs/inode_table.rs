//! the inode table and the block chains inodes own
use log::debug;

use super::{
    BlockNo, BlockStore, FsError, FsResult, Inode, InodeNo, Storage, BLOCK_SIZE,
    DIRECT_POINTERS, INODE_SIZE, POINTERS_PER_BLOCK,
};
use crate::utils::traits::FixedRecord;

/// the most data blocks one inode can address
pub const MAX_INODE_BLOCKS: u32 = (DIRECT_POINTERS + POINTERS_PER_BLOCK) as u32;

const POINTER_SIZE: usize = std::mem::size_of::<u32>();

/// [Inode] record operations
impl Storage {
    /// block and byte offset of inode `inum`'s record
    #[inline]
    fn inode_seek_position(&self, inum: InodeNo) -> (BlockNo, usize) {
        let per_block = BLOCK_SIZE / INODE_SIZE;
        let block = self.superblock().inode_table_start + inum / per_block;
        let offset = (inum % per_block * INODE_SIZE) as usize;
        (block, offset)
    }

    fn check_inode_number(&self, inum: InodeNo) -> FsResult<()> {
        if inum >= self.inode_limit() {
            return Err(FsError::NotFound(format!(
                "inode {inum} is beyond the table of {}",
                self.inode_limit()
            )));
        }
        Ok(())
    }

    /// read the record of inode `inum`
    pub fn get_inode(&self, inum: InodeNo) -> FsResult<Inode> {
        self.check_inode_number(inum)?;
        let (block, offset) = self.inode_seek_position(inum);
        Inode::decode_from(&self.store.block(block)?[offset..])
    }

    /// write the record of inode `inum` back to the table
    pub fn save_inode(&mut self, inum: InodeNo, inode: &Inode) -> FsResult<()> {
        self.check_inode_number(inum)?;
        let (block, offset) = self.inode_seek_position(inum);
        inode.encode_into(&mut self.store.block_mut(block)?[offset..])?;
        Ok(())
    }

    /// claim a free inode slot and give it its first data block
    ///
    /// Nothing is left claimed when either the slot or the block
    /// can't be had.
    pub fn allocate_inode(&mut self, mode: u32) -> FsResult<InodeNo> {
        let inum = self.claim_inode_slot()?;
        let first_block = match self.allocate_block() {
            Ok(block) => block,
            Err(e) => {
                self.release_inode_slot(inum)?;
                return Err(e);
            }
        };
        let mut inode = Inode::new(mode);
        inode.direct[0] = Some(first_block);
        inode.blocks = 1;
        self.save_inode(inum, &inode)?;
        debug!("allocate_inode() -> {inum} with block {first_block}");
        Ok(inum)
    }

    /// release every block of inode `inum`, then the inode itself
    /// # Panics
    /// if `inum` is not allocated
    pub fn free_inode(&mut self, inum: InodeNo) -> FsResult<()> {
        assert!(
            self.has_inode(inum)?,
            "freeing inode {inum} which is not allocated"
        );
        let mut inode = self.get_inode(inum)?;
        let capacity = inode.capacity();
        self.shrink_inode(&mut inode, capacity)?;
        self.save_inode(inum, &Inode::default())?;
        self.release_inode_slot(inum)?;
        debug!("free_inode({inum})");
        Ok(())
    }
}

/// data block chains
impl Storage {
    fn read_pointer(&self, indirect: BlockNo, slot: usize) -> FsResult<u32> {
        let start = slot * POINTER_SIZE;
        let bytes = &self.store.block(indirect)?[start..start + POINTER_SIZE];
        let mut raw = [0u8; POINTER_SIZE];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn write_pointer(&mut self, indirect: BlockNo, slot: usize, block: u32) -> FsResult<()> {
        let start = slot * POINTER_SIZE;
        self.store.block_mut(indirect)?[start..start + POINTER_SIZE]
            .copy_from_slice(&block.to_le_bytes());
        Ok(())
    }

    /// grow `inode` so that it can hold `delta` more bytes than its capacity
    ///
    /// All needed blocks are claimed before any pointer is written: if the
    /// image runs out of blocks midway, the claimed ones are released and
    /// `inode` is left as it was.
    pub fn grow_inode(&mut self, inode: &mut Inode, delta: u64) -> FsResult<()> {
        let current = inode.blocks;
        let target = BlockStore::bytes_to_blocks(inode.capacity() + delta);
        if target > MAX_INODE_BLOCKS as u64 {
            return Err(FsError::CapacityExceeded(format!(
                "{target} blocks requested, an inode addresses at most {MAX_INODE_BLOCKS}"
            )));
        }
        let target = target as u32;
        if target <= current {
            return Ok(());
        }

        let needs_indirect = target as usize > DIRECT_POINTERS && inode.indirect.is_none();
        let wanted = (target - current) as usize + usize::from(needs_indirect);
        let mut staged = Vec::with_capacity(wanted);
        while staged.len() < wanted {
            match self.allocate_block() {
                Ok(block) => staged.push(block),
                Err(FsError::NoSpace) => {
                    for block in staged {
                        self.free_block(block)?;
                    }
                    return Err(FsError::CapacityExceeded(format!(
                        "growing to {target} blocks needs {wanted} free blocks"
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        let mut staged = staged.into_iter();
        if needs_indirect {
            // staged blocks are all present, so `next` can't run dry here
            inode.indirect = staged.next();
        }
        for (index, block) in (current..target).zip(staged) {
            let index = index as usize;
            if index < DIRECT_POINTERS {
                inode.direct[index] = Some(block);
            } else {
                let indirect = inode.indirect.ok_or_else(|| {
                    FsError::Corrupt("indirect block vanished while growing".into())
                })?;
                self.write_pointer(indirect, index - DIRECT_POINTERS, block)?;
            }
        }
        debug!("grow_inode() {current} -> {target} blocks");
        inode.blocks = target;
        Ok(())
    }

    /// shrink `inode` so that its capacity drops by `delta` bytes,
    /// releasing blocks from the highest index down
    ///
    /// The indirect pointer block is released too once no block lives
    /// in the indirect region.
    pub fn shrink_inode(&mut self, inode: &mut Inode, delta: u64) -> FsResult<()> {
        let current = inode.blocks;
        let target = BlockStore::bytes_to_blocks(inode.capacity().saturating_sub(delta)) as u32;
        if target >= current {
            return Ok(());
        }

        for index in (target..current).rev() {
            let index = index as usize;
            let block = if index < DIRECT_POINTERS {
                inode.direct[index].take()
            } else {
                let indirect = inode.indirect.ok_or_else(|| {
                    FsError::Corrupt(format!("block {index} needs a missing indirect block"))
                })?;
                Some(self.read_pointer(indirect, index - DIRECT_POINTERS)?)
            };
            let block = block.ok_or_else(|| {
                FsError::Corrupt(format!("direct pointer {index} is empty but counted"))
            })?;
            self.free_block(block)?;
            inode.blocks = index as u32;
        }

        if target as usize <= DIRECT_POINTERS {
            if let Some(indirect) = inode.indirect.take() {
                self.free_block(indirect)?;
            }
        }
        debug!("shrink_inode() {current} -> {target} blocks");
        Ok(())
    }

    /// the image block holding byte `offset` of `inode`
    pub fn inode_block_number(&self, inode: &Inode, offset: u64) -> FsResult<BlockNo> {
        let index = offset / BLOCK_SIZE as u64;
        if index >= inode.blocks as u64 {
            return Err(FsError::NotFound(format!(
                "offset {offset} is past the {} allocated blocks",
                inode.blocks
            )));
        }
        let index = index as usize;
        if index < DIRECT_POINTERS {
            inode.direct[index]
                .ok_or_else(|| FsError::Corrupt(format!("direct pointer {index} is empty")))
        } else {
            let indirect = inode
                .indirect
                .ok_or_else(|| FsError::Corrupt("indirect block is missing".into()))?;
            self.read_pointer(indirect, index - DIRECT_POINTERS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsConfig, ROOT_INODE};

    const FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;

    fn fs() -> Storage {
        Storage::in_memory(FsConfig::default()).expect("create in memory fs failed")
    }

    #[test]
    fn test_get_inode_bounds() {
        let fs = fs();
        assert!(fs.get_inode(ROOT_INODE).unwrap().is_dir());
        assert!(matches!(fs.get_inode(64), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_allocate_inode_gets_one_block() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        assert_eq!(inum, 1);
        let inode = fs.get_inode(inum).unwrap();
        assert_eq!(inode.blocks, 1);
        assert_eq!(inode.indirect, None);
        assert!(inode.direct[0].is_some());
        assert!(inode.direct[1..].iter().all(Option::is_none));
        assert!(fs.has_block(inode.direct[0].unwrap()).unwrap());
    }

    #[test]
    fn test_allocate_inode_rolls_back_without_blocks() {
        let mut fs = fs();
        while fs.allocate_block().is_ok() {}
        let (_, free_inodes) = fs.free_counts().unwrap();
        assert!(matches!(
            fs.allocate_inode(FILE_MODE),
            Err(FsError::NoSpace)
        ));
        assert_eq!(fs.free_counts().unwrap().1, free_inodes);
        assert!(!fs.has_inode(1).unwrap());
    }

    #[test]
    fn test_inodes_exhausted() {
        let mut fs = fs();
        for _ in 1..64 {
            fs.allocate_inode(FILE_MODE).unwrap();
        }
        assert!(matches!(
            fs.allocate_inode(FILE_MODE),
            Err(FsError::InodesExhausted)
        ));
    }

    #[test]
    fn test_grow_into_indirect_and_shrink_back() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        let (free_before, _) = fs.free_counts().unwrap();

        let delta = 20 * BLOCK_SIZE as u64;
        fs.grow_inode(&mut inode, delta).unwrap();
        assert_eq!(inode.blocks, 21);
        assert!(inode.indirect.is_some());
        // 20 data blocks plus the pointer block
        assert_eq!(fs.free_counts().unwrap().0, free_before - 21);

        let mut seen = std::collections::HashSet::new();
        for index in 0..21u64 {
            let block = fs
                .inode_block_number(&inode, index * BLOCK_SIZE as u64)
                .unwrap();
            assert!(block >= fs.data_start());
            assert!(fs.has_block(block).unwrap());
            assert!(seen.insert(block), "block {block} handed out twice");
        }
        assert!(fs
            .inode_block_number(&inode, 21 * BLOCK_SIZE as u64)
            .is_err());

        fs.shrink_inode(&mut inode, delta).unwrap();
        assert_eq!(inode.blocks, 1);
        assert_eq!(inode.indirect, None);
        assert_eq!(fs.free_counts().unwrap().0, free_before);
    }

    #[test]
    fn test_grow_partial_block_delta() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        fs.grow_inode(&mut inode, 1).unwrap();
        assert_eq!(inode.blocks, 2);
        fs.grow_inode(&mut inode, 0).unwrap();
        assert_eq!(inode.blocks, 2);
    }

    #[test]
    fn test_grow_is_all_or_nothing() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        let before = inode.clone();
        let (free_before, _) = fs.free_counts().unwrap();

        let too_much = (free_before as u64 + 1) * BLOCK_SIZE as u64;
        assert!(matches!(
            fs.grow_inode(&mut inode, too_much),
            Err(FsError::CapacityExceeded(_))
        ));
        assert_eq!(inode, before);
        assert_eq!(fs.free_counts().unwrap().0, free_before);

        let beyond_addressing = MAX_INODE_BLOCKS as u64 * BLOCK_SIZE as u64;
        assert!(matches!(
            fs.grow_inode(&mut inode, beyond_addressing),
            Err(FsError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_shrink_keeps_indirect_while_used() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        fs.grow_inode(&mut inode, 14 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(inode.blocks, 15);
        fs.shrink_inode(&mut inode, 2 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(inode.blocks, 13);
        assert!(inode.indirect.is_some());
        fs.shrink_inode(&mut inode, BLOCK_SIZE as u64).unwrap();
        assert_eq!(inode.blocks, 12);
        assert_eq!(inode.indirect, None);
    }

    #[test]
    fn test_free_inode_releases_everything() {
        let mut fs = fs();
        let (free_blocks, free_inodes) = fs.free_counts().unwrap();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        fs.grow_inode(&mut inode, 15 * BLOCK_SIZE as u64).unwrap();
        fs.save_inode(inum, &inode).unwrap();

        fs.free_inode(inum).unwrap();
        assert_eq!(fs.free_counts().unwrap(), (free_blocks, free_inodes));
        assert!(!fs.has_inode(inum).unwrap());
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_free_unallocated_inode_aborts() {
        let mut fs = fs();
        let _ = fs.free_inode(5);
    }
}
