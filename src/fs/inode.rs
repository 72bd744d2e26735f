use serde::{Deserialize, Serialize};

use crate::utils::{
    time_util::{self, Timestamp},
    traits::FixedRecord,
};

use super::{filekind::FileKind, BlockNo, InodeNo, BLOCK_SIZE, DIRECT_POINTERS, INODE_SIZE};

/// on-disk marker for an empty block pointer; block `u32::MAX` never exists
const NO_BLOCK: u32 = u32::MAX;

/// metadata of one file or directory and the blocks it owns
///
/// The first [DIRECT_POINTERS] blocks are addressed from `direct`,
/// block 13 onwards through the pointer block `indirect`.
/// `blocks` always equals the number of data blocks owned.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(from = "RawInode", into = "RawInode")]
pub struct Inode {
    /// link count
    pub links: u32,
    /// file type and permission bits
    pub mode: u32,
    /// bytes of content, never more than the allocated capacity
    pub size: u64,
    /// data blocks allocated
    pub blocks: u32,
    pub direct: [Option<BlockNo>; DIRECT_POINTERS],
    pub indirect: Option<BlockNo>,
    pub created_at: Timestamp,
    pub accessed_at: Timestamp,
    pub modified_at: Timestamp,
}

/// the fixed-width layout of [Inode] inside the inode table
#[derive(Serialize, Deserialize)]
struct RawInode {
    links: u32,
    mode: u32,
    size: u64,
    blocks: u32,
    direct: [u32; DIRECT_POINTERS],
    indirect: u32,
    created_at: Timestamp,
    accessed_at: Timestamp,
    modified_at: Timestamp,
}

fn to_raw(pointer: Option<BlockNo>) -> u32 {
    pointer.unwrap_or(NO_BLOCK)
}

fn from_raw(pointer: u32) -> Option<BlockNo> {
    (pointer != NO_BLOCK).then_some(pointer)
}

impl From<RawInode> for Inode {
    fn from(raw: RawInode) -> Self {
        Inode {
            links: raw.links,
            mode: raw.mode,
            size: raw.size,
            blocks: raw.blocks,
            direct: raw.direct.map(from_raw),
            indirect: from_raw(raw.indirect),
            created_at: raw.created_at,
            accessed_at: raw.accessed_at,
            modified_at: raw.modified_at,
        }
    }
}

impl From<Inode> for RawInode {
    fn from(inode: Inode) -> Self {
        RawInode {
            links: inode.links,
            mode: inode.mode,
            size: inode.size,
            blocks: inode.blocks,
            direct: inode.direct.map(to_raw),
            indirect: to_raw(inode.indirect),
            created_at: inode.created_at,
            accessed_at: inode.accessed_at,
            modified_at: inode.modified_at,
        }
    }
}

impl FixedRecord for Inode {
    const RECORD_SIZE: usize = INODE_SIZE as usize;
}

impl Inode {
    /// a fresh record: no blocks, no links, every timestamp set to now
    pub fn new(mode: u32) -> Self {
        let now = time_util::now();
        Inode {
            mode,
            created_at: now,
            accessed_at: now,
            modified_at: now,
            ..Inode::default()
        }
    }
}

/// This block is about file metadata operations
impl Inode {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind() == FileKind::RegularFile
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    /// bytes the allocated blocks can hold
    pub fn capacity(&self) -> u64 {
        self.blocks as u64 * BLOCK_SIZE as u64
    }

    /// replace the permission bits, keeping the file type
    pub fn set_permissions(&mut self, mode: u32) {
        let type_bits = libc::S_IFMT as u32;
        self.mode = (self.mode & type_bits) | (mode & !type_bits);
    }

    pub fn update_modified_at(&mut self) {
        self.modified_at = time_util::now();
    }

    pub fn update_accessed_at(&mut self) {
        self.accessed_at = time_util::now();
    }

    pub fn stat(&self, inode_number: InodeNo) -> FileStat {
        FileStat {
            inode_number,
            kind: self.kind(),
            mode: self.mode,
            links: self.links,
            size: self.size,
            blocks: self.blocks,
            block_size: BLOCK_SIZE,
            created_at: self.created_at,
            accessed_at: self.accessed_at,
            modified_at: self.modified_at,
        }
    }
}

/// attributes reported by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub inode_number: InodeNo,
    pub kind: FileKind,
    pub mode: u32,
    pub links: u32,
    pub size: u64,
    pub blocks: u32,
    pub block_size: u32,
    pub created_at: Timestamp,
    pub accessed_at: Timestamp,
    pub modified_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsError;

    #[test]
    fn test_record_fits_in_slot() {
        let inode = Inode::new(libc::S_IFREG as u32 | 0o644);
        let len = inode.encoded_len().unwrap();
        assert_eq!(len, 108);
        assert!(len <= INODE_SIZE as usize);
    }

    #[test]
    fn test_pointer_sentinel_roundtrip() {
        let mut inode = Inode::new(libc::S_IFREG as u32 | 0o644);
        // block 0 is a valid index and must not read back as "none"
        inode.direct[0] = Some(0);
        inode.direct[11] = Some(77);
        inode.indirect = None;
        inode.blocks = 2;
        let mut slot = vec![0xeeu8; INODE_SIZE as usize];
        inode.encode_into(&mut slot).unwrap();
        let read_back = Inode::decode_from(&slot).unwrap();
        assert_eq!(read_back, inode);
        assert_eq!(read_back.direct[0], Some(0));
        assert_eq!(read_back.direct[1], None);
        assert_eq!(read_back.indirect, None);
    }

    #[test]
    fn test_short_slot_is_rejected() {
        let inode = Inode::new(libc::S_IFREG as u32 | 0o644);
        let mut slot = vec![0u8; INODE_SIZE as usize - 1];
        assert!(matches!(inode.encode_into(&mut slot), Err(FsError::Corrupt(_))));
        assert!(matches!(Inode::decode_from(&slot), Err(FsError::Corrupt(_))));
        // the short buffer is left alone
        assert!(slot.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_set_permissions_keeps_type() {
        let mut inode = Inode::new(libc::S_IFDIR as u32 | 0o755);
        inode.set_permissions(0o700 | libc::S_IFREG as u32);
        assert!(inode.is_dir());
        assert_eq!(inode.mode & 0o7777, 0o700);
    }

    #[test]
    fn test_stat_reports_capacity() {
        let mut inode = Inode::new(libc::S_IFREG as u32 | 0o644);
        inode.blocks = 3;
        inode.size = 5;
        assert_eq!(inode.capacity(), 3 * BLOCK_SIZE as u64);
        let stat = inode.stat(9);
        assert_eq!(stat.inode_number, 9);
        assert_eq!(stat.kind, FileKind::RegularFile);
        assert_eq!(stat.size, 5);
    }
}
