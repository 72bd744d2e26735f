//! directories: an array of fixed-size entries inside the first data block
//! of a directory inode
use log::debug;

use super::{BlockNo, FileKind, FsError, FsResult, Inode, InodeNo, Storage, BLOCK_SIZE, ROOT_INODE};

/// longest name a directory entry can hold, in bytes
pub const DIR_NAME_LENGTH: usize = 48;
/// size of one directory entry slot
pub const DIRENT_SIZE: usize = 64;
const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE as usize / DIRENT_SIZE;

const INUM_OFFSET: usize = DIR_NAME_LENGTH;
const USED_OFFSET: usize = INUM_OFFSET + 4;

/// one name binding inside a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inum: InodeNo,
    pub used: bool,
}

impl DirEntry {
    pub fn new(name: &str, inum: InodeNo) -> FsResult<Self> {
        validate_name(name)?;
        Ok(DirEntry {
            name: name.to_owned(),
            inum,
            used: true,
        })
    }

    /// slot layout: name (zero padded), inode number, used flag, reserved
    fn encode_into(&self, slot: &mut [u8]) {
        let slot = &mut slot[..DIRENT_SIZE];
        slot.fill(0);
        let name = self.name.as_bytes();
        slot[..name.len()].copy_from_slice(name);
        slot[INUM_OFFSET..INUM_OFFSET + 4].copy_from_slice(&self.inum.to_le_bytes());
        slot[USED_OFFSET..USED_OFFSET + 4].copy_from_slice(&u32::from(self.used).to_le_bytes());
    }

    fn decode_from(slot: &[u8]) -> FsResult<Self> {
        if slot.len() < DIRENT_SIZE {
            return Err(FsError::Corrupt("directory slot is truncated".into()));
        }
        let raw_name = &slot[..DIR_NAME_LENGTH];
        let name_len = raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(DIR_NAME_LENGTH);
        let name = std::str::from_utf8(&raw_name[..name_len])
            .map_err(|e| FsError::Corrupt(format!("directory entry name: {e}")))?
            .to_owned();
        let word = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&slot[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        Ok(DirEntry {
            name,
            inum: word(INUM_OFFSET),
            used: word(USED_OFFSET) != 0,
        })
    }

    fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// a name must fit a slot and must not contain a separator or NUL
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty file name".into()));
    }
    if name.len() > DIR_NAME_LENGTH {
        return Err(FsError::InvalidArgument(format!(
            "name {name:?} is longer than {DIR_NAME_LENGTH} bytes"
        )));
    }
    if name.contains(['/', '\0']) {
        return Err(FsError::InvalidArgument(format!(
            "name {name:?} contains '/' or NUL"
        )));
    }
    Ok(())
}

/// entry slots
impl Storage {
    fn dir_block(&self, dir: &Inode) -> FsResult<BlockNo> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory(format!(
                "mode {:o} is not a directory",
                dir.mode
            )));
        }
        dir.direct[0]
            .ok_or_else(|| FsError::Corrupt("directory without a data block".into()))
    }

    fn slot_count(dir: &Inode) -> usize {
        (dir.size as usize / DIRENT_SIZE).min(ENTRIES_PER_BLOCK)
    }

    fn read_slot(&self, block: BlockNo, slot: usize) -> FsResult<DirEntry> {
        let start = slot * DIRENT_SIZE;
        DirEntry::decode_from(&self.store.block(block)?[start..start + DIRENT_SIZE])
    }

    fn write_slot(&mut self, block: BlockNo, slot: usize, entry: &DirEntry) -> FsResult<()> {
        let start = slot * DIRENT_SIZE;
        entry.encode_into(&mut self.store.block_mut(block)?[start..start + DIRENT_SIZE]);
        Ok(())
    }

    /// every slot in storage order, unused ones included
    fn slots(&self, dir: &Inode) -> FsResult<Vec<DirEntry>> {
        let block = self.dir_block(dir)?;
        (0..Self::slot_count(dir))
            .map(|slot| self.read_slot(block, slot))
            .collect()
    }

    fn find_slot(&self, dir: &Inode, name: &str) -> FsResult<Option<(usize, DirEntry)>> {
        Ok(self
            .slots(dir)?
            .into_iter()
            .enumerate()
            .find(|(_, entry)| entry.used && entry.name == name))
    }
}

/// directory operations
impl Storage {
    /// write `.` and `..` into the fresh directory inode `inum`
    fn init_dir(&mut self, inum: InodeNo, parent: InodeNo) -> FsResult<()> {
        let mut dir = self.get_inode(inum)?;
        let block = self.dir_block(&dir)?;
        self.write_slot(block, 0, &DirEntry::new(".", inum)?)?;
        self.write_slot(block, 1, &DirEntry::new("..", parent)?)?;
        dir.size = 2 * DIRENT_SIZE as u64;
        dir.links = 2;
        self.save_inode(inum, &dir)
    }

    /// create the root directory, which must be the first inode handed out
    pub(crate) fn init_root(&mut self) -> FsResult<()> {
        let inum = self.allocate_inode(FileKind::Directory.mode_bits() | 0o755)?;
        if inum != ROOT_INODE {
            return Err(FsError::Corrupt(format!(
                "root directory got inode {inum}"
            )));
        }
        self.init_dir(inum, inum)?;
        debug!("init_root()");
        Ok(())
    }

    /// allocate a directory inode below `parent`; the caller binds its name
    pub(crate) fn allocate_dir(&mut self, parent: InodeNo, mode: u32) -> FsResult<InodeNo> {
        let inum = self.allocate_inode(FileKind::Directory.mode_bits() | (mode & 0o7777))?;
        self.init_dir(inum, parent)?;
        Ok(inum)
    }

    /// find the inode bound to `name` in `dir`
    pub fn lookup(&self, dir: &Inode, name: &str) -> FsResult<InodeNo> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument("lookup of an empty name".into()));
        }
        self.find_slot(dir, name)?
            .map(|(_, entry)| entry.inum)
            .ok_or_else(|| FsError::NotFound(name.to_owned()))
    }

    /// bind `name` to `inum` in directory `dir_inum`
    ///
    /// A slot flagged unused is reused before the entry array grows.
    /// The array never grows past one block.
    pub fn put(&mut self, dir_inum: InodeNo, name: &str, inum: InodeNo) -> FsResult<()> {
        let entry = DirEntry::new(name, inum)?;
        let mut dir = self.get_inode(dir_inum)?;
        let slots = self.slots(&dir)?;
        if slots.iter().any(|e| e.used && e.name == name) {
            return Err(FsError::AlreadyExists(name.to_owned()));
        }
        let block = self.dir_block(&dir)?;
        let slot = match slots.iter().position(|e| !e.used) {
            Some(free) => free,
            None if slots.len() < ENTRIES_PER_BLOCK => {
                dir.size += DIRENT_SIZE as u64;
                slots.len()
            }
            None => {
                return Err(FsError::CapacityExceeded(format!(
                    "directory {dir_inum} holds {ENTRIES_PER_BLOCK} entries already"
                )))
            }
        };
        self.write_slot(block, slot, &entry)?;
        dir.update_modified_at();
        self.save_inode(dir_inum, &dir)?;
        debug!("put({dir_inum}, {name:?}) -> {inum} in slot {slot}");
        Ok(())
    }

    /// point the existing entry `name` of `dir_inum` at `inum`,
    /// returning the inode it was bound to
    pub(crate) fn retarget(
        &mut self,
        dir_inum: InodeNo,
        name: &str,
        inum: InodeNo,
    ) -> FsResult<InodeNo> {
        let mut dir = self.get_inode(dir_inum)?;
        let block = self.dir_block(&dir)?;
        let (slot, mut entry) = self
            .find_slot(&dir, name)?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;
        let previous = entry.inum;
        entry.inum = inum;
        self.write_slot(block, slot, &entry)?;
        dir.update_modified_at();
        self.save_inode(dir_inum, &dir)?;
        Ok(previous)
    }

    /// flag the entry `name` of `dir_inum` unused without touching its inode,
    /// returning the inode it was bound to
    pub(crate) fn unbind(&mut self, dir_inum: InodeNo, name: &str) -> FsResult<InodeNo> {
        let mut dir = self.get_inode(dir_inum)?;
        let block = self.dir_block(&dir)?;
        let (slot, mut entry) = self
            .find_slot(&dir, name)?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;
        entry.used = false;
        self.write_slot(block, slot, &entry)?;
        dir.update_modified_at();
        self.save_inode(dir_inum, &dir)?;
        Ok(entry.inum)
    }

    /// remove `name` from `dir_inum` along with everything below it
    ///
    /// A regular file loses one link and is freed once none are left.
    /// A directory is emptied recursively and freed.
    pub fn delete(&mut self, dir_inum: InodeNo, name: &str) -> FsResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidArgument(format!("can't delete {name:?}")));
        }
        let dir = self.get_inode(dir_inum)?;
        let target = self.lookup(&dir, name)?;
        let kind = self.get_inode(target)?.kind();
        if kind == FileKind::Unknown {
            return Err(FsError::Corrupt(format!(
                "entry {name:?} refers to inode {target} of unknown kind"
            )));
        }
        self.unbind(dir_inum, name)?;
        match kind {
            FileKind::Directory => {
                self.delete_subtree(target)?;
                self.adjust_links(dir_inum, -1)?;
            }
            _ => self.drop_link(target)?,
        }
        debug!("delete({dir_inum}, {name:?}) released inode {target}");
        Ok(())
    }

    /// free the directory `root` and every inode below it, children first
    fn delete_subtree(&mut self, root: InodeNo) -> FsResult<()> {
        // (inode, children already queued)
        let mut stack = vec![(root, false)];
        while let Some((inum, expanded)) = stack.pop() {
            if expanded {
                self.free_inode(inum)?;
                continue;
            }
            let inode = self.get_inode(inum)?;
            match inode.kind() {
                FileKind::Directory => {
                    stack.push((inum, true));
                    for entry in self.list_inode(&inode)? {
                        if !entry.is_dot() {
                            stack.push((entry.inum, false));
                        }
                    }
                }
                FileKind::RegularFile => self.drop_link(inum)?,
                FileKind::Unknown => {
                    return Err(FsError::Corrupt(format!(
                        "inode {inum} below directory {root} is of unknown kind"
                    )))
                }
            }
        }
        Ok(())
    }

    /// take one link away from a regular file, freeing it at zero
    pub(crate) fn drop_link(&mut self, inum: InodeNo) -> FsResult<()> {
        let mut inode = self.get_inode(inum)?;
        inode.links = inode.links.saturating_sub(1);
        if inode.links == 0 {
            self.free_inode(inum)
        } else {
            self.save_inode(inum, &inode)
        }
    }

    pub(crate) fn adjust_links(&mut self, inum: InodeNo, delta: i32) -> FsResult<()> {
        let mut inode = self.get_inode(inum)?;
        inode.links = inode.links.saturating_add_signed(delta);
        self.save_inode(inum, &inode)
    }

    /// active entries of `dir` in storage order, `.` and `..` included
    pub fn list_inode(&self, dir: &Inode) -> FsResult<Vec<DirEntry>> {
        Ok(self.slots(dir)?.into_iter().filter(|e| e.used).collect())
    }

    /// check if `dir` holds nothing besides `.` and `..`
    pub fn is_dir_empty(&self, dir: &Inode) -> FsResult<bool> {
        Ok(self.list_inode(dir)?.iter().all(DirEntry::is_dot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsConfig;

    const FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;

    fn fs() -> Storage {
        Storage::in_memory(FsConfig::default()).expect("create in memory fs failed")
    }

    fn root(fs: &Storage) -> Inode {
        fs.get_inode(ROOT_INODE).unwrap()
    }

    #[test]
    fn test_entry_slot_layout() {
        let entry = DirEntry::new("hello.txt", 7).unwrap();
        let mut slot = [0xffu8; DIRENT_SIZE];
        entry.encode_into(&mut slot);
        assert_eq!(&slot[..9], b"hello.txt");
        assert!(slot[9..DIR_NAME_LENGTH].iter().all(|b| *b == 0));
        assert_eq!(&slot[48..52], &7u32.to_le_bytes());
        assert_eq!(&slot[52..56], &1u32.to_le_bytes());
        assert_eq!(DirEntry::decode_from(&slot).unwrap(), entry);

        // a name using all 48 bytes has no terminator
        let long = "x".repeat(DIR_NAME_LENGTH);
        let entry = DirEntry::new(&long, 1).unwrap();
        entry.encode_into(&mut slot);
        assert_eq!(DirEntry::decode_from(&slot).unwrap().name, long);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("a").is_ok());
        assert!(matches!(validate_name(""), Err(FsError::InvalidArgument(_))));
        assert!(validate_name(&"x".repeat(DIR_NAME_LENGTH + 1)).is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\0b").is_err());
    }

    #[test]
    fn test_root_directory() {
        let fs = fs();
        let root = root(&fs);
        assert!(root.is_dir());
        assert_eq!(root.links, 2);
        assert_eq!(root.mode & 0o7777, 0o755);
        assert_eq!(fs.lookup(&root, ".").unwrap(), ROOT_INODE);
        assert_eq!(fs.lookup(&root, "..").unwrap(), ROOT_INODE);
        let names: Vec<_> = fs
            .list_inode(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(fs.is_dir_empty(&root).unwrap());
    }

    #[test]
    fn test_put_then_lookup_then_delete() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        inode.links = 1;
        fs.save_inode(inum, &inode).unwrap();

        fs.put(ROOT_INODE, "f", inum).unwrap();
        assert_eq!(fs.lookup(&root(&fs), "f").unwrap(), inum);
        assert!(matches!(
            fs.put(ROOT_INODE, "f", inum),
            Err(FsError::AlreadyExists(_))
        ));

        fs.delete(ROOT_INODE, "f").unwrap();
        assert!(matches!(
            fs.lookup(&root(&fs), "f"),
            Err(FsError::NotFound(_))
        ));
        assert!(!fs.has_inode(inum).unwrap());
    }

    #[test]
    fn test_lookup_rejects_empty_name_and_files() {
        let fs = fs();
        assert!(matches!(
            fs.lookup(&root(&fs), ""),
            Err(FsError::InvalidArgument(_))
        ));
        let file = Inode::new(FILE_MODE);
        assert!(matches!(
            fs.lookup(&file, "x"),
            Err(FsError::NotDirectory(_))
        ));
    }

    #[test]
    fn test_unused_slots_are_reused() {
        let mut fs = fs();
        fs.put(ROOT_INODE, "a", 5).unwrap();
        fs.put(ROOT_INODE, "b", 6).unwrap();
        let size = root(&fs).size;
        fs.unbind(ROOT_INODE, "a").unwrap();
        fs.put(ROOT_INODE, "c", 7).unwrap();
        assert_eq!(root(&fs).size, size);
        let names: Vec<_> = fs
            .list_inode(&root(&fs))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", "..", "c", "b"]);
    }

    #[test]
    fn test_directory_block_capacity() {
        let mut fs = fs();
        for i in 2..ENTRIES_PER_BLOCK {
            fs.put(ROOT_INODE, &format!("e{i}"), 1).unwrap();
        }
        assert_eq!(root(&fs).size, BLOCK_SIZE as u64);
        assert!(matches!(
            fs.put(ROOT_INODE, "one-too-many", 1),
            Err(FsError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_delete_subtree() {
        let mut fs = fs();
        let (free_blocks, free_inodes) = fs.free_counts().unwrap();

        let d = fs.allocate_dir(ROOT_INODE, 0o755).unwrap();
        fs.put(ROOT_INODE, "d", d).unwrap();
        fs.adjust_links(ROOT_INODE, 1).unwrap();
        let e = fs.allocate_dir(d, 0o755).unwrap();
        fs.put(d, "e", e).unwrap();
        fs.adjust_links(d, 1).unwrap();
        for (parent, name) in [(d, "f"), (e, "g")] {
            let inum = fs.allocate_inode(FILE_MODE).unwrap();
            let mut inode = fs.get_inode(inum).unwrap();
            inode.links = 1;
            fs.save_inode(inum, &inode).unwrap();
            fs.put(parent, name, inum).unwrap();
        }
        assert_eq!(root(&fs).links, 3);

        fs.delete(ROOT_INODE, "d").unwrap();
        assert_eq!(fs.free_counts().unwrap(), (free_blocks, free_inodes));
        assert_eq!(root(&fs).links, 2);
        assert!(fs.is_dir_empty(&root(&fs)).unwrap());
    }

    #[test]
    fn test_delete_keeps_linked_file() {
        let mut fs = fs();
        let inum = fs.allocate_inode(FILE_MODE).unwrap();
        let mut inode = fs.get_inode(inum).unwrap();
        inode.links = 2;
        fs.save_inode(inum, &inode).unwrap();
        fs.put(ROOT_INODE, "a", inum).unwrap();
        fs.put(ROOT_INODE, "b", inum).unwrap();

        fs.delete(ROOT_INODE, "a").unwrap();
        assert!(fs.has_inode(inum).unwrap());
        assert_eq!(fs.get_inode(inum).unwrap().links, 1);
        assert_eq!(fs.lookup(&root(&fs), "b").unwrap(), inum);
    }

    #[test]
    fn test_delete_rejects_dots_and_unknown_kinds() {
        let mut fs = fs();
        assert!(matches!(
            fs.delete(ROOT_INODE, ".."),
            Err(FsError::InvalidArgument(_))
        ));
        let inum = fs.allocate_inode(libc::S_IFLNK as u32 | 0o777).unwrap();
        fs.put(ROOT_INODE, "odd", inum).unwrap();
        assert!(matches!(
            fs.delete(ROOT_INODE, "odd"),
            Err(FsError::Corrupt(_))
        ));
        // nothing was unbound
        assert_eq!(fs.lookup(&root(&fs), "odd").unwrap(), inum);
    }
}
