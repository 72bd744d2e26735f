//! file and directory operations on top of the inode and directory layers
//!
//! Every operation comes in two forms: one addressed by absolute path and
//! one addressed by inode number, the latter being what the `FUSE` adapter
//! drives.
use log::{debug, info};
use std::ops::Range;

use super::{
    directory::{validate_name, DIR_NAME_LENGTH},
    BlockNo, BlockStore, DirEntry, FileKind, FileStat, FsError, FsResult, Inode, InodeNo,
    Storage, BLOCK_SIZE, ROOT_INODE,
};
use crate::utils::time_util::Timestamp;

/// usage summary reported by [Storage::statfs]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub name_max: u32,
}

/// the part of one data block touched by a read or a write
struct Span {
    block: BlockNo,
    in_block: Range<usize>,
    in_buf: Range<usize>,
}

/// helpers
impl Storage {
    /// an inode that is currently allocated
    fn live_inode(&self, inum: InodeNo) -> FsResult<Inode> {
        if !self.has_inode(inum)? {
            return Err(FsError::NotFound(format!("inode {inum}")));
        }
        self.get_inode(inum)
    }

    fn live_dir(&self, inum: InodeNo) -> FsResult<Inode> {
        let dir = self.live_inode(inum)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory(format!("inode {inum}")));
        }
        Ok(dir)
    }

    fn live_file(&self, inum: InodeNo) -> FsResult<Inode> {
        let inode = self.live_inode(inum)?;
        match inode.kind() {
            FileKind::RegularFile => Ok(inode),
            FileKind::Directory => Err(FsError::IsDirectory(format!("inode {inum}"))),
            FileKind::Unknown => Err(FsError::InvalidArgument(format!(
                "inode {inum} is not a regular file"
            ))),
        }
    }

    /// map the byte range `start..end` of `inode` onto its data blocks,
    /// stopping at the first block that is not allocated
    fn spans(&self, inode: &Inode, start: u64, end: u64) -> FsResult<Vec<Span>> {
        let block_size = BLOCK_SIZE as u64;
        let mut spans = vec![];
        let mut position = start;
        while position < end {
            let block = match self.inode_block_number(inode, position) {
                Ok(block) => block,
                Err(FsError::NotFound(_)) => break,
                Err(e) => return Err(e),
            };
            let offset_in_block = (position % block_size) as usize;
            let len = (block_size - position % block_size).min(end - position) as usize;
            let offset_in_buf = (position - start) as usize;
            spans.push(Span {
                block,
                in_block: offset_in_block..offset_in_block + len,
                in_buf: offset_in_buf..offset_in_buf + len,
            });
            position += len as u64;
        }
        Ok(spans)
    }

    fn zero_range(&mut self, inode: &Inode, start: u64, end: u64) -> FsResult<()> {
        for span in self.spans(inode, start, end)? {
            self.store.block_mut(span.block)?[span.in_block].fill(0);
        }
        Ok(())
    }

    /// check if directory `dir` is `ancestor` or lies somewhere below it
    fn is_within(&self, dir: InodeNo, ancestor: InodeNo) -> FsResult<bool> {
        let mut current = dir;
        // a sane tree is never deeper than the inode table
        for _ in 0..=self.inode_limit() {
            if current == ancestor {
                return Ok(true);
            }
            if current == ROOT_INODE {
                return Ok(false);
            }
            current = self.lookup(&self.get_inode(current)?, "..")?;
        }
        Err(FsError::Corrupt(format!(
            "the '..' chain of directory {dir} never reaches the root"
        )))
    }
}

/// operations addressed by inode number
impl Storage {
    pub fn stat_inode(&self, inum: InodeNo) -> FsResult<FileStat> {
        Ok(self.live_inode(inum)?.stat(inum))
    }

    /// check that `inum` exists, refreshing its access time
    pub fn access_inode(&mut self, inum: InodeNo) -> FsResult<()> {
        let mut inode = self.live_inode(inum)?;
        inode.update_accessed_at();
        self.save_inode(inum, &inode)
    }

    /// read up to `size` bytes at `offset`, never past the end of the file
    pub fn read_at(&mut self, inum: InodeNo, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        let mut inode = self.live_file(inum)?;
        if offset > inode.capacity() {
            return Err(FsError::InvalidArgument(format!(
                "offset {offset} is past the capacity of inode {inum}"
            )));
        }
        let end = offset.saturating_add(size as u64).min(inode.size);
        if offset >= end {
            return Ok(vec![]);
        }

        let spans = self.spans(&inode, offset, end)?;
        let read = spans.last().map_or(0, |span| span.in_buf.end);
        let mut buf = vec![0u8; read];
        for span in spans {
            buf[span.in_buf].copy_from_slice(&self.store.block(span.block)?[span.in_block]);
        }
        inode.update_accessed_at();
        self.save_inode(inum, &inode)?;
        debug!("read_at({inum}, {size}, {offset}) -> {read} bytes");
        Ok(buf)
    }

    /// write `data` at `offset`, growing the file first when it doesn't fit
    pub fn write_at(&mut self, inum: InodeNo, data: &[u8], offset: u64) -> FsResult<usize> {
        let mut inode = self.live_file(inum)?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::InvalidArgument(format!("offset {offset} overflows")))?;
        if end > inode.capacity() {
            let delta = end - inode.capacity();
            self.grow_inode(&mut inode, delta)?;
        }

        let spans = self.spans(&inode, offset, end)?;
        let wrote = spans.last().map_or(0, |span| span.in_buf.end);
        if wrote != data.len() {
            return Err(FsError::Corrupt(format!(
                "inode {inum} lost blocks between {offset} and {end}"
            )));
        }
        for span in spans {
            self.store.block_mut(span.block)?[span.in_block].copy_from_slice(&data[span.in_buf]);
        }
        inode.size = inode.size.max(end);
        inode.update_modified_at();
        self.save_inode(inum, &inode)?;
        debug!("write_at({inum}, {offset}) -> {wrote} bytes");
        Ok(wrote)
    }

    /// set the size of a regular file, releasing or claiming blocks
    ///
    /// A file always keeps its first block. Bytes cut off are zeroed,
    /// so growing again reads back zeros.
    pub fn truncate_inode(&mut self, inum: InodeNo, new_size: u64) -> FsResult<()> {
        let mut inode = self.live_file(inum)?;
        if new_size == inode.size {
            return Ok(());
        }
        let target = BlockStore::bytes_to_blocks(new_size).max(1);
        let capacity = inode.capacity();
        let target_capacity = target.saturating_mul(BLOCK_SIZE as u64);
        if target_capacity > capacity {
            self.grow_inode(&mut inode, target_capacity - capacity)?;
        } else if target_capacity < capacity {
            self.shrink_inode(&mut inode, capacity - target_capacity)?;
        }
        if new_size < inode.size {
            let old_end = inode.size.min(inode.capacity());
            self.zero_range(&inode, new_size, old_end)?;
        }
        inode.size = new_size;
        inode.update_modified_at();
        self.save_inode(inum, &inode)
    }

    /// create `name` in directory `parent`
    ///
    /// The type bits of `mode` decide between a regular file and a
    /// directory; no type bits at all means a regular file.
    pub fn mknod_at(&mut self, parent: InodeNo, name: &str, mode: u32) -> FsResult<InodeNo> {
        let kind = match FileKind::from_mode(mode) {
            FileKind::Unknown if mode & libc::S_IFMT as u32 == 0 => FileKind::RegularFile,
            FileKind::Unknown => {
                return Err(FsError::InvalidArgument(format!(
                    "can't create a node of mode {mode:o}"
                )))
            }
            kind => kind,
        };
        validate_name(name)?;
        let dir = self.live_dir(parent)?;
        match self.lookup(&dir, name) {
            Ok(_) => return Err(FsError::AlreadyExists(name.to_owned())),
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let permissions = mode & 0o7777;
        let inum = match kind {
            FileKind::Directory => self.allocate_dir(parent, permissions)?,
            _ => {
                let inum = self.allocate_inode(kind.mode_bits() | permissions)?;
                let mut inode = self.get_inode(inum)?;
                inode.links = 1;
                self.save_inode(inum, &inode)?;
                inum
            }
        };
        if let Err(e) = self.put(parent, name, inum) {
            self.free_inode(inum)?;
            return Err(e);
        }
        if kind == FileKind::Directory {
            self.adjust_links(parent, 1)?;
        }
        debug!("mknod_at({parent}, {name:?}, {mode:o}) -> {inum}");
        Ok(inum)
    }

    pub fn mkdir_at(&mut self, parent: InodeNo, name: &str, mode: u32) -> FsResult<InodeNo> {
        self.mknod_at(parent, name, FileKind::Directory.mode_bits() | (mode & 0o7777))
    }

    /// remove the entry `name` from `parent`; a directory goes with
    /// everything below it
    pub fn unlink_at(&mut self, parent: InodeNo, name: &str) -> FsResult<()> {
        self.live_dir(parent)?;
        self.delete(parent, name)
    }

    /// remove the empty directory `name` from `parent`
    pub fn rmdir_at(&mut self, parent: InodeNo, name: &str) -> FsResult<()> {
        let dir = self.live_dir(parent)?;
        let target = self.lookup(&dir, name)?;
        let target_dir = self.live_dir(target)?;
        if !self.is_dir_empty(&target_dir)? {
            return Err(FsError::NotEmpty(name.to_owned()));
        }
        self.delete(parent, name)
    }

    /// bind one more name to the regular file `inum`
    pub fn link_at(&mut self, inum: InodeNo, new_parent: InodeNo, new_name: &str) -> FsResult<()> {
        let inode = self.live_inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory(format!(
                "can't hard link directory {inum}"
            )));
        }
        self.live_dir(new_parent)?;
        self.put(new_parent, new_name, inum)?;
        self.adjust_links(inum, 1)
    }

    /// move `name` of `parent` to `new_name` of `new_parent`
    ///
    /// Every check runs before the namespace changes. The destination
    /// entry is written before the source entry is dropped, so a failure
    /// never loses the file.
    pub fn rename_at(
        &mut self,
        parent: InodeNo,
        name: &str,
        new_parent: InodeNo,
        new_name: &str,
    ) -> FsResult<()> {
        for name in [name, new_name] {
            if name == "." || name == ".." {
                return Err(FsError::InvalidArgument(format!("can't rename {name:?}")));
            }
        }
        validate_name(new_name)?;
        let from_dir = self.live_dir(parent)?;
        let to_dir = self.live_dir(new_parent)?;
        let source = self.lookup(&from_dir, name)?;
        let source_is_dir = self.live_inode(source)?.is_dir();
        if parent == new_parent && name == new_name {
            return Ok(());
        }
        if source_is_dir && self.is_within(new_parent, source)? {
            return Err(FsError::InvalidArgument(format!(
                "can't move directory {name:?} below itself"
            )));
        }

        let replaced = match self.lookup(&to_dir, new_name) {
            Ok(existing) => Some(existing),
            Err(FsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        match replaced {
            // two names of the same file
            Some(existing) if existing == source => return Ok(()),
            Some(existing) => {
                let existing_inode = self.live_inode(existing)?;
                match (source_is_dir, existing_inode.kind()) {
                    (true, FileKind::Directory) => {
                        if !self.is_dir_empty(&existing_inode)? {
                            return Err(FsError::NotEmpty(new_name.to_owned()));
                        }
                    }
                    (false, FileKind::Directory) => {
                        return Err(FsError::IsDirectory(new_name.to_owned()))
                    }
                    (true, FileKind::RegularFile) => {
                        return Err(FsError::NotDirectory(new_name.to_owned()))
                    }
                    (false, FileKind::RegularFile) => {}
                    (_, FileKind::Unknown) => {
                        return Err(FsError::Corrupt(format!(
                            "entry {new_name:?} refers to inode {existing} of unknown kind"
                        )))
                    }
                }
                self.retarget(new_parent, new_name, source)?;
                if existing_inode.is_dir() {
                    self.free_inode(existing)?;
                    self.adjust_links(new_parent, -1)?;
                } else {
                    self.drop_link(existing)?;
                }
            }
            None => self.put(new_parent, new_name, source)?,
        }
        self.unbind(parent, name)?;

        if source_is_dir && parent != new_parent {
            self.retarget(source, "..", new_parent)?;
            self.adjust_links(parent, -1)?;
            self.adjust_links(new_parent, 1)?;
        }
        debug!("rename_at({parent}, {name:?}, {new_parent}, {new_name:?})");
        Ok(())
    }

    /// set access and modification times; `None` leaves a time unchanged
    pub fn set_time_inode(
        &mut self,
        inum: InodeNo,
        accessed_at: Option<Timestamp>,
        modified_at: Option<Timestamp>,
    ) -> FsResult<()> {
        let mut inode = self.live_inode(inum)?;
        if let Some(time) = accessed_at {
            inode.accessed_at = time;
        }
        if let Some(time) = modified_at {
            inode.modified_at = time;
        }
        self.save_inode(inum, &inode)
    }

    /// replace the permission bits of `inum`
    pub fn chmod_inode(&mut self, inum: InodeNo, mode: u32) -> FsResult<()> {
        let mut inode = self.live_inode(inum)?;
        inode.set_permissions(mode);
        self.save_inode(inum, &inode)
    }

    pub fn list_at(&self, inum: InodeNo) -> FsResult<Vec<DirEntry>> {
        let dir = self.live_dir(inum)?;
        self.list_inode(&dir)
    }

    pub fn statfs(&self) -> FsResult<FsStats> {
        let (free_blocks, free_inodes) = self.free_counts()?;
        Ok(FsStats {
            block_size: BLOCK_SIZE,
            total_blocks: self.block_count(),
            free_blocks,
            total_inodes: self.inode_limit(),
            free_inodes,
            name_max: DIR_NAME_LENGTH as u32,
        })
    }
}

/// operations addressed by absolute path
impl Storage {
    pub fn stat(&self, path: &str) -> FsResult<FileStat> {
        let inum = self.resolve(path)?;
        self.stat_inode(inum)
    }

    pub fn access(&mut self, path: &str) -> FsResult<()> {
        info!("access({path:?})");
        let inum = self.resolve(path)?;
        self.access_inode(inum)
    }

    pub fn read(&mut self, path: &str, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        info!("read({path:?}, {size}, {offset})");
        let inum = self.resolve(path)?;
        self.read_at(inum, size, offset)
    }

    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        info!("write({path:?}, {} bytes, {offset})", data.len());
        let inum = self.resolve(path)?;
        self.write_at(inum, data, offset)
    }

    pub fn truncate(&mut self, path: &str, new_size: u64) -> FsResult<()> {
        info!("truncate({path:?}, {new_size})");
        let inum = self.resolve(path)?;
        self.truncate_inode(inum, new_size)
    }

    pub fn mknod(&mut self, path: &str, mode: u32) -> FsResult<InodeNo> {
        info!("mknod({path:?}, {mode:o})");
        let (parent, name) = self.resolve_parent(path)?;
        self.mknod_at(parent, name, mode)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> FsResult<InodeNo> {
        info!("mkdir({path:?}, {mode:o})");
        let (parent, name) = self.resolve_parent(path)?;
        self.mkdir_at(parent, name, mode)
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        info!("unlink({path:?})");
        let (parent, name) = self.resolve_parent(path)?;
        self.unlink_at(parent, name)
    }

    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        info!("rmdir({path:?})");
        let (parent, name) = self.resolve_parent(path)?;
        self.rmdir_at(parent, name)
    }

    /// make `to` another name of the file at `from`
    pub fn link(&mut self, from: &str, to: &str) -> FsResult<()> {
        info!("link({from:?}, {to:?})");
        let inum = self.resolve(from)?;
        let (parent, name) = self.resolve_parent(to)?;
        self.link_at(inum, parent, name)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        info!("rename({from:?}, {to:?})");
        let (parent, name) = self.resolve_parent(from)?;
        let (new_parent, new_name) = self.resolve_parent(to)?;
        self.rename_at(parent, name, new_parent, new_name)
    }

    pub fn set_time(
        &mut self,
        path: &str,
        accessed_at: Timestamp,
        modified_at: Timestamp,
    ) -> FsResult<()> {
        info!("set_time({path:?}, {accessed_at:?}, {modified_at:?})");
        let inum = self.resolve(path)?;
        self.set_time_inode(inum, Some(accessed_at), Some(modified_at))
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> FsResult<()> {
        info!("chmod({path:?}, {mode:o})");
        let inum = self.resolve(path)?;
        self.chmod_inode(inum, mode)
    }

    /// names in the directory at `path`, in storage order
    pub fn list(&self, path: &str) -> FsResult<Vec<String>> {
        let inum = self.resolve(path)?;
        Ok(self
            .list_at(inum)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }
}
