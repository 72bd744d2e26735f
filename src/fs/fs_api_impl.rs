use std::{ffi::OsStr, time::Duration};

use fuser::{FileAttr, Filesystem, TimeOrNow};
use log::{info, warn};

use super::{FileStat, FsError, FsResult, InodeNo, Storage, BLOCK_SIZE};
use crate::utils::time_util::{self, Timestamp};

/// attributes and entries are never cached by the kernel
const TTL: Duration = Duration::new(0, 0);

/// `FUSE` numbers the root 1, the engine numbers it 0
fn to_inum(ino: u64) -> FsResult<InodeNo> {
    ino.checked_sub(1)
        .and_then(|inum| InodeNo::try_from(inum).ok())
        .ok_or_else(|| FsError::NotFound(format!("FUSE inode {ino}")))
}

fn to_ino(inum: InodeNo) -> u64 {
    inum as u64 + 1
}

fn to_name(name: &OsStr) -> FsResult<&str> {
    name.to_str()
        .ok_or_else(|| FsError::InvalidArgument(format!("{name:?} is not UTF-8")))
}

fn to_timestamp(time: TimeOrNow) -> FsResult<Timestamp> {
    match time {
        TimeOrNow::SpecificTime(time) => time.try_into(),
        TimeOrNow::Now => Ok(time_util::now()),
    }
}

/// Convert [FileStat] to [FileAttr](fuser::FileAttr),
/// every file belongs to whoever mounted the image
fn file_attr(stat: &FileStat) -> FileAttr {
    FileAttr {
        ino: to_ino(stat.inode_number),
        size: stat.size,
        // counted in 512 byte units
        blocks: stat.blocks as u64 * (BLOCK_SIZE as u64 / 512),
        atime: stat.accessed_at.into(),
        mtime: stat.modified_at.into(),
        ctime: stat.modified_at.into(),
        crtime: stat.created_at.into(),
        kind: stat.kind.into(),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.links,
        uid: users::get_effective_uid(),
        gid: users::get_effective_gid(),
        rdev: 0,
        blksize: stat.block_size,
        flags: 0,
    }
}

impl Storage {
    fn entry_attr(&self, inum: InodeNo) -> FsResult<FileAttr> {
        Ok(file_attr(&self.stat_inode(inum)?))
    }

    fn lookup_child(&self, parent: u64, name: &OsStr) -> FsResult<FileAttr> {
        let dir = self.get_inode(to_inum(parent)?)?;
        let inum = self.lookup(&dir, to_name(name)?)?;
        self.entry_attr(inum)
    }

    fn apply_setattr(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> FsResult<FileAttr> {
        let inum = to_inum(ino)?;
        if let Some(mode) = mode {
            self.chmod_inode(inum, mode)?;
        }
        if let Some(size) = size {
            self.truncate_inode(inum, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            let atime = atime.map(to_timestamp).transpose()?;
            let mtime = mtime.map(to_timestamp).transpose()?;
            self.set_time_inode(inum, atime, mtime)?;
        }
        self.entry_attr(inum)
    }

    fn create_child(&mut self, parent: u64, name: &OsStr, mode: u32) -> FsResult<FileAttr> {
        let inum = self.mknod_at(to_inum(parent)?, to_name(name)?, mode)?;
        self.entry_attr(inum)
    }
}

impl Filesystem for Storage {
    // to init the filesystem
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        info!(
            "init() called, {} blocks and {} inodes",
            self.block_count(),
            self.inode_limit()
        );
        Ok(())
    }

    // to umount the filesystem
    fn destroy(&mut self) {
        info!("destroy() called");
        if let Err(e) = Storage::flush(self) {
            warn!("flushing the image failed: {e}");
        }
    }

    // to show FS information
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let Ok(stats) = Storage::statfs(self) else {
            reply.error(libc::EIO);
            return;
        };
        reply.statfs(
            stats.total_blocks as u64,
            stats.free_blocks as u64,
            stats.free_blocks as u64,
            stats.total_inodes as u64,
            stats.free_inodes as u64,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        )
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number: {:?}", ino);
        match to_inum(ino).and_then(|inum| self.entry_attr(inum)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to set file attributes; ownership is fixed, so `uid` and `gid` are ignored
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!(
            "setattr() called with inode number: {:?}, mode: {:?}, uid: {:?}, gid: {:?}, size: {:?}, atime: {:?}, mtime: {:?}, fh: {:?}",
            ino, mode, uid, gid, size, atime, mtime, fh
        );
        match self.apply_setattr(ino, mode, size, atime, mtime) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to look up a file
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        match self.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to read a dir
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number: {ino}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let entries = match to_inum(ino).and_then(|inum| self.list_at(inum)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        for (index, entry) in entries.into_iter().enumerate().skip(offset as usize) {
            let Ok(child) = self.get_inode(entry.inum) else {
                reply.error(libc::EIO);
                return;
            };
            let buffer_full: bool = reply.add(
                to_ino(entry.inum),
                index as i64 + 1,
                child.kind().into(),
                &entry.name,
            );

            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mknod() called with parent inode number: {parent}, name: {name:?}, mode: {mode:o}");
        match self.create_child(parent, name, mode & !umask) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to create a dir
    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        let mode = libc::S_IFDIR as u32 | (mode & !umask & 0o7777);
        match self.create_child(parent, name, mode) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to create a new file
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        let mode = libc::S_IFREG as u32 | (mode & !umask & 0o7777);
        match self.create_child(parent, name, mode) {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, flags as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        info!("open() called with inode number: {ino}, flags: {flags}");
        match to_inum(ino).and_then(|inum| self.stat_inode(inum)) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        info!("access() called with inode number: {ino}, mask: {mask}");
        match to_inum(ino).and_then(|inum| self.access_inode(inum)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to delete a file
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        let result = to_inum(parent)
            .and_then(|parent| Ok((parent, to_name(name)?)))
            .and_then(|(parent, name)| self.unlink_at(parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to remove a dir
    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("rmdir() called with parent inode number: {parent} and name: {name:?}");
        let result = to_inum(parent)
            .and_then(|parent| Ok((parent, to_name(name)?)))
            .and_then(|(parent, name)| self.rmdir_at(parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to create a hard link
    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("link() called with inode number: {ino}, new parent: {newparent}, new name: {newname:?}");
        let result = (|| -> FsResult<FileAttr> {
            let inum = to_inum(ino)?;
            self.link_at(inum, to_inum(newparent)?, to_name(newname)?)?;
            self.entry_attr(inum)
        })();
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        info!(
            "rename() called with parent: {parent}, name: {name:?}, new parent: {newparent}, new name: {newname:?}, flags: {flags}"
        );
        // RENAME_EXCHANGE and RENAME_NOREPLACE are not supported
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = (|| -> FsResult<()> {
            self.rename_at(
                to_inum(parent)?,
                to_name(name)?,
                to_inum(newparent)?,
                to_name(newname)?,
            )
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to read from a file
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!(
            "read() called with inode number: {:?}, fh: {:?}, offset: {:?}, size: {:?}, flags: {:?}, lock_owner: {:?}",
            ino, fh, offset, size, flags, lock_owner
        );
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match to_inum(ino).and_then(|inum| self.read_at(inum, size as usize, offset)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    // to write to a file
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number: {:?}, fh: {:?}, offset: {:?}, len: {:?}, write_flags: {:?}, flags: {:?}, lock_owner: {:?}",
            ino, fh, offset, data.len(), write_flags, flags, lock_owner
        );
        // if offset < 0, return EINVAL
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match to_inum(ino).and_then(|inum| self.write_at(inum, data, offset)) {
            Ok(wrote) => reply.written(wrote as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
