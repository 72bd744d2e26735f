//! create our filesystem
use anyhow::{anyhow, bail, Context};
use byte_unit::Byte;
use log::info;
use std::path::Path;

use crate::{
    fs::{FsConfig, Storage, BLOCK_SIZE},
    utils::fs_size_calculator,
};

/// create a new filesystem, given the path of the image file, image file size and inode count
/// # Params
/// - `image_file_path`: the path of the image file, which must not exist yet
/// - `file_size`: the size of the image file, a trailing partial block is dropped
/// - `inode_count`: the number of inodes
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P, file_size: u64, inode_count: u32) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let image_file_path = image_file_path.as_ref();
    if image_file_path.exists() {
        bail!("{image_file_path:?} already exists, refusing to overwrite it");
    }

    // check if specified image_file_size is enough:
    // the metadata region plus one block for the root directory
    let space_needed =
        (fs_size_calculator::data_start(inode_count) as u64 + 1) * BLOCK_SIZE as u64;
    if file_size < space_needed {
        return Err(anyhow!(
            "File size must be at least {} for inode count {}",
            Byte::from_bytes(space_needed as _).get_appropriate_unit(true),
            inode_count
        ));
    }
    let config = FsConfig::from_image_size(file_size, inode_count)
        .with_context(|| format!("can't lay out a {file_size} byte image"))?;

    let fs = Storage::format(image_file_path, config)?;
    fs.flush()?;
    let stats = fs.statfs()?;
    info!(
        "created {image_file_path:?}: {} blocks of {} bytes, {} inodes",
        stats.total_blocks, stats.block_size, stats.total_inodes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileKind, ROOT_INODE};

    #[test]
    fn test_mkfs() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_file = dir.path().join("new_fs.img");
        mkfs(&tmp_file, 1 << 20, 64).unwrap();
        assert_eq!(std::fs::metadata(&tmp_file).unwrap().len(), 1 << 20);

        let fs = Storage::open(&tmp_file).unwrap();
        // test if root inode "/" is created correctly
        let root = fs.stat("/").unwrap();
        assert_eq!(root.inode_number, ROOT_INODE);
        assert_eq!(root.mode, libc::S_IFDIR as u32 | 0o755);
        assert_eq!(root.links, 2);
        assert_eq!(root.kind, FileKind::Directory);

        // test if superblock is created correctly
        let superblock = fs.superblock();
        assert_eq!(superblock.block_count, 256);
        assert_eq!(superblock.inode_limit, 64);
        assert_eq!(fs.statfs().unwrap().free_inodes, 63);
    }

    #[test]
    fn test_mkfs_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_file = dir.path().join("taken.img");
        std::fs::write(&tmp_file, b"precious").unwrap();
        assert!(mkfs(&tmp_file, 1 << 20, 64).is_err());
        assert_eq!(std::fs::read(&tmp_file).unwrap(), b"precious");
    }

    #[test]
    fn test_mkfs_rejects_tiny_image() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_file = dir.path().join("tiny.img");
        assert!(mkfs(&tmp_file, 3 * BLOCK_SIZE as u64, 64).is_err());
        assert!(!tmp_file.exists());
    }
}
