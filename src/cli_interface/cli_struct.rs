use byte_unit::Byte;
use clap::Parser;

use crate::fs::DEFAULT_INODE_LIMIT;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum BlockFsCli {
    /// create a new file system
    Mkfs(MkfsArgs),
    /// register a filesystem to `FUSE` and mount it
    Mount(MountArgs),
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the image file, e.g. `1MiB` or `4194304`
    #[clap(short, long, value_parser = parse_size, default_value = "1MiB")]
    pub size: u64,
    /// the inode count of the file system
    #[clap(short, long, default_value_t = DEFAULT_INODE_LIMIT)]
    pub inode_count: u32,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a file system")]
pub struct MountArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the mount point of the file system
    #[clap(short, long)]
    pub mount_point: String,
}

/// parse a size with an optional unit suffix
fn parse_size(size: &str) -> Result<u64, String> {
    let bytes = Byte::from_str(size).map_err(|e| e.to_string())?;
    u64::try_from(bytes.get_bytes()).map_err(|e| e.to_string())
}

/// test the `BlockFsCli` struct
/// test `mkfs` subcommand
#[cfg(test)]
mod mkfs_parse_args_tests {
    use super::*;
    /// test short parameter form
    #[test]
    fn test_short_parameter_form() {
        let args = BlockFsCli::parse_from(["blockfs", "mkfs", "-p", "test", "-s", "2MiB", "-i", "32"]);
        assert_eq!(
            args,
            BlockFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
                size: 2 * 1024 * 1024,
                inode_count: 32,
            })
        );
    }
    /// test long parameter form
    #[test]
    fn test_long_parameter_form() {
        let image_file_path_name = concat!("--", "image-file-path");
        let args = BlockFsCli::parse_from([
            "blockfs",
            "mkfs",
            image_file_path_name,
            "test",
            "--size",
            "40960",
            "--inode-count",
            "128",
        ]);
        assert_eq!(
            args,
            BlockFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
                size: 40960,
                inode_count: 128,
            })
        );
    }
    /// test default geometry
    #[test]
    fn test_defaults() {
        let args = BlockFsCli::parse_from(["blockfs", "mkfs", "-p", "test"]);
        assert_eq!(
            args,
            BlockFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
                size: 1 << 20,
                inode_count: 64,
            })
        );
    }

    #[test]
    fn test_bad_size() {
        assert!(BlockFsCli::try_parse_from(["blockfs", "mkfs", "-p", "test", "-s", "lots"]).is_err());
    }
}

/// test the `BlockFsCli` struct
/// test `mount` subcommand
#[cfg(test)]
mod mount_parse_args_tests {
    use super::*;
    /// test short parameter form
    #[test]
    fn test_short_parameter_form() {
        let args = BlockFsCli::parse_from(["blockfs", "mount", "-p", "test", "-m", "test"]);
        assert_eq!(
            args,
            BlockFsCli::Mount(MountArgs {
                image_file_path: "test".to_string(),
                mount_point: "test".to_string(),
            })
        );
    }
    /// test long parameter form
    #[test]
    fn test_long_parameter_form() {
        let image_file_path_name = concat!("--", "image-file-path");
        let args = BlockFsCli::parse_from([
            "blockfs",
            "mount",
            image_file_path_name,
            "test",
            "--mount-point",
            "test",
        ]);
        assert_eq!(
            args,
            BlockFsCli::Mount(MountArgs {
                image_file_path: "test".to_string(),
                mount_point: "test".to_string(),
            })
        );
    }
}
