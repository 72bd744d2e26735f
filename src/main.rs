use blockfs::cli_interface::BlockFsCli;
use clap::Parser;
/// a CLI interface to users to choose create our filesystem,
/// or register it to `FUSE` and mount it.
///
/// The latter will block the program until we umount our filesystem ourselves.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = BlockFsCli::parse();
    match args {
        //create a new file system
        BlockFsCli::Mkfs(args) => {
            blockfs::mkfs::mkfs(args.image_file_path, args.size, args.inode_count)?;
        }
        //register a filesystem to `FUSE` and mount it
        BlockFsCli::Mount(args) => {
            blockfs::mount::mount(args.image_file_path, args.mount_point)?;
        }
    }
    Ok(())
}
