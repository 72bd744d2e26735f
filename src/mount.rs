//! register our filesystem to `FUSE` and mount it
use anyhow::Context;
use fuser::MountOption;
use std::path::Path;

use crate::fs::Storage;

/// mount the image at `image_path` on `mountpoint`,
/// blocking until it is unmounted
pub fn mount<P>(image_path: P, mountpoint: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let fs = Storage::open(image_path.as_ref())
        .with_context(|| format!("can't open image {:?}", image_path.as_ref()))?;

    let opts = vec![
        MountOption::FSName("blockfs".to_string()),
        MountOption::DefaultPermissions,
    ];

    Ok(fuser::mount2(fs, mountpoint, &opts)?)
}
