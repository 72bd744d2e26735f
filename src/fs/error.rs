//! errors of the storage engine and their errno mapping
use thiserror::Error;

/// every failure the engine reports, up to the adapter boundary
#[derive(Debug, Error)]
pub enum FsError {
    /// a path, name or inode is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// create on an existing name
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// the directory block is full, or a file can't grow that far
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// the block bitmap has no free data block left
    #[error("no space left for data blocks")]
    NoSpace,

    /// the inode bitmap has no free slot left
    #[error("no free inodes left")]
    InodesExhausted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// metadata that can't be interpreted,
    /// e.g. a directory entry referencing neither a file nor a directory
    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    /// the image is not one of ours or its geometry is unusable
    #[error("invalid image format: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("record decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl FsError {
    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::CapacityExceeded(_) | Self::NoSpace | Self::InodesExhausted => libc::ENOSPC,
            Self::InvalidArgument(_) | Self::Format(_) => libc::EINVAL,
            Self::NotDirectory(_) => libc::ENOTDIR,
            Self::IsDirectory(_) => libc::EISDIR,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::Corrupt(_) | Self::Encode(_) | Self::Decode(_) => libc::EIO,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let cases: Vec<(FsError, libc::c_int)> = vec![
            (FsError::NotFound("/a".into()), libc::ENOENT),
            (FsError::AlreadyExists("/a".into()), libc::EEXIST),
            (FsError::CapacityExceeded("dir".into()), libc::ENOSPC),
            (FsError::NoSpace, libc::ENOSPC),
            (FsError::InodesExhausted, libc::ENOSPC),
            (FsError::InvalidArgument("".into()), libc::EINVAL),
            (FsError::NotDirectory("/a".into()), libc::ENOTDIR),
            (FsError::IsDirectory("/d".into()), libc::EISDIR),
            (FsError::NotEmpty("/d".into()), libc::ENOTEMPTY),
            (FsError::Corrupt("entry".into()), libc::EIO),
            (FsError::Format("magic".into()), libc::EINVAL),
            (FsError::Io(std::io::Error::other("test")), libc::EIO),
            (
                FsError::Io(std::io::Error::from_raw_os_error(libc::EACCES)),
                libc::EACCES,
            ),
        ];
        for (err, errno) in cases {
            assert_eq!(err.to_errno(), errno, "{err}");
        }
    }
}
