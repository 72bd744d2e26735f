/// an enum to describe the type of a file, decoded from the type bits of a mode
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// anything else the mode bits may say; never created by this filesystem
    #[default]
    Unknown,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFREG as u32 => FileKind::RegularFile,
            m if m == libc::S_IFDIR as u32 => FileKind::Directory,
            _ => FileKind::Unknown,
        }
    }

    /// the type bits of this kind
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::RegularFile => libc::S_IFREG as u32,
            FileKind::Directory => libc::S_IFDIR as u32,
            FileKind::Unknown => 0,
        }
    }
}

/// implement a trait to convert [FileKind] to [fuser::FileType]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            // Unknown Types are treated as regular files
            FileKind::Unknown => fuser::FileType::RegularFile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mode() {
        assert_eq!(
            FileKind::from_mode(libc::S_IFDIR as u32 | 0o755),
            FileKind::Directory
        );
        assert_eq!(
            FileKind::from_mode(libc::S_IFREG as u32 | 0o644),
            FileKind::RegularFile
        );
        assert_eq!(
            FileKind::from_mode(libc::S_IFLNK as u32 | 0o777),
            FileKind::Unknown
        );
        assert_eq!(FileKind::from_mode(0o644), FileKind::Unknown);
    }
}
