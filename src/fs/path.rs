//! slash separated paths, always absolute
use smallvec::SmallVec;

use super::{FsError, FsResult, InodeNo, Storage, ROOT_INODE};

/// non-empty segments of an absolute path
///
/// Repeated and trailing slashes are ignored.
/// ```
/// use blockfs::path::components;
/// assert_eq!(components("/a//b/").unwrap().as_slice(), &["a", "b"]);
/// assert!(components("/").unwrap().is_empty());
/// assert!(components("relative").is_err());
/// ```
pub fn components(path: &str) -> FsResult<SmallVec<[&str; 8]>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| FsError::InvalidArgument(format!("path {path:?} is not absolute")))?;
    Ok(rest.split('/').filter(|s| !s.is_empty()).collect())
}

/// split `path` into the path of its parent directory and its last segment
///
/// A root-level child has `"/"` as its parent. The root itself has no
/// name and is rejected.
pub fn split_parent_and_name(path: &str) -> FsResult<(String, &str)> {
    let segments = components(path)?;
    let (name, parent) = segments
        .split_last()
        .ok_or_else(|| FsError::InvalidArgument("the root has no parent".into()))?;
    Ok((format!("/{}", parent.join("/")), *name))
}

impl Storage {
    /// walk `path` from the root directory to the inode it names
    pub fn resolve(&self, path: &str) -> FsResult<InodeNo> {
        let mut inum = ROOT_INODE;
        for segment in components(path)? {
            let dir = self.get_inode(inum)?;
            if !dir.is_dir() {
                return Err(FsError::NotDirectory(format!(
                    "{segment:?} in {path:?} is below a non-directory"
                )));
            }
            inum = self
                .lookup(&dir, segment)
                .map_err(|e| match e {
                    FsError::NotFound(_) => FsError::NotFound(path.to_owned()),
                    e => e,
                })?;
        }
        Ok(inum)
    }

    /// resolve the parent of `path`, returning it with the final name
    pub fn resolve_parent<'p>(&self, path: &'p str) -> FsResult<(InodeNo, &'p str)> {
        let (parent, name) = split_parent_and_name(path)?;
        let parent = self.resolve(&parent)?;
        Ok((parent, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsConfig;

    #[test]
    fn test_split_parent_and_name() {
        assert_eq!(
            split_parent_and_name("/a.txt").unwrap(),
            ("/".to_owned(), "a.txt")
        );
        assert_eq!(
            split_parent_and_name("/d/e/f").unwrap(),
            ("/d/e".to_owned(), "f")
        );
        assert_eq!(
            split_parent_and_name("/d/e/").unwrap(),
            ("/d".to_owned(), "e")
        );
        assert!(split_parent_and_name("/").is_err());
        assert!(split_parent_and_name("a").is_err());
    }

    #[test]
    fn test_resolve() {
        let mut fs = Storage::in_memory(FsConfig::default()).unwrap();
        assert_eq!(fs.resolve("/").unwrap(), ROOT_INODE);
        assert_eq!(fs.resolve("/.").unwrap(), ROOT_INODE);
        assert_eq!(fs.resolve("/..").unwrap(), ROOT_INODE);

        let d = fs.allocate_dir(ROOT_INODE, 0o755).unwrap();
        fs.put(ROOT_INODE, "d", d).unwrap();
        let f = fs.allocate_inode(libc::S_IFREG as u32 | 0o644).unwrap();
        fs.put(d, "f", f).unwrap();

        assert_eq!(fs.resolve("/d").unwrap(), d);
        assert_eq!(fs.resolve("/d/f").unwrap(), f);
        assert_eq!(fs.resolve("/d/../d/./f").unwrap(), f);
        assert_eq!(fs.resolve_parent("/d/f").unwrap(), (d, "f"));
        // the root stays the same whatever else exists
        assert_eq!(fs.resolve("/").unwrap(), ROOT_INODE);

        assert!(matches!(fs.resolve("/missing/f"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.resolve("/d/f/x"), Err(FsError::NotDirectory(_))));
    }
}
