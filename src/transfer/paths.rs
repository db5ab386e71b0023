//! Path construction for transfers.
//!
//! Remote paths are always `/`-joined strings regardless of the local
//! platform. Local paths are checked lexically; symlinks are not resolved.

use crate::transfer::error::{TransferError, TransferResult};
use std::path::{Component, Path, PathBuf};

/// Join a remote directory and a filename. An empty directory means the
/// remote login directory.
pub fn join_remote(dir: &str, filename: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        if dir.starts_with('/') {
            return format!("/{}", filename);
        }
        return filename.to_string();
    }
    format!("{}/{}", trimmed, filename)
}

pub fn join_local(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename)
}

/// A bare file name: no separators, no `.`/`..`, no NUL.
pub fn validate_filename(filename: &str) -> TransferResult<()> {
    let invalid = |why: &str| Err(TransferError::InvalidPath(format!("{:?} {}", filename, why)));

    if filename.is_empty() {
        return invalid("is empty");
    }
    if filename == "." || filename == ".." {
        return invalid("is not a file name");
    }
    if filename.contains('\0') {
        return invalid("contains NUL");
    }
    if filename.contains('/') || filename.contains('\\') {
        return invalid("contains a path separator");
    }
    Ok(())
}

/// Resolve `.` and `..` without consulting the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Relative paths are taken against the current working directory.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

pub fn is_within(path: &Path, root: &Path) -> bool {
    normalize_lexical(&absolutize(path)).starts_with(normalize_lexical(&absolutize(root)))
}

pub fn ensure_within(path: &Path, root: &Path) -> TransferResult<()> {
    if is_within(path, root) {
        Ok(())
    } else {
        Err(TransferError::OutsideSandbox {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/upload", "a.txt"), "/upload/a.txt");
        assert_eq!(join_remote("/upload/", "a.txt"), "/upload/a.txt");
        assert_eq!(join_remote("upload", "a.txt"), "upload/a.txt");
        assert_eq!(join_remote("", "a.txt"), "a.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
    }

    #[test]
    fn test_join_local_tolerates_trailing_separator() {
        assert_eq!(
            join_local(Path::new("/data/"), "a.txt"),
            PathBuf::from("/data/a.txt")
        );
        assert_eq!(
            join_local(Path::new("/data"), "a.txt"),
            PathBuf::from("/data/a.txt")
        );
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report-01.csv").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(validate_filename(bad), Err(TransferError::InvalidPath(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_normalize_lexical() {
        assert_eq!(
            normalize_lexical(Path::new("/data/./in/../out")),
            PathBuf::from("/data/out")
        );
        assert_eq!(normalize_lexical(Path::new("/../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_lexical(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_sandbox() {
        let root = Path::new("/srv/load");
        assert!(is_within(Path::new("/srv/load/files/a.txt"), root));
        assert!(!is_within(Path::new("/srv/load/../secret"), root));
        assert!(!is_within(Path::new("/srv/loader/a.txt"), root));
        assert!(matches!(
            ensure_within(Path::new("/etc/passwd"), root),
            Err(TransferError::OutsideSandbox { .. })
        ));
    }
}
