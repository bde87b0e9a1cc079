//! Storage path resolution
//!
//! Explorer paths are absolute within the storage medium (`/music/a.mp3`)
//! and are mapped beneath the configured storage root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Map `path` beneath `root`, refusing anything that could escape it
pub fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::BadRequest(format!("path '{}' leaves the storage root", path)));
            }
        }
    }
    Ok(resolved)
}

/// Canonical storage form of `path`: leading '/', no empty or '.' segments
pub fn normalize(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::BadRequest(format!("path '{}' leaves the storage root", path)));
            }
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_beneath_root() {
        let root = Path::new("/srv/sd");
        assert_eq!(resolve(root, "/music/a.mp3").unwrap(), root.join("music/a.mp3"));
        assert_eq!(resolve(root, "music/./b").unwrap(), root.join("music/b"));
        assert_eq!(resolve(root, "/").unwrap(), root.to_path_buf());
        assert_eq!(resolve(root, "").unwrap(), root.to_path_buf());
    }

    #[test]
    fn test_escapes_rejected() {
        let root = Path::new("/srv/sd");
        assert!(matches!(resolve(root, "/../etc/passwd"), Err(Error::BadRequest(_))));
        assert!(matches!(resolve(root, "music/../../x"), Err(Error::BadRequest(_))));
        assert!(normalize("/a/../b").is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("music//a.mp3").unwrap(), "/music/a.mp3");
        assert_eq!(normalize("/").unwrap(), "/");
    }
}
