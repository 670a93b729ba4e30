//! Filesystem management for container isolation.
//!
//! The rootfs builder runs in the launcher before it reports ready;
//! `pivot_root` and the path masking that depends on it run only after the
//! start message.

pub mod device;
pub mod mount;
pub mod pivot_root;
pub mod rootfs;

use std::path::{Component, Path, PathBuf};

/// Resolves a container path to a host path under `rootfs`.
///
/// Paths already under `rootfs` are returned unchanged. `..` components
/// are clamped at the rootfs so the result never escapes it lexically.
#[must_use]
pub fn resolve_in_rootfs(rootfs: &Path, path: &Path) -> PathBuf {
    if path.starts_with(rootfs) {
        return path.to_path_buf();
    }

    let mut inner = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => inner.push(part),
            Component::ParentDir => {
                let _ = inner.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    rootfs.join(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_container_paths_land_under_rootfs() {
        let root = Path::new("/var/lib/husk/containers/a/rootfs");
        assert_eq!(
            resolve_in_rootfs(root, Path::new("/dev/null")),
            root.join("dev/null")
        );
        assert_eq!(resolve_in_rootfs(root, Path::new("tmp")), root.join("tmp"));
    }

    #[test]
    fn paths_under_rootfs_are_kept() {
        let root = Path::new("/r");
        assert_eq!(
            resolve_in_rootfs(root, Path::new("/r/proc")),
            PathBuf::from("/r/proc")
        );
    }

    #[test]
    fn parent_components_cannot_escape() {
        let root = Path::new("/r");
        assert_eq!(
            resolve_in_rootfs(root, Path::new("/../../etc/passwd")),
            PathBuf::from("/r/etc/passwd")
        );
        assert_eq!(
            resolve_in_rootfs(root, Path::new("/a/../b")),
            PathBuf::from("/r/b")
        );
    }
}
