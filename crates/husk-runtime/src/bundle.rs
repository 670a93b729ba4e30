//! Copying a bundle into a container entry.
//!
//! The container gets its own `config.json` and rootfs so later
//! invocations never depend on the bundle directory staying in place.

use std::os::unix::fs::{MetadataExt, PermissionsExt, lchown, symlink};
use std::path::Path;

use husk_common::constants::CONFIG_FILE;
use husk_common::error::{HuskError, Result};

/// Copies `<bundle>/config.json` to `<dir>/config.json`.
///
/// # Errors
///
/// Returns [`HuskError::Io`] if the copy fails.
pub fn copy_config(bundle: &Path, dir: &Path) -> Result<()> {
    let src = bundle.join(CONFIG_FILE);
    let dst = dir.join(CONFIG_FILE);
    let _ = std::fs::copy(&src, &dst).map_err(|e| HuskError::io(&src, e))?;
    Ok(())
}

/// Recursively copies the tree at `src` to `dst`.
///
/// Directories, regular files and symlinks are copied with their mode.
/// Ownership is preserved when running as root. Device nodes, sockets and
/// FIFOs are skipped; devices are created by the launcher.
///
/// # Errors
///
/// Returns [`HuskError::Io`] naming the first entry that fails.
pub fn copy_rootfs(src: &Path, dst: &Path) -> Result<()> {
    let preserve_owner = nix::unistd::geteuid().is_root();
    copy_tree(src, dst, preserve_owner)?;
    tracing::info!(src = %src.display(), dst = %dst.display(), "rootfs copied");
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path, preserve_owner: bool) -> Result<()> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| HuskError::io(src, e))?;
    if !meta.is_dir() {
        return Err(HuskError::validation(format!(
            "rootfs {} is not a directory",
            src.display()
        )));
    }
    std::fs::create_dir_all(dst).map_err(|e| HuskError::io(dst, e))?;

    let entries = std::fs::read_dir(src).map_err(|e| HuskError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HuskError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&from).map_err(|e| HuskError::io(&from, e))?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            copy_tree(&from, &to, preserve_owner)?;
        } else if file_type.is_file() {
            let _ = std::fs::copy(&from, &to).map_err(|e| HuskError::io(&from, e))?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&from).map_err(|e| HuskError::io(&from, e))?;
            symlink(&target, &to).map_err(|e| HuskError::io(&to, e))?;
        } else {
            tracing::debug!(path = %from.display(), "skipping special file");
            continue;
        }

        if preserve_owner {
            lchown(&to, Some(meta.uid()), Some(meta.gid())).map_err(|e| HuskError::io(&to, e))?;
        }
        if !file_type.is_symlink() {
            std::fs::set_permissions(&to, std::fs::Permissions::from_mode(meta.mode() & 0o7777))
                .map_err(|e| HuskError::io(&to, e))?;
        }
    }

    let root_mode = meta.mode() & 0o7777;
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(root_mode))
        .map_err(|e| HuskError::io(dst, e))
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn copies_files_dirs_and_symlinks() {
        let src = tempfile::tempdir().expect("src");
        let dst = tempfile::tempdir().expect("dst");
        let dst_root = dst.path().join("rootfs");

        std::fs::create_dir_all(src.path().join("bin")).expect("mkdir");
        std::fs::write(src.path().join("bin/app"), b"#!/bin/sh\n").expect("write");
        std::fs::set_permissions(
            src.path().join("bin/app"),
            std::fs::Permissions::from_mode(0o755),
        )
        .expect("chmod");
        symlink("bin/app", src.path().join("entry")).expect("symlink");

        copy_rootfs(src.path(), &dst_root).expect("copy");

        let app = dst_root.join("bin/app");
        assert_eq!(std::fs::read(&app).expect("read"), b"#!/bin/sh\n");
        let mode = std::fs::metadata(&app).expect("meta").mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(
            std::fs::read_link(dst_root.join("entry")).expect("readlink"),
            Path::new("bin/app")
        );
    }

    #[test]
    fn skips_sockets() {
        let src = tempfile::tempdir().expect("src");
        let dst = tempfile::tempdir().expect("dst");
        let _listener = UnixListener::bind(src.path().join("sock")).expect("bind");

        copy_rootfs(src.path(), &dst.path().join("rootfs")).expect("copy");
        assert!(!dst.path().join("rootfs/sock").exists());
    }

    #[test]
    fn missing_rootfs_is_an_error() {
        let dst = tempfile::tempdir().expect("dst");
        assert!(copy_rootfs(&dst.path().join("absent"), &dst.path().join("rootfs")).is_err());
    }

    #[test]
    fn config_is_copied_next_to_state() {
        let bundle = tempfile::tempdir().expect("bundle");
        let dir = tempfile::tempdir().expect("dir");
        std::fs::write(bundle.path().join(CONFIG_FILE), b"{}").expect("write");
        copy_config(bundle.path(), dir.path()).expect("copy");
        assert_eq!(std::fs::read(dir.path().join(CONFIG_FILE)).expect("read"), b"{}");
    }
}
