// SPDX-License-Identifier: Apache-2.0

//! Symlink target polling.
//!
//! When the followed path, or any ancestor of it, is a symbolic link,
//! rotation can retarget the link without a single kernel event reaching the
//! file itself. The poller stats the deepest symlinked prefix on a fixed
//! cadence and fires once when the target's inode no longer matches the one
//! captured at start. Inodes, not readlink text: rename-based rotation can
//! leave the text looking unchanged.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Deepest prefix of `path` that is a symbolic link, checking the path
/// itself first and then each ancestor.
pub(crate) fn symlink_prefix(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(prefix) = current {
        if prefix.as_os_str().is_empty() {
            break;
        }
        if let Ok(meta) = std::fs::symlink_metadata(prefix) {
            if meta.file_type().is_symlink() {
                return Some(prefix.to_path_buf());
            }
        }
        current = prefix.parent();
    }
    None
}

/// Inode of the file `path` currently resolves to, following symlinks.
#[cfg(unix)]
pub(crate) fn target_inode(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(std::fs::metadata(path)?.ino())
}

#[cfg(not(unix))]
pub(crate) fn target_inode(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink target polling needs unix file metadata",
    ))
}

/// Spawn the poller for `link`. The returned channel carries at most one
/// message: the link now resolves to a different inode than it did at start.
///
/// A rotation window can leave the link dangling; stat failures retry at the
/// same cadence until the target reappears or the token cancels. The poller
/// never gives up on its own.
pub(crate) fn spawn_poller(
    link: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let captured = loop {
            match target_inode(&link) {
                Ok(ino) => break ino,
                Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                    debug!(link = %link.display(), "symlink polling unsupported on this platform");
                    return;
                }
                Err(e) => {
                    debug!(link = %link.display(), error = %e, "symlink target unresolved, retrying");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(interval) => {}
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(interval) => {}
            }
            if tx.is_closed() {
                // the watcher this poller reports to is gone
                return;
            }
            match target_inode(&link) {
                Ok(ino) if ino != captured => {
                    debug!(link = %link.display(), "symlink target changed");
                    let _ = tx.send(()).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(link = %link.display(), error = %e, "symlink target missing, retrying");
                }
            }
        }
    });

    rx
}
