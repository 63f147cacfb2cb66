// SPDX-License-Identifier: Apache-2.0

//! Coalescing change notifications.
//!
//! Four independent single-slot channels, one per kind of change. The engine
//! only needs to know that something of each kind happened since it last
//! looked, so publishing is a non-blocking send and a full slot swallows the
//! pulse. This is what keeps the notification path bounded during a write
//! storm.

use tokio::sync::mpsc::{self, Receiver, Sender};

/// One semantic change, as consumed by the tail engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    /// The file grew.
    Modified,
    /// The file shrank or was zeroed.
    Truncated,
    /// The path was removed or renamed away.
    Deleted,
    /// A symlink on the path resolves to a different inode.
    SymlinkChanged,
}

/// Receiving side, consumed by the tail engine.
pub(crate) struct FileChanges {
    pub modified: Receiver<()>,
    pub truncated: Receiver<()>,
    pub deleted: Receiver<()>,
    pub symlink_changed: Receiver<()>,
}

impl FileChanges {
    /// The next change, or `None` once the watcher has exited leaving no
    /// pulse behind.
    ///
    /// The watcher publishes its final `Deleted`/`SymlinkChanged` pulse
    /// before dropping the notifier, so when any slot reports closure the
    /// sweep below still finds the verdict; terminal pulses take priority
    /// over stale growth pulses.
    pub async fn next(&mut self) -> Option<Change> {
        tokio::select! {
            pulse = self.modified.recv() => if pulse.is_some() {
                return Some(Change::Modified);
            },
            pulse = self.truncated.recv() => if pulse.is_some() {
                return Some(Change::Truncated);
            },
            pulse = self.deleted.recv() => if pulse.is_some() {
                return Some(Change::Deleted);
            },
            pulse = self.symlink_changed.recv() => if pulse.is_some() {
                return Some(Change::SymlinkChanged);
            },
        }

        if self.deleted.try_recv().is_ok() {
            return Some(Change::Deleted);
        }
        if self.symlink_changed.try_recv().is_ok() {
            return Some(Change::SymlinkChanged);
        }
        if self.truncated.try_recv().is_ok() {
            return Some(Change::Truncated);
        }
        if self.modified.try_recv().is_ok() {
            return Some(Change::Modified);
        }
        None
    }
}

/// Publishing side, owned by the watcher task.
pub(crate) struct ChangeNotifier {
    modified: Sender<()>,
    truncated: Sender<()>,
    deleted: Sender<()>,
    symlink_changed: Sender<()>,
}

pub(crate) fn change_channel() -> (ChangeNotifier, FileChanges) {
    let (modified_tx, modified) = mpsc::channel(1);
    let (truncated_tx, truncated) = mpsc::channel(1);
    let (deleted_tx, deleted) = mpsc::channel(1);
    let (symlink_tx, symlink_changed) = mpsc::channel(1);

    (
        ChangeNotifier {
            modified: modified_tx,
            truncated: truncated_tx,
            deleted: deleted_tx,
            symlink_changed: symlink_tx,
        },
        FileChanges {
            modified,
            truncated,
            deleted,
            symlink_changed,
        },
    )
}

impl ChangeNotifier {
    pub fn modified(&self) {
        pulse(&self.modified);
    }

    pub fn truncated(&self) {
        pulse(&self.truncated);
    }

    pub fn deleted(&self) {
        pulse(&self.deleted);
    }

    pub fn symlink_changed(&self) {
        pulse(&self.symlink_changed);
    }
}

/// Send only if the slot is empty; an unread pulse absorbs later ones.
fn pulse(tx: &Sender<()>) {
    let _ = tx.try_send(());
}
