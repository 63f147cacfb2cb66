// SPDX-License-Identifier: Apache-2.0

//! Stat-polling watcher.
//!
//! Fallback for environments where kernel notifications are unavailable or
//! unreliable (network file systems, mainly). A periodic stat of the file
//! synthesizes the same semantic notifications the kernel-event watcher
//! produces, from size and existence deltas alone.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::watcher::changes::{FileChanges, change_channel};
use crate::watcher::{recv_opt, symlink};

pub(crate) fn spawn(
    path: PathBuf,
    committed_size: u64,
    interval: Duration,
    cancel: CancellationToken,
) -> FileChanges {
    let mut symlink_rx = symlink::symlink_prefix(&path).map(|link| {
        debug!(file = %path.display(), link = %link.display(), "polling symlink target");
        symlink::spawn_poller(link, interval, cancel.clone())
    });

    let (notifier, changes) = change_channel();

    tokio::spawn(async move {
        let mut size = committed_size;
        let mut symlink_changed = false;
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                fired = recv_opt(&mut symlink_rx) => {
                    match fired {
                        Some(()) => {
                            symlink_changed = true;
                            break;
                        }
                        // poller exited without firing; park this arm for good
                        None => symlink_rx = None,
                    }
                }

                _ = ticker.tick() => {
                    match std::fs::metadata(&path) {
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            notifier.deleted();
                            break;
                        }
                        Err(e) => {
                            debug!(file = %path.display(), error = %e, "stat failed, retrying");
                        }
                        Ok(meta) => {
                            let new_size = meta.len();
                            if new_size < size {
                                notifier.truncated();
                                size = new_size;
                            } else if new_size > size {
                                notifier.modified();
                                size = new_size;
                            }
                        }
                    }
                }
            }
        }

        if symlink_changed {
            notifier.symlink_changed();
        }
        debug!(file = %path.display(), "poll watcher stopped");
    });

    changes
}
