// SPDX-License-Identifier: Apache-2.0

//! Kernel-notification watcher.
//!
//! One task per watched file. Bus events report that the file was written,
//! removed or renamed; the symlink poller (when the path crosses a symlink)
//! reports that the link was retargeted. The task reduces those inputs to
//! the four semantic notifications the engine consumes, tracking the size
//! the engine has committed to having examined so that shrinkage shows up
//! as truncation.

use std::path::PathBuf;
use std::time::Duration;

use notify::EventKind;
use notify::event::ModifyKind;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus;
use crate::error::Result;
use crate::watcher::changes::{FileChanges, change_channel};
use crate::watcher::{recv_opt, symlink};

pub(crate) fn spawn(
    path: PathBuf,
    committed_size: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Result<FileChanges> {
    let bus = bus::shared()?;
    bus.watch(&path)?;
    let mut events = match bus.events(&path) {
        Ok(rx) => rx,
        Err(e) => {
            let _ = bus.remove_watch(&path);
            return Err(e);
        }
    };

    let mut symlink_rx = symlink::symlink_prefix(&path).map(|link| {
        debug!(file = %path.display(), link = %link.display(), "polling symlink target");
        symlink::spawn_poller(link, poll_interval, cancel.clone())
    });

    let (notifier, changes) = change_channel();

    tokio::spawn(async move {
        let mut size = committed_size;
        let mut symlink_changed = false;

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

                event = events.recv() => {
                    let Some(event) = event else { break };
                    match classify(&event.kind) {
                        Classified::Gone => {
                            notifier.deleted();
                            break;
                        }
                        Classified::Written => {
                            match std::fs::metadata(&path) {
                                Err(_) => {
                                    notifier.deleted();
                                    break;
                                }
                                Ok(meta) => {
                                    let new_size = meta.len();
                                    if new_size < size {
                                        notifier.truncated();
                                    } else {
                                        notifier.modified();
                                    }
                                    size = new_size;
                                }
                            }
                        }
                        Classified::Ignored => {}
                    }
                }
            }
        }

        if let Err(e) = bus.remove_watch(&path) {
            debug!(file = %path.display(), error = %e, "failed to release watch");
        }
        // may be the only notification this watcher ever publishes
        if symlink_changed {
            notifier.symlink_changed();
        }
        debug!(file = %path.display(), "watcher stopped");
    });

    Ok(changes)
}

enum Classified {
    /// Content may have changed; stat decides between grown and truncated.
    Written,
    /// Removed or renamed away; the watched incarnation is over.
    Gone,
    Ignored,
}

fn classify(kind: &EventKind) -> Classified {
    match kind {
        EventKind::Remove(_) => Classified::Gone,
        EventKind::Modify(ModifyKind::Name(_)) => Classified::Gone,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => Classified::Written,
        _ => Classified::Ignored,
    }
}
