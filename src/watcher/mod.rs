// SPDX-License-Identifier: Apache-2.0

//! Per-file change watching.
//!
//! Two strategies behind one contract: the kernel-notification watcher
//! (`native`) reacts to events from the process-wide bus, the stat-polling
//! watcher (`poll`) synthesizes the same notifications from periodic stats.
//! Either way the engine receives a [`FileChanges`] carrying four coalescing
//! slots, and a symlink poller covers retargeting that produces no kernel
//! event at all.

mod changes;
mod native;
mod poll;
mod symlink;

pub(crate) use changes::{Change, FileChanges};

use std::path::Path;

use tokio::sync::mpsc::Receiver;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus;
use crate::config::Config;
use crate::error::{Error, Result};

/// Start watching `path`, reporting changes relative to `committed_size`
/// (the bytes the engine has already examined).
pub(crate) fn start(
    path: &Path,
    committed_size: u64,
    config: &Config,
    cancel: CancellationToken,
) -> Result<FileChanges> {
    if config.poll {
        debug!(file = %path.display(), "watching by stat polling");
        Ok(poll::spawn(
            path.to_path_buf(),
            committed_size,
            config.poll_interval,
            cancel,
        ))
    } else {
        native::spawn(
            path.to_path_buf(),
            committed_size,
            config.poll_interval,
            cancel,
        )
    }
}

/// Park until `path` exists. Returns `Ok(false)` when cancelled first.
pub(crate) async fn wait_until_exists(
    path: &Path,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<bool> {
    if config.poll {
        loop {
            if path.exists() {
                return Ok(true);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = time::sleep(config.poll_interval) => {}
            }
        }
    }

    let bus = bus::shared()?;
    bus.watch_create(path)?;
    let result = await_creation(path, config.poll_interval, cancel).await;
    if let Err(e) = bus.remove_watch_create(path) {
        debug!(file = %path.display(), error = %e, "failed to release creation watch");
    }
    result
}

async fn await_creation(
    path: &Path,
    recheck: std::time::Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    let bus = bus::shared()?;
    let mut events = bus.events(path)?;

    // the file may have appeared before the watch was in place
    if path.exists() {
        return Ok(true);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            event = events.recv() => {
                if event.is_none() {
                    return Err(Error::Bus("event stream closed".to_string()));
                }
                if path.exists() {
                    return Ok(true);
                }
            }
            // a dangling symlink resolves through another directory, where
            // its target can appear without an event here; re-stat on a
            // timer so that window cannot wedge the reopen
            _ = time::sleep(recheck) => {
                if path.exists() {
                    return Ok(true);
                }
            }
        }
    }
}

/// Await on an optional channel; pends forever when there is none, so a
/// watcher without a symlink poller can keep the same `select!` shape.
async fn recv_opt(rx: &mut Option<Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
