// SPDX-License-Identifier: Apache-2.0

//! Process-wide file notification bus.
//!
//! The kernel hands the process a single notification subscription; this
//! registry multiplexes it. An existing file is watched directly (the kernel
//! follows a symlink here, so writes arriving through a link are observed,
//! and self-rename/self-delete reach the watch too); a file that does not
//! exist yet is awaited through a non-recursive watch of its parent
//! directory, whose creation events carry the child path. Either way events
//! are routed to subscribers keyed by the exact path they registered.
//! Kernel watches are reference counted and released when the last
//! interested party unsubscribes. The registry lock is never held across a
//! channel send or a kernel call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::error::{Error, Result};

static SHARED: OnceLock<NotifyBus> = OnceLock::new();

/// Acquire the process-wide bus, creating it on first use.
pub(crate) fn shared() -> Result<&'static NotifyBus> {
    if let Some(bus) = SHARED.get() {
        return Ok(bus);
    }
    let bus = NotifyBus::new()?;
    // a racing initializer may have won; our spare kernel handle drops here
    Ok(SHARED.get_or_init(|| bus))
}

#[derive(Default)]
struct Registry {
    /// Event subscribers keyed by the exact path they are interested in.
    subs: HashMap<PathBuf, Vec<UnboundedSender<Event>>>,
    /// Reference counts per kernel watch target: the file itself for
    /// existing files, the parent directory for pending creations.
    watch_refs: HashMap<PathBuf, usize>,
}

pub(crate) struct NotifyBus {
    registry: Arc<Mutex<Registry>>,
    watcher: Mutex<RecommendedWatcher>,
}

impl NotifyBus {
    fn new() -> Result<Self> {
        let registry: Arc<Mutex<Registry>> = Arc::new(Mutex::new(Registry::default()));
        let dispatch = registry.clone();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => dispatch_event(&dispatch, event),
                Err(e) => warn!(error = %e, "notification backend error"),
            },
            notify::Config::default(),
        )?;

        Ok(Self {
            registry,
            watcher: Mutex::new(watcher),
        })
    }

    /// Subscribe to kernel events for an existing file.
    pub fn watch(&self, path: &Path) -> Result<()> {
        let path = clean(path)?;
        self.add_kernel_watch(&path)
    }

    pub fn remove_watch(&self, path: &Path) -> Result<()> {
        let path = clean(path)?;
        self.drop_subscribers(&path)?;
        self.release_kernel_watch(&path)
    }

    /// Observe the containing directory for the creation of `path`, which
    /// need not exist yet.
    pub fn watch_create(&self, path: &Path) -> Result<()> {
        let path = clean(path)?;
        let dir = parent_of(&path)?;
        self.add_kernel_watch(&dir)
    }

    pub fn remove_watch_create(&self, path: &Path) -> Result<()> {
        let path = clean(path)?;
        let dir = parent_of(&path)?;
        self.drop_subscribers(&path)?;
        self.release_kernel_watch(&dir)
    }

    /// The stream of events routed to exactly `path`. Register after the
    /// matching `watch`/`watch_create` call; senders to dropped receivers
    /// are pruned on dispatch.
    pub fn events(&self, path: &Path) -> Result<UnboundedReceiver<Event>> {
        let path = clean(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock_registry()?;
        registry.subs.entry(path).or_default().push(tx);
        Ok(rx)
    }

    fn add_kernel_watch(&self, target: &Path) -> Result<()> {
        let first = {
            let mut registry = self.lock_registry()?;
            let count = registry.watch_refs.entry(target.to_path_buf()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            debug!(target = %target.display(), "adding kernel watch");
            let watched = self
                .lock_watcher()?
                .watch(target, RecursiveMode::NonRecursive);
            if let Err(e) = watched {
                // roll our count back so a later attempt retries the kernel watch
                if let Ok(mut registry) = self.registry.lock() {
                    match registry.watch_refs.get_mut(target) {
                        Some(count) if *count > 1 => *count -= 1,
                        _ => {
                            registry.watch_refs.remove(target);
                        }
                    }
                }
                return Err(e.into());
            }
        }

        Ok(())
    }

    fn release_kernel_watch(&self, target: &Path) -> Result<()> {
        let last = {
            let mut registry = self.lock_registry()?;
            match registry.watch_refs.get_mut(target) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    registry.watch_refs.remove(target);
                    true
                }
                None => false,
            }
        };

        if last {
            debug!(target = %target.display(), "releasing kernel watch");
            // the kernel drops file watches on its own when the file is
            // deleted, so a failure here is expected noise
            if let Err(e) = self.lock_watcher()?.unwatch(target) {
                debug!(target = %target.display(), error = %e, "unwatch failed");
            }
        }

        Ok(())
    }

    fn drop_subscribers(&self, path: &Path) -> Result<()> {
        let mut registry = self.lock_registry()?;
        if let Some(senders) = registry.subs.get_mut(path) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                registry.subs.remove(path);
            }
        }
        Ok(())
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| Error::Bus("registry lock poisoned".to_string()))
    }

    fn lock_watcher(&self) -> Result<MutexGuard<'_, RecommendedWatcher>> {
        self.watcher
            .lock()
            .map_err(|_| Error::Bus("watcher lock poisoned".to_string()))
    }

    #[cfg(test)]
    fn watch_ref_count(&self, target: &Path) -> usize {
        self.registry
            .lock()
            .map(|r| r.watch_refs.get(target).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Runs on the notification backend's thread. Interested senders are
/// collected under the lock and the sends happen after it is released.
fn dispatch_event(registry: &Mutex<Registry>, event: Event) {
    let targets: Vec<UnboundedSender<Event>> = {
        let Ok(mut registry) = registry.lock() else {
            return;
        };
        let mut targets = Vec::new();
        for path in &event.paths {
            if let Some(senders) = registry.subs.get_mut(path) {
                senders.retain(|tx| !tx.is_closed());
                targets.extend(senders.iter().cloned());
            }
        }
        targets
    };

    for tx in targets {
        let _ = tx.send(event.clone());
    }
}

fn clean(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn parent_of(path: &Path) -> Result<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Bus(format!("path has no parent directory: {}", path.display())))
}
