// SPDX-License-Identifier: Apache-2.0

//! Crash-safe position persistence.
//!
//! The sidecar file holds the decimal byte offset of the last line handed to
//! the consumer. Writes go to a uniquely named temp file in the same
//! directory, are fsynced, then renamed over the target, so a torn write is
//! never observable. The checkpointer batches per-line updates inside a
//! short window; termination paths flush whatever is pending.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How long per-line updates may coalesce before they must hit disk.
const COALESCE_WINDOW: Duration = Duration::from_millis(200);

pub(crate) struct PositionFile {
    path: PathBuf,
}

impl PositionFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Offset recorded by a previous run. Missing or empty files mean start
    /// from zero; so does unparseable content, with a warning, rather than
    /// refusing to tail.
    pub fn load(&self) -> io::Result<u64> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let digits: String = content.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            if !content.trim().is_empty() {
                warn!(
                    pos_file = %self.path.display(),
                    "position file is not a decimal offset, starting from zero"
                );
            }
            return Ok(0);
        }

        digits.parse::<u64>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("offset out of range: {e}"))
        })
    }

    /// Atomically replace the recorded offset.
    pub fn store(&self, offset: u64) -> io::Result<()> {
        // unique temp name: concurrent sessions sharing a directory must not
        // trample each other's in-flight writes
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_path = self
            .path
            .with_extension(format!("tmp.{}.{}", std::process::id(), unique));

        let mut file = File::create(&temp_path)?;
        file.write_all(offset.to_string().as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Per-line checkpointing with write coalescing.
///
/// `record` is called after every delivered line; it writes through at most
/// once per window and stashes the rest. `flush` writes the stashed offset
/// and is called when the engine parks or terminates. Store failures are
/// logged and retried on the next checkpoint; they never stop the tail.
pub(crate) struct Checkpointer {
    file: Option<PositionFile>,
    last_write: Instant,
    pending: Option<u64>,
}

impl Checkpointer {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            file: path.map(PositionFile::new),
            last_write: Instant::now() - COALESCE_WINDOW,
            pending: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Starting offset recovered from the sidecar, when persistence is on.
    pub fn restore(&self) -> Option<u64> {
        let file = self.file.as_ref()?;
        match file.load() {
            Ok(offset) => Some(offset),
            Err(e) => {
                warn!(error = %e, "failed to read position file, starting from zero");
                Some(0)
            }
        }
    }

    pub fn record(&mut self, offset: u64) {
        let Some(file) = &self.file else { return };

        if self.last_write.elapsed() >= COALESCE_WINDOW {
            if let Err(e) = file.store(offset) {
                warn!(error = %e, "failed to write position file");
                self.pending = Some(offset);
                return;
            }
            self.last_write = Instant::now();
            self.pending = None;
        } else {
            self.pending = Some(offset);
        }
    }

    pub fn flush(&mut self) {
        let Some(file) = &self.file else { return };
        let Some(offset) = self.pending.take() else { return };

        if let Err(e) = file.store(offset) {
            warn!(error = %e, "failed to flush position file");
            self.pending = Some(offset);
            return;
        }
        self.last_write = Instant::now();
        debug!(offset, "position flushed");
    }
}
