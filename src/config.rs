// SPDX-License-Identifier: Apache-2.0

//! Configuration for a tail session.

use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Reference point for the initial read position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Relative to the beginning of the file.
    #[default]
    Start,
    /// Relative to the current position (equivalent to `Start` on a fresh
    /// open; accepted for completeness).
    Current,
    /// Relative to the end of the file. Use a zero offset to follow only
    /// lines appended after the session begins.
    End,
}

/// Where to begin reading. Only consulted once, when the first file
/// incarnation is opened; after that the engine tracks absolute offsets
/// itself, and a restored position file takes precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekInfo {
    pub offset: i64,
    pub origin: SeekOrigin,
}

impl SeekInfo {
    /// Read from an absolute byte offset.
    pub fn start(offset: u64) -> Self {
        Self {
            offset: offset as i64,
            origin: SeekOrigin::Start,
        }
    }

    /// Read only lines appended from now on.
    pub fn end() -> Self {
        Self {
            offset: 0,
            origin: SeekOrigin::End,
        }
    }

    pub(crate) fn to_seek_from(self) -> SeekFrom {
        match self.origin {
            SeekOrigin::Start => SeekFrom::Start(self.offset.max(0) as u64),
            SeekOrigin::Current => SeekFrom::Current(self.offset),
            SeekOrigin::End => SeekFrom::End(self.offset),
        }
    }
}

/// An opaque "may I send one line now?" gate consulted before each delivery.
///
/// When `allow` returns false the engine pauses emission and asks again
/// shortly; lines are never dropped. Implementations live outside this crate
/// and must be cheap to call.
pub trait RateLimiter: fmt::Debug + Send + Sync {
    fn allow(&self) -> bool;
}

/// Configuration for [`Tail`](crate::Tail).
///
/// The defaults follow a file forever, reopening through rotation, starting
/// at the beginning, with no position persistence.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the outbound line channel. The engine blocks on a full
    /// channel rather than dropping lines.
    pub buffer_size: usize,
    /// Hard cap on a single line. Longer lines are split into fragments
    /// marked [`LineError::TooLong`](crate::LineError::TooLong).
    pub max_line_size: usize,
    /// Size of the reader's fixed I/O buffer.
    pub read_buffer_size: usize,
    /// Keep waiting for growth at EOF. When false, the session ends once the
    /// currently available lines have been delivered.
    pub follow: bool,
    /// Re-establish the reader after the file is deleted, renamed away, or a
    /// symlink in its path is retargeted. When false those events end the
    /// session.
    pub reopen: bool,
    /// Use periodic stat instead of kernel notifications.
    pub poll: bool,
    /// Cadence of the stat loop in poll mode, and of the symlink target
    /// poller in either mode.
    pub poll_interval: Duration,
    /// Fail immediately if the file does not exist at start. When false the
    /// session waits for the file to be created.
    pub must_exist: bool,
    /// Sidecar file persisting the offset of the last delivered line.
    /// `None` disables persistence.
    pub pos_file: Option<PathBuf>,
    /// Initial read position. Ignored when `pos_file` names a readable,
    /// non-empty position record.
    pub location: SeekInfo,
    /// Optional delivery gate; see [`RateLimiter`].
    pub rate_limit: Option<Arc<dyn RateLimiter>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            max_line_size: 1024 * 1024,
            read_buffer_size: 4096,
            follow: true,
            reopen: true,
            poll: false,
            poll_interval: Duration::from_secs(1),
            must_exist: false,
            pos_file: None,
            location: SeekInfo::default(),
            rate_limit: None,
        }
    }
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be at least 1".to_string());
        }
        if self.max_line_size == 0 {
            return Err("max_line_size must be at least 1".to_string());
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be non-zero".to_string());
        }
        Ok(())
    }
}
