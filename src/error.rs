// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

/// Errors that terminate a tail session.
///
/// Per-line conditions (oversize lines, flushed partials) are not errors at
/// this level; they ride along on the line record itself. Position-file write
/// failures are logged and retried on the next checkpoint rather than raised.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("watch setup failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("notification bus error: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, Error>;
