// SPDX-License-Identifier: Apache-2.0

//! The record type delivered to consumers.

use std::time::SystemTime;

/// Non-fatal condition attached to a line record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// The line exceeded the configured maximum size. This record carries one
    /// full-sized fragment; the remainder of the line follows in later
    /// records, the last of which (after the terminator) is unmarked.
    TooLong,
    /// A partial line flushed because its file incarnation closed before the
    /// terminator arrived (deletion or rotation with reopen enabled).
    Partial,
}

/// One line read from the followed file.
#[derive(Debug, Clone)]
pub struct Line {
    /// Content without the trailing newline; a carriage return immediately
    /// before the newline is stripped as well.
    pub text: String,
    /// Byte position in the current file incarnation immediately after this
    /// record: after the terminator for complete lines, after the last
    /// included byte for oversize fragments and flushed partials.
    pub offset: u64,
    /// When the record was produced.
    pub time: SystemTime,
    /// Set for oversize fragments and flushed partials, unset otherwise.
    pub error: Option<LineError>,
}

impl Line {
    pub(crate) fn new(text: String, offset: u64) -> Self {
        Self {
            text,
            offset,
            time: SystemTime::now(),
            error: None,
        }
    }

    pub(crate) fn with_error(text: String, offset: u64, error: LineError) -> Self {
        Self {
            text,
            offset,
            time: SystemTime::now(),
            error: Some(error),
        }
    }
}
