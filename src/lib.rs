// SPDX-License-Identifier: Apache-2.0

//! Follow a growing file as an ordered stream of lines.
//!
//! The functional equivalent of `tail -F`, as a library: a [`Tail`] session
//! watches one file through kernel notifications (or stat polling), survives
//! rotation, truncation and symlink retargeting, and delivers every line
//! exactly once per file incarnation, in offset order, over a bounded
//! channel with backpressure. With a position file configured, a restarted
//! session resumes where the previous one stopped.
//!
//! # Example
//!
//! ```rust,no_run
//! use linetail::{Config, Tail};
//!
//! #[tokio::main]
//! async fn main() -> linetail::Result<()> {
//!     let mut tail = Tail::new("/var/log/app.log", Config::default()).await?;
//!
//!     while let Some(line) = tail.recv().await {
//!         println!("{} @{}", line.text, line.offset);
//!     }
//!
//!     // the channel closed: finished or failed?
//!     if let Some(e) = tail.err() {
//!         eprintln!("tail failed: {e}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod bounded_channel;
pub mod config;

mod bus;
mod error;
mod line;
mod position;
mod reader;
mod tail;
mod watcher;

pub use config::{Config, RateLimiter, SeekInfo, SeekOrigin};
pub use error::{Error, Result};
pub use line::{Line, LineError};
pub use tail::Tail;
