// SPDX-License-Identifier: Apache-2.0

//! The tail engine.
//!
//! One task per followed file. It owns the reader and the watcher, walks the
//! session through its states (opening the file, reading to EOF, parking
//! until something changes, reopening across rotation) and pushes line
//! records into the bounded consumer channel. A single cancellation token,
//! cloned into every helper task, makes `stop` take effect at the next
//! suspension point.
//!
//! Ordering is the load-bearing guarantee: lines of one file incarnation are
//! delivered in offset order, and the old incarnation is drained to
//! exhaustion before the first line of its replacement.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::line::Line;
use crate::position::Checkpointer;
use crate::reader::LineReader;
use crate::watcher::{self, Change, FileChanges};

/// How long to wait before asking a denying rate limiter again.
const RATE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A running tail session.
///
/// Created by [`Tail::new`]; lines arrive through [`Tail::recv`] (or the
/// receiver behind [`Tail::lines`]). The channel closes when the session
/// ends; [`Tail::err`] tells a failed session apart from a finished one.
pub struct Tail {
    lines: BoundedReceiver<Line>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    err: Arc<OnceLock<Error>>,
    path: PathBuf,
}

impl Tail {
    /// Start following `path`.
    ///
    /// With `must_exist` set, a missing file fails here; otherwise the
    /// session waits for the file to be created. Must be called from within
    /// a tokio runtime.
    pub async fn new(path: impl AsRef<Path>, config: Config) -> Result<Tail> {
        config.validate().map_err(Error::Config)?;
        let path = std::path::absolute(path.as_ref())?;

        if config.must_exist && !path.exists() {
            return Err(Error::FileNotFound(path));
        }

        let (lines_tx, lines_rx) = bounded_channel::bounded(config.buffer_size);
        let cancel = CancellationToken::new();
        let err = Arc::new(OnceLock::new());
        let checkpoint = Checkpointer::new(config.pos_file.clone());

        let engine = Engine {
            path: path.clone(),
            config,
            lines_tx,
            cancel: cancel.clone(),
            checkpoint,
            initial_open: true,
        };
        let handle = tokio::spawn(engine.run(err.clone()));

        Ok(Tail {
            lines: lines_rx,
            cancel,
            handle: Some(handle),
            err,
            path,
        })
    }

    /// The path being followed, cleaned and absolute.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive the next line; `None` once the session has ended and all
    /// delivered lines were consumed.
    pub async fn recv(&mut self) -> Option<Line> {
        self.lines.next().await
    }

    /// Direct access to the line channel, e.g. to drain it from a blocking
    /// thread or as a stream.
    pub fn lines(&mut self) -> &mut BoundedReceiver<Line> {
        &mut self.lines
    }

    /// Initiate cooperative shutdown. Returns immediately; idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Block until the engine task has exited and every resource is
    /// released. Safe to call more than once.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(file = %self.path.display(), error = %e, "tail task did not exit cleanly");
            }
        }
    }

    /// The terminal error, if the session failed. Meaningful once the line
    /// channel has closed (or after [`Tail::wait`]).
    pub fn err(&self) -> Option<&Error> {
        self.err.get()
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How the engine left its main loop.
enum Exit {
    /// Normal completion: EOF without follow, terminal deletion, or the
    /// consumer went away.
    Finished,
    Cancelled,
    Fatal(Error),
}

/// Outcome of one file incarnation.
enum Step {
    /// The incarnation is over; establish a new reader at offset zero.
    Reopen,
    Finish,
    Cancel,
    Fail(Error),
}

struct Engine {
    path: PathBuf,
    config: Config,
    lines_tx: BoundedSender<Line>,
    cancel: CancellationToken,
    checkpoint: Checkpointer,
    initial_open: bool,
}

impl Engine {
    async fn run(mut self, err_slot: Arc<OnceLock<Error>>) {
        info!(file = %self.path.display(), follow = self.config.follow, "tail started");

        let exit = self.follow_loop().await;
        self.checkpoint.flush();
        // fan the shutdown out to the watcher and symlink poller tasks
        self.cancel.cancel();

        match exit {
            Exit::Fatal(e) => {
                error!(file = %self.path.display(), error = %e, "tail failed");
                let _ = err_slot.set(e);
            }
            Exit::Finished | Exit::Cancelled => {}
        }
        info!(file = %self.path.display(), "tail stopped");
        // dropping self closes the line channel, which is the termination
        // signal the consumer sees
    }

    async fn follow_loop(&mut self) -> Exit {
        let mut start = self.initial_seek();

        loop {
            let mut reader = match self.open_reader(start).await {
                Ok(reader) => reader,
                Err(exit) => return exit,
            };
            self.initial_open = false;

            // deliver what is already there; this also anchors the watcher's
            // truncation baseline at the offset the engine has examined
            if let Err(step) = self.drain(&mut reader).await {
                return match step {
                    Step::Cancel => Exit::Cancelled,
                    Step::Fail(e) => Exit::Fatal(e),
                    Step::Finish | Step::Reopen => Exit::Finished,
                };
            }

            if !self.config.follow {
                return Exit::Finished;
            }

            let mut changes = match watcher::start(
                &self.path,
                reader.offset(),
                &self.config,
                self.cancel.clone(),
            ) {
                Ok(changes) => changes,
                Err(e) => {
                    // the file can vanish between the open and the watch
                    if !self.path.exists() {
                        if !self.config.reopen {
                            return Exit::Finished;
                        }
                        debug!(file = %self.path.display(), "file vanished before the watch, reopening");
                        start = SeekFrom::Start(0);
                        continue;
                    }
                    return Exit::Fatal(e);
                }
            };

            match self.read_incarnation(&mut reader, &mut changes).await {
                Step::Reopen => {
                    start = SeekFrom::Start(0);
                }
                Step::Finish => return Exit::Finished,
                Step::Cancel => return Exit::Cancelled,
                Step::Fail(e) => return Exit::Fatal(e),
            }
        }
    }

    /// Where the very first incarnation starts: a restored position when the
    /// sidecar has one, the configured location otherwise.
    fn initial_seek(&self) -> SeekFrom {
        if let Some(offset) = self.checkpoint.restore() {
            if offset > 0 {
                debug!(file = %self.path.display(), offset, "resuming from persisted position");
                return SeekFrom::Start(offset);
            }
        }
        self.config.location.to_seek_from()
    }

    /// Opening and Reopening: open the file at `start`, waiting for it to
    /// appear when it is not there yet.
    async fn open_reader(&mut self, mut start: SeekFrom) -> std::result::Result<LineReader, Exit> {
        loop {
            match LineReader::open(
                &self.path,
                start,
                self.config.read_buffer_size,
                self.config.max_line_size,
            ) {
                Ok(reader) => return Ok(reader),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if self.initial_open && self.config.must_exist {
                        return Err(Exit::Fatal(Error::FileNotFound(self.path.clone())));
                    }
                    debug!(file = %self.path.display(), "file absent, waiting for creation");
                    match watcher::wait_until_exists(&self.path, &self.config, &self.cancel).await
                    {
                        Ok(true) => {
                            // whatever the configured location was, a file
                            // that appeared just now is read from the top
                            start = SeekFrom::Start(0);
                        }
                        Ok(false) => return Err(Exit::Cancelled),
                        Err(e) => return Err(Exit::Fatal(e)),
                    }
                }
                Err(e) => return Err(Exit::Fatal(e.into())),
            }
        }
    }

    /// Reading and WaitingForGrowth for one file incarnation.
    async fn read_incarnation(
        &mut self,
        reader: &mut LineReader,
        changes: &mut FileChanges,
    ) -> Step {
        loop {
            if let Err(step) = self.drain(reader).await {
                return step;
            }

            // quiesce: coalesced checkpoints hit disk before parking
            self.checkpoint.flush();

            let change = tokio::select! {
                _ = self.cancel.cancelled() => return Step::Cancel,
                change = changes.next() => change,
            };

            match change {
                Some(Change::Modified) => {}
                Some(Change::Truncated) => {
                    debug!(file = %self.path.display(), "file truncated, restarting from the top");
                    match LineReader::open(
                        &self.path,
                        SeekFrom::Start(0),
                        self.config.read_buffer_size,
                        self.config.max_line_size,
                    ) {
                        Ok(fresh) => *reader = fresh,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            return self.close_incarnation(reader, true, "file deleted").await;
                        }
                        Err(e) => return Step::Fail(e.into()),
                    }
                }
                Some(Change::Deleted) => {
                    // the descriptor outlives the name; pick up what was
                    // written before the deletion was noticed
                    if let Err(step) = self.drain(reader).await {
                        return step;
                    }
                    return self.close_incarnation(reader, true, "file deleted").await;
                }
                Some(Change::SymlinkChanged) => {
                    if let Err(step) = self.drain(reader).await {
                        return step;
                    }
                    return self.close_incarnation(reader, false, "symlink retargeted").await;
                }
                None => {
                    if self.cancel.is_cancelled() {
                        return Step::Cancel;
                    }
                    return Step::Fail(Error::Bus("watcher stopped unexpectedly".to_string()));
                }
            }
        }
    }

    /// The incarnation ended. When the file was deleted under the reopen
    /// policy, its unterminated tail is flushed as a partial record before
    /// the descriptor closes; in every other case the carry is discarded.
    async fn close_incarnation(
        &mut self,
        reader: &mut LineReader,
        flush_partial: bool,
        why: &str,
    ) -> Step {
        if !self.config.reopen {
            debug!(file = %self.path.display(), "{why}, stopping");
            return Step::Finish;
        }
        debug!(file = %self.path.display(), "{why}, reopening");
        if flush_partial {
            if let Some(partial) = reader.take_partial() {
                if let Err(step) = self.deliver(partial).await {
                    return step;
                }
            }
        }
        Step::Reopen
    }

    /// Deliver every line currently available, stopping at EOF.
    async fn drain(&mut self, reader: &mut LineReader) -> std::result::Result<(), Step> {
        loop {
            match reader.next_line() {
                Ok(Some(line)) => self.deliver(line).await?,
                Ok(None) => return Ok(()),
                Err(e) => return Err(Step::Fail(e.into())),
            }
        }
    }

    /// Hand one line to the consumer: consult the rate limiter, send with
    /// backpressure, then checkpoint the delivered offset.
    async fn deliver(&mut self, line: Line) -> std::result::Result<(), Step> {
        if let Some(limiter) = &self.config.rate_limit {
            while !limiter.allow() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Step::Cancel),
                    _ = time::sleep(RATE_RETRY_INTERVAL) => {}
                }
            }
        }

        let offset = line.offset;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Step::Cancel),
            sent = self.lines_tx.send(line) => match sent {
                Ok(()) => {
                    self.checkpoint.record(offset);
                    Ok(())
                }
                Err(_) => {
                    debug!(file = %self.path.display(), "consumer dropped the line stream");
                    Err(Step::Finish)
                }
            }
        }
    }
}
