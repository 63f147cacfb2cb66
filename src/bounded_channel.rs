// SPDX-License-Identifier: Apache-2.0

//! Bounded hand-off between the tail engine and its consumer.
//!
//! A thin wrapper over a flume bounded channel. The engine is the single
//! producer and the consumer the single receiver; a full channel blocks the
//! producer rather than dropping lines, which is what makes delivery lossless
//! when the consumer lags. Both async and blocking receives are supported so
//! lines can be drained from a plain OS thread as well as from the runtime.

use flume::r#async::RecvStream;
use flume::{Receiver, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// The receiver was dropped; nothing will ever be delivered again.
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    /// Send one item, waiting for capacity when the channel is full.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_) => Err(SendError::Disconnected),
        }
    }

    /// Blocking send for non-async contexts. Blocks until there is capacity.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        match self.tx.send(item) {
            Ok(()) => Ok(()),
            Err(_) => Err(SendError::Disconnected),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Receive the next item; `None` once the sender is gone and the channel
    /// is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Blocking receive for non-async contexts.
    pub fn recv_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive; `None` when nothing is currently queued.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// View the channel as a [`Stream`](futures::Stream) of items.
    pub fn stream(&self) -> RecvStream<'_, T> {
        self.rx.stream()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}
