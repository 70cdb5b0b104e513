// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-buffer: the bounded, single-writer/many-reader ring buffer (C1)
//! that captures a child process's combined stdout/stderr.
//!
//! Readers call [`RingBuffer::read_from`] with an absolute byte offset and
//! block (with a timeout) until bytes at or past that offset are available,
//! or the buffer is closed. The buffer only ever remembers the last
//! `capacity` bytes ever written; a reader asking for an offset older than
//! that window gets the oldest bytes still held, with `start_offset`
//! reflecting the discard.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

/// Outcome of a [`RingBuffer::read_from`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Bytes are available. `start_offset` is always `>=` the requested
    /// `begin`, and the returned bytes are contiguous with it.
    Data { start_offset: u64, bytes: Vec<u8> },
    /// No new bytes arrived before the deadline; the buffer is still open.
    TimedOut,
    /// The requested range is at or past `total_written` and the buffer is
    /// closed — there will never be more data.
    Closed,
}

struct Inner {
    data: VecDeque<u8>,
    capacity: usize,
    total_written: u64,
    closed: bool,
}

impl Inner {
    fn window_start(&self) -> u64 {
        self.total_written - self.data.len() as u64
    }

    /// Bytes available starting at `effective_begin`, capped at `max_bytes`.
    /// Caller guarantees `effective_begin` is within `[window_start, total_written)`.
    fn slice(&self, effective_begin: u64, max_bytes: usize) -> Vec<u8> {
        let skip = (effective_begin - self.window_start()) as usize;
        self.data.iter().copied().skip(skip).take(max_bytes).collect()
    }
}

/// Bounded circular byte buffer with offset tracking and wait/notify.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl RingBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: VecDeque::with_capacity(capacity.min(1 << 20)),
                capacity,
                total_written: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends bytes from the child's combined output stream. Only the last
    /// `capacity` bytes ever written are retained. Wakes all blocked readers.
    ///
    /// # Panics
    /// Panics if called after [`RingBuffer::close`] — the writer (C4) owns
    /// exactly one append/close sequence and never appends past close.
    pub fn append(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        assert!(!inner.closed, "append after close");
        inner.data.extend(bytes.iter().copied());
        inner.total_written += bytes.len() as u64;
        let capacity = inner.capacity;
        if inner.data.len() > capacity {
            let excess = inner.data.len() - capacity;
            inner.data.drain(..excess);
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Marks the buffer closed: no more appends will ever occur. Wakes all
    /// blocked readers so they observe [`PollOutcome::Closed`] if applicable.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Total bytes ever appended.
    pub fn total_written(&self) -> u64 {
        self.inner.lock().total_written
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Reads up to `max_bytes` starting at or after `begin`, waiting up to
    /// `timeout` for data to arrive if none is currently available.
    pub async fn read_from(&self, begin: u64, max_bytes: usize, timeout: Duration) -> PollOutcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock();
                let effective_begin = begin.max(inner.window_start());
                if effective_begin < inner.total_written {
                    let bytes = inner.slice(effective_begin, max_bytes);
                    return PollOutcome::Data { start_offset: effective_begin, bytes };
                }
                if inner.closed {
                    return PollOutcome::Closed;
                }
            }
            if tokio::time::timeout(timeout, notified).await.is_err() {
                return PollOutcome::TimedOut;
            }
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
