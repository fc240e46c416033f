//! The user-facing receive queue.
//!
//! Payloads delivered by the network worker land here; user threads drain
//! them with `receive_all` / `pop` / `get_last`, optionally blocking. A
//! mutex+condvar pair keeps the blocking semantics available from arbitrary
//! plain threads, with no runtime handle required. Closing the queue (worker
//! exit) wakes every blocked waiter.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A payload as delivered by the worker: decoded already (asynchronous mode)
/// or still raw bytes (synchronous mode).
#[derive(Debug)]
pub(crate) enum Delivery<T> {
    Decoded(T),
    Raw(Vec<u8>),
}

/// The endpoint stopped and nothing is left to drain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueClosed;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct ReceiveQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> ReceiveQueue<T> {
    pub fn new() -> Self {
        ReceiveQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.available.notify_all();
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Everything buffered, oldest to newest. `blocking` waits until at
    /// least one item is available.
    pub fn receive_all(&self, blocking: bool) -> Result<Vec<T>, QueueClosed> {
        let mut state = self.lock();
        if blocking {
            while state.items.is_empty() && !state.closed {
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if state.items.is_empty() && state.closed {
            return Err(QueueClosed);
        }
        Ok(state.items.drain(..).collect())
    }

    /// Up to `max_items` oldest items. `blocking` waits until exactly
    /// `max_items` have been collected (or the queue closes).
    pub fn pop(&self, max_items: usize, blocking: bool) -> Result<Vec<T>, QueueClosed> {
        let mut out = Vec::new();
        let mut state = self.lock();
        loop {
            while blocking && out.len() < max_items && state.items.is_empty() && !state.closed {
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            let take = (max_items - out.len()).min(state.items.len());
            out.extend(state.items.drain(..take));
            if !blocking || out.len() >= max_items {
                if out.is_empty() && state.closed {
                    return Err(QueueClosed);
                }
                return Ok(out);
            }
            if state.closed {
                if out.is_empty() {
                    return Err(QueueClosed);
                }
                return Ok(out);
            }
        }
    }

    /// Up to `max_items` newest items (oldest-to-newest among them); older
    /// items stay buffered. `blocking` waits until at least one item is
    /// available.
    pub fn take_last(&self, max_items: usize, blocking: bool) -> Result<Vec<T>, QueueClosed> {
        let mut state = self.lock();
        if blocking {
            while state.items.is_empty() && !state.closed {
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if state.items.is_empty() && state.closed {
            return Err(QueueClosed);
        }
        let keep = state.items.len().saturating_sub(max_items);
        Ok(state.items.split_off(keep).into())
    }
}
