//! Priority-banded queue of pending acquire requests

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::context::BorrowContext;
use crate::error::Error;

/// A pending acquire: the completion channel, the caller's captured context,
/// and an arrival sequence number that breaks ties within a band.
pub(crate) struct Waiter<T> {
    pub(crate) tx: oneshot::Sender<Result<T, Error>>,
    pub(crate) ctx: BorrowContext,
    pub(crate) seq: u64,
}

/// FIFO queues indexed by priority band; band 0 is served first.
pub(crate) struct WaiterQueue<T> {
    bands: Vec<VecDeque<Waiter<T>>>,
    len: usize,
    next_seq: u64,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new(bands: usize) -> Self {
        Self {
            bands: (0..bands.max(1)).map(|_| VecDeque::new()).collect(),
            len: 0,
            next_seq: 0,
        }
    }

    /// Enqueue a waiter. Out-of-range priorities clamp to the lowest band.
    pub(crate) fn push(
        &mut self,
        priority: usize,
        tx: oneshot::Sender<Result<T, Error>>,
        ctx: BorrowContext,
    ) {
        let band = priority.min(self.bands.len() - 1);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.bands[band].push_back(Waiter { tx, ctx, seq });
        self.len += 1;
    }

    /// Dequeue the highest-priority, oldest waiter.
    pub(crate) fn pop(&mut self) -> Option<Waiter<T>> {
        for band in &mut self.bands {
            if let Some(waiter) = band.pop_front() {
                self.len -= 1;
                return Some(waiter);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Complete every queued waiter with an error, in priority order.
    pub(crate) fn flush_with(&mut self, mut error: impl FnMut() -> Error) {
        while let Some(waiter) = self.pop() {
            let _ = waiter.tx.send(Err(error()));
        }
    }
}
