use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Accumulates items until either `max_batch_size` is reached or
/// `batch_timeout` has passed since the last flush.
pub(crate) struct BatchBuffer<E> {
    max_batch_size: usize,
    batch_timeout: Duration,
    buffer: Vec<E>,
    last_flush: Instant,
}

impl<E> BatchBuffer<E> {
    pub(crate) fn new(
        max_batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            max_batch_size,
            batch_timeout,
            buffer: Vec::with_capacity(max_batch_size),
            last_flush: Instant::now(),
        }
    }

    /// Returns the buffered count once the batch is full.
    pub(crate) fn push(
        &mut self,
        item: E,
    ) -> Option<usize> {
        self.buffer.push(item);
        trace!(max = self.max_batch_size, len = self.buffer.len(), "BatchBuffer::push");
        if self.buffer.len() >= self.max_batch_size {
            Some(self.buffer.len())
        } else {
            None
        }
    }

    pub(crate) fn should_flush(&self) -> bool {
        !self.buffer.is_empty() && self.last_flush.elapsed() >= self.batch_timeout
    }

    pub(crate) fn take(&mut self) -> Vec<E> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_batch_size))
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
