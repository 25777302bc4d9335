use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

use crate::telemetry::{self, tags};
use crate::types::duration_to_us;
use crate::{LzpipeError, Result};

/// A bounded pool of reusable byte buffers.
///
/// At most `max_buffers` buffers exist at once. Once all of them are checked
/// out, [`acquire`](Self::acquire) blocks until a [`PooledBuffer`] is dropped,
/// which makes the pool a counting semaphore: a producer that outruns its
/// consumer stalls instead of allocating without bound.
///
/// # Example
/// ```
/// use lzpipe_core::BufferPool;
///
/// let pool = BufferPool::new(4096, 2);
/// let mut buffer = pool.acquire().expect("allocation");
/// buffer.extend_from_slice(b"payload");
/// drop(buffer); // returns to the pool
/// assert_eq!(pool.metrics().outstanding, 0);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    recycler: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    buffer_capacity: usize,
    max_buffers: usize,
    metrics: Arc<PoolMetricsInner>,
}

impl BufferPool {
    /// Creates a pool handing out buffers of `buffer_capacity` bytes, at most
    /// `max_buffers` of them at a time.
    pub fn new(buffer_capacity: usize, max_buffers: usize) -> Self {
        let max_buffers = max_buffers.max(1);
        let (tx, rx) = bounded(max_buffers);
        Self {
            recycler: tx,
            receiver: rx,
            buffer_capacity,
            max_buffers,
            metrics: Arc::new(PoolMetricsInner::default()),
        }
    }

    /// Checks out a cleared buffer, blocking while all buffers are in use.
    pub fn acquire(&self) -> Result<PooledBuffer> {
        let started_at = Instant::now();

        let buffer = match self.receiver.try_recv() {
            Ok(buffer) => {
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                if self.reserve_creation_slot() {
                    self.allocate()?
                } else {
                    self.metrics.waits.fetch_add(1, Ordering::Relaxed);
                    let buffer = self.receiver.recv().map_err(|_| {
                        LzpipeError::Allocation("buffer pool recycler disconnected".to_string())
                    })?;
                    self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                    buffer
                }
            }
        };

        let wait_us = duration_to_us(started_at.elapsed());
        telemetry::increment_counter(
            tags::METRIC_BUFFER_ACQUIRE_COUNT,
            1,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );
        telemetry::record_histogram(
            tags::METRIC_BUFFER_ACQUIRE_WAIT_US,
            wait_us,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );

        Ok(self.checkout(buffer))
    }

    /// Checks out a buffer only if one is available without waiting.
    pub fn try_acquire(&self) -> Result<Option<PooledBuffer>> {
        match self.receiver.try_recv() {
            Ok(buffer) => {
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                Ok(Some(self.checkout(buffer)))
            }
            Err(_) if self.reserve_creation_slot() => {
                let buffer = self.allocate()?;
                Ok(Some(self.checkout(buffer)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Returns a snapshot of the current pool metrics.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            created: self.metrics.created.load(Ordering::Acquire),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            waits: self.metrics.waits.load(Ordering::Relaxed),
            outstanding: self.metrics.outstanding.load(Ordering::Acquire),
            peak_outstanding: self.metrics.peak_outstanding.load(Ordering::Acquire),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    fn reserve_creation_slot(&self) -> bool {
        self.metrics
            .created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                (created < self.max_buffers).then_some(created + 1)
            })
            .is_ok()
    }

    fn allocate(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        if let Err(err) = buffer.try_reserve_exact(self.buffer_capacity) {
            self.metrics.created.fetch_sub(1, Ordering::AcqRel);
            return Err(LzpipeError::Allocation(format!(
                "cannot allocate {} byte pool buffer: {err}",
                self.buffer_capacity
            )));
        }
        Ok(buffer)
    }

    fn checkout(&self, mut buffer: Vec<u8>) -> PooledBuffer {
        buffer.clear();
        let outstanding = self.metrics.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics
            .peak_outstanding
            .fetch_max(outstanding, Ordering::AcqRel);
        telemetry::set_gauge(
            tags::METRIC_BUFFER_OUTSTANDING,
            outstanding as u64,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );
        PooledBuffer::new(buffer, self.recycler.clone(), Arc::clone(&self.metrics))
    }
}

/// A snapshot of buffer pool metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolMetricsSnapshot {
    /// Buffers allocated by the pool (never exceeds `max_buffers`).
    pub created: usize,
    /// Acquisitions served by a previously released buffer.
    pub recycled: usize,
    /// Acquisitions that had to wait for a release.
    pub waits: usize,
    /// Buffers currently checked out.
    pub outstanding: usize,
    /// Highest number of buffers checked out at once.
    pub peak_outstanding: usize,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    created: AtomicUsize,
    recycled: AtomicUsize,
    waits: AtomicUsize,
    outstanding: AtomicUsize,
    peak_outstanding: AtomicUsize,
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dropping it returns the allocation to the pool and wakes one waiter.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    recycler: Sender<Vec<u8>>,
    metrics: Arc<PoolMetricsInner>,
}

impl PooledBuffer {
    fn new(buffer: Vec<u8>, recycler: Sender<Vec<u8>>, metrics: Arc<PoolMetricsInner>) -> Self {
        Self {
            buffer,
            recycler,
            metrics,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.metrics.outstanding.fetch_sub(1, Ordering::AcqRel);
        if self.recycler.try_send(buffer).is_err() {
            // The pool is gone or already full; let this allocation go and
            // free its creation slot.
            self.metrics.created.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(target: tags::TARGET_BUFFER, "pooled buffer released to allocator");
        }
    }
}
