use std::collections::BTreeMap;

use crate::{LzpipeError, Result};

/// Holds items that arrived ahead of their turn, keyed by sequence rank.
///
/// The held set is a `BTreeMap`, so it grows with the burst of early arrivals
/// instead of refusing them. Every held rank is strictly greater than
/// [`next_expected`](Self::next_expected).
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_rank: u64,
    pending: BTreeMap<u64, T>,
    peak_pending: usize,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a buffer whose first expected rank is `first_rank`.
    pub fn starting_at(first_rank: u64) -> Self {
        Self {
            next_rank: first_rank,
            pending: BTreeMap::new(),
            peak_pending: 0,
        }
    }

    /// Offers an item.
    ///
    /// Returns `Some(item)` when `rank` is the next expected rank; the caller
    /// must consume it, and the expected rank has already advanced. Otherwise the
    /// item is held and `None` is returned.
    ///
    /// # Errors
    /// A rank that was already released or is already held is a consistency error.
    pub fn accept(&mut self, rank: u64, item: T) -> Result<Option<T>> {
        if rank < self.next_rank {
            return Err(LzpipeError::Consistency {
                reason: "rank already written",
                rank,
                expected: self.next_rank,
            });
        }

        if rank == self.next_rank {
            self.next_rank += 1;
            return Ok(Some(item));
        }

        if self.pending.contains_key(&rank) {
            return Err(LzpipeError::Consistency {
                reason: "rank already held",
                rank,
                expected: self.next_rank,
            });
        }

        self.pending.insert(rank, item);
        self.peak_pending = self.peak_pending.max(self.pending.len());
        Ok(None)
    }

    /// Releases the held item for the next expected rank, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next_rank)?;
        self.next_rank += 1;
        Some(item)
    }

    /// Offers an item and returns every item that is now contiguous, in order.
    pub fn push(&mut self, rank: u64, item: T) -> Result<Vec<T>> {
        let mut ready = Vec::new();
        if let Some(item) = self.accept(rank, item)? {
            ready.push(item);
            while let Some(item) = self.pop_ready() {
                ready.push(item);
            }
        }
        Ok(ready)
    }

    pub fn next_expected(&self) -> u64 {
        self.next_rank
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Largest number of items held at once since creation.
    pub fn peak_pending(&self) -> usize {
        self.peak_pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Lowest held rank, which is the first gap blocking progress.
    pub fn first_pending_rank(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    pub fn last_pending_rank(&self) -> Option<u64> {
        self.pending.keys().next_back().copied()
    }
}
