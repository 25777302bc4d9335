use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::telemetry::{self, tags};
use crate::types::{ResultBuffer, duration_to_us};
use crate::{LzpipeError, Result};

use super::ReorderBuffer;

/// Restores chunk order in front of a sink.
///
/// A result whose rank is the next expected one is written immediately, then
/// every held result that became contiguous is flushed behind it. Results that
/// arrive early are held until their turn. Payloads are dropped right after
/// they are written, which is what returns pooled buffers to their pool.
///
/// The byte count lives in a shared counter so a driver can report progress
/// without waiting on the lock that guards the sink.
#[derive(Debug)]
pub struct WriteRegister<W: Write, T: AsRef<[u8]> = Vec<u8>> {
    writer: W,
    reorder: ReorderBuffer<T>,
    bytes_written: Arc<AtomicU64>,
    blocks_written: u64,
    last_rank: Option<u64>,
}

impl<W: Write, T: AsRef<[u8]>> WriteRegister<W, T> {
    /// Creates an empty register expecting rank 0 first.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            reorder: ReorderBuffer::new(),
            bytes_written: Arc::new(AtomicU64::new(0)),
            blocks_written: 0,
            last_rank: None,
        }
    }

    /// Delivers one result.
    ///
    /// Returns the number of results written to the sink by this call (zero when
    /// the result was held for later).
    ///
    /// # Errors
    /// A rank that was already written or is already held, a rank past the
    /// one marked last, or a second last mark yields
    /// [`LzpipeError::Consistency`]; sink failures yield [`LzpipeError::Io`].
    pub fn complete(&mut self, result: ResultBuffer<T>) -> Result<usize> {
        let ResultBuffer {
            rank,
            data,
            is_last,
        } = result;
        self.check_last(rank, is_last)?;
        let accepted = self.reorder.accept(rank, data)?;
        if is_last {
            self.last_rank = Some(rank);
        }

        let Some(ready) = accepted else {
            telemetry::max_gauge(
                tags::METRIC_REGISTER_HELD_PEAK,
                self.reorder.pending_len() as u64,
                &[("subsystem", "register"), ("op", "hold")],
            );
            tracing::trace!(
                target: tags::TARGET_REGISTER,
                rank,
                next_expected = self.reorder.next_expected(),
                held = self.reorder.pending_len(),
                "result held"
            );
            return Ok(0);
        };

        self.write_payload(rank, ready)?;
        let mut written = 1usize;
        while let Some(held) = self.reorder.pop_ready() {
            let held_rank = self.reorder.next_expected() - 1;
            self.write_payload(held_rank, held)?;
            written += 1;
        }

        telemetry::set_gauge(
            tags::METRIC_REGISTER_HELD_COUNT,
            self.reorder.pending_len() as u64,
            &[("subsystem", "register"), ("op", "flush")],
        );
        Ok(written)
    }

    /// Writes bytes that sit outside the ranked sequence, such as a stream header
    /// or trailer.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes_written.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// True when no result is waiting for an earlier rank and, if a result was
    /// marked last, everything up to it has been written.
    pub fn is_finished(&self) -> bool {
        self.reorder.is_empty()
            && self
                .last_rank
                .is_none_or(|last| self.reorder.next_expected() > last)
    }

    /// Rank of the result marked last, once it has arrived.
    pub fn last_rank(&self) -> Option<u64> {
        self.last_rank
    }

    pub fn next_expected(&self) -> u64 {
        self.reorder.next_expected()
    }

    pub fn pending_len(&self) -> usize {
        self.reorder.pending_len()
    }

    pub fn peak_pending(&self) -> usize {
        self.reorder.peak_pending()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Shared handle on the written byte count, readable without the register.
    pub fn bytes_written_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_written)
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Checks that exactly `total_ranks` results were written, nothing is held
    /// and any result marked last was the final rank, then flushes and returns
    /// the sink.
    pub fn finish(mut self, total_ranks: u64) -> Result<W> {
        if let Some(rank) = self.reorder.first_pending_rank() {
            return Err(LzpipeError::Consistency {
                reason: "register still holds results at end of stream",
                rank,
                expected: self.reorder.next_expected(),
            });
        }
        if self.reorder.next_expected() != total_ranks {
            return Err(LzpipeError::Consistency {
                reason: "register did not receive every rank",
                rank: total_ranks,
                expected: self.reorder.next_expected(),
            });
        }
        if let Some(last) = self.last_rank {
            if last + 1 != total_ranks {
                return Err(LzpipeError::Consistency {
                    reason: "result marked last does not end the stream",
                    rank: last,
                    expected: total_ranks.saturating_sub(1),
                });
            }
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    /// Returns the sink without any end-of-stream checks.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_payload(&mut self, rank: u64, payload: T) -> Result<()> {
        let started_at = Instant::now();
        let bytes = payload.as_ref();
        self.writer.write_all(bytes)?;
        self.bytes_written.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.blocks_written += 1;

        let elapsed_us = duration_to_us(started_at.elapsed());
        telemetry::increment_counter(
            tags::METRIC_REGISTER_WRITE_COUNT,
            1,
            &[("subsystem", "register"), ("op", "write")],
        );
        tracing::trace!(
            target: tags::TARGET_REGISTER,
            rank,
            len = bytes.len(),
            elapsed_us,
            "result written"
        );
        Ok(())
    }

    fn check_last(&self, rank: u64, is_last: bool) -> Result<()> {
        match self.last_rank {
            Some(last) if rank > last => Err(LzpipeError::Consistency {
                reason: "result arrived after the one marked last",
                rank,
                expected: last,
            }),
            Some(last) if is_last && rank != last => Err(LzpipeError::Consistency {
                reason: "second result marked last",
                rank,
                expected: last,
            }),
            None if is_last => match self.reorder.last_pending_rank() {
                Some(held) if held > rank => Err(LzpipeError::Consistency {
                    reason: "result marked last precedes a held result",
                    rank,
                    expected: held,
                }),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}
