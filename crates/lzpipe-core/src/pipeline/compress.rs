use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;

use crate::format::{
    DictionaryWindow, FrameDescriptor, MAX_DICT_SIZE, dictionary_id, encode_frame_block,
    encode_legacy_block, encode_trailer, legacy_header, try_reserve,
};
use crate::telemetry::{self, tags};
use crate::types::{BlockMode, ChunkDescriptor, ResultBuffer, StreamFormat, StreamStats};
use crate::{LzpipeError, Result};

use super::driver::{
    ChunkPipeline, SharedRegister, lock_register, new_register, submit_write, unwrap_register,
};
use super::failure::StreamFailure;
use super::types::{NoopProgress, ProgressSink, StreamProgress};

/// Per-stream framing state owned by the driver thread.
struct StreamFramer {
    format: StreamFormat,
    block_mode: BlockMode,
    window: DictionaryWindow,
    initial: Option<Bytes>,
    hasher: Option<crc32fast::Hasher>,
    descriptor: FrameDescriptor,
}

impl StreamFramer {
    fn new(pipeline: &ChunkPipeline) -> Self {
        let config = &pipeline.config;
        let params = &config.params;

        let dictionary = match config.format {
            StreamFormat::Frame => params.dictionary.as_deref(),
            StreamFormat::Legacy => {
                if params.dictionary.is_some() {
                    tracing::warn!(
                        target: tags::TARGET_PIPELINE,
                        "legacy format does not support dictionaries; ignoring it"
                    );
                }
                None
            }
        };
        let window = DictionaryWindow::with_initial(MAX_DICT_SIZE, dictionary);
        let initial = window.snapshot();

        let descriptor = FrameDescriptor {
            block_mode: params.block_mode,
            block_size: config.block_size,
            block_checksum: params.block_checksum,
            content_checksum: params.stream_checksum,
            content_size: params.content_size,
            dict_id: initial.as_deref().map(dictionary_id),
        };

        Self {
            format: config.format,
            block_mode: params.block_mode,
            window,
            initial,
            hasher: (config.format == StreamFormat::Frame && params.stream_checksum)
                .then(crc32fast::Hasher::new),
            descriptor,
        }
    }

    fn header(&self) -> Vec<u8> {
        match self.format {
            StreamFormat::Frame => self.descriptor.to_bytes(),
            StreamFormat::Legacy => legacy_header().to_vec(),
        }
    }

    /// Returns the dictionary snapshot for `input` and advances the window past it.
    fn next_dictionary(&mut self, input: &[u8]) -> Option<Bytes> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(input);
        }
        match (self.format, self.block_mode) {
            (StreamFormat::Legacy, _) => None,
            (StreamFormat::Frame, BlockMode::Independent) => self.initial.clone(),
            (StreamFormat::Frame, BlockMode::Linked) => {
                let snapshot = self.window.snapshot();
                self.window.append(input);
                snapshot
            }
        }
    }

    fn trailer(self) -> Option<Vec<u8>> {
        match self.format {
            StreamFormat::Frame => Some(encode_trailer(self.hasher.map(|h| h.finalize()))),
            StreamFormat::Legacy => None,
        }
    }
}

#[derive(Debug, Default)]
struct FeedOutcome {
    ranks: u64,
    bytes_in: u64,
}

impl ChunkPipeline {
    /// Compresses `reader` into `writer` and returns the sink with stream totals.
    pub fn compress_stream<R, W>(&self, reader: R, writer: W) -> Result<(W, StreamStats)>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let mut sink = NoopProgress;
        self.compress_stream_with(reader, writer, &mut sink)
    }

    /// Compresses with progress reporting.
    ///
    /// The first error from reading, encoding, or writing is returned only
    /// after both schedulers have drained, so no task still references the
    /// stream's buffers.
    pub fn compress_stream_with<R, W, S>(
        &self,
        mut reader: R,
        writer: W,
        progress: &mut S,
    ) -> Result<(W, StreamStats)>
    where
        R: Read,
        W: Write + Send + 'static,
        S: ProgressSink + ?Sized,
    {
        let started_at = Instant::now();
        let chunk_size = self.config.chunk_size();
        let mut framer = StreamFramer::new(self);
        let failure = Arc::new(StreamFailure::new());
        let (register, bytes_out): (SharedRegister<W, Vec<u8>>, _) = new_register(writer);

        lock_register(&register).write_raw(&framer.header())?;
        tracing::debug!(
            target: tags::TARGET_PIPELINE,
            format = ?self.config.format,
            block_mode = ?self.config.params.block_mode,
            chunk_size,
            workers = self.compute.workers(),
            codec = self.encoder.name(),
            "compression started"
        );

        let fed = self.feed_chunks(
            &mut reader,
            &register,
            &bytes_out,
            &failure,
            &mut framer,
            progress,
            started_at,
        );
        self.settle(&failure)?;

        match self.config.params.content_size {
            Some(declared)
                if self.config.format == StreamFormat::Frame && declared != fed.bytes_in =>
            {
                return Err(LzpipeError::InvalidConfig(format!(
                    "declared content size {declared} does not match input length {}",
                    fed.bytes_in
                )));
            }
            _ => {}
        }

        let mut register = unwrap_register(register, fed.ranks)?;
        if let Some(trailer) = framer.trailer() {
            register.write_raw(&trailer)?;
        }
        let bytes_out = register.bytes_written();
        let writer = register.finish(fed.ranks)?;

        telemetry::increment_counter(
            tags::METRIC_PIPELINE_STREAM_COUNT,
            1,
            &[("subsystem", "pipeline"), ("op", "compress")],
        );
        let stats = StreamStats {
            bytes_in: fed.bytes_in,
            bytes_out,
            chunks: fed.ranks,
            frames: 1,
            elapsed: started_at.elapsed(),
        };
        tracing::debug!(
            target: tags::TARGET_PIPELINE,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            chunks = stats.chunks,
            "compression finished"
        );
        Ok((writer, stats))
    }

    /// Reads chunks with one chunk of lookahead and submits a codec task for
    /// each. Stops at end of input or at the first recorded failure.
    fn feed_chunks<R, W, S>(
        &self,
        reader: &mut R,
        register: &SharedRegister<W, Vec<u8>>,
        bytes_out: &AtomicU64,
        failure: &Arc<StreamFailure>,
        framer: &mut StreamFramer,
        progress: &mut S,
        started_at: Instant,
    ) -> FeedOutcome
    where
        R: Read,
        W: Write + Send + 'static,
        S: ProgressSink + ?Sized,
    {
        let chunk_size = self.config.chunk_size();
        let mut outcome = FeedOutcome::default();

        let mut pending = match read_chunk(reader, chunk_size) {
            Ok(chunk) => chunk,
            Err(err) => {
                failure.fail(err.with_context("read chunk 0"));
                return outcome;
            }
        };

        while let Some(input) = pending.take() {
            if failure.is_failed() {
                break;
            }

            let next = match read_chunk(reader, chunk_size) {
                Ok(next) => next,
                Err(err) => {
                    failure.fail(err.with_context(format!("read chunk {}", outcome.ranks + 1)));
                    None
                }
            };

            outcome.bytes_in += input.len() as u64;
            let dictionary = framer.next_dictionary(&input);
            // A read failure also ends the stream here; the failure slot reports it.
            let chunk = ChunkDescriptor::new(outcome.ranks, input, dictionary, next.is_none());

            tracing::trace!(
                target: tags::TARGET_PIPELINE,
                rank = chunk.rank,
                len = chunk.len(),
                is_last = chunk.is_last,
                "chunk submitted"
            );
            if let Err(err) = self.submit_chunk(chunk, register, failure) {
                failure.fail(err);
                break;
            }
            outcome.ranks += 1;
            telemetry::increment_counter(
                tags::METRIC_PIPELINE_CHUNK_COUNT,
                1,
                &[("subsystem", "pipeline"), ("op", "compress")],
            );

            progress.on_progress(&StreamProgress {
                chunks: outcome.ranks,
                bytes_in: outcome.bytes_in,
                bytes_out: bytes_out.load(Ordering::Relaxed),
                elapsed: started_at.elapsed(),
            });
            pending = next;
        }

        outcome
    }

    fn submit_chunk<W>(
        &self,
        chunk: ChunkDescriptor,
        register: &SharedRegister<W, Vec<u8>>,
        failure: &Arc<StreamFailure>,
    ) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        let codec = Arc::clone(&self.encoder);
        let writer = Arc::clone(&self.writer);
        let register = Arc::clone(register);
        let failure = Arc::clone(failure);
        let format = self.config.format;
        let block_checksum = self.config.params.block_checksum;

        self.compute.submit(move || {
            if failure.is_failed() {
                return;
            }

            let rank = chunk.rank;
            let is_last = chunk.is_last;
            let encoded = match format {
                StreamFormat::Frame => encode_frame_block(
                    codec.as_ref(),
                    &chunk.input,
                    chunk.dictionary(),
                    block_checksum,
                ),
                StreamFormat::Legacy => encode_legacy_block(codec.as_ref(), &chunk.input),
            };
            drop(chunk);

            match encoded {
                Ok(data) => submit_write(
                    &writer,
                    &register,
                    &failure,
                    ResultBuffer::new(rank, data).with_last(is_last),
                ),
                Err(err) => failure.fail(err.with_context(format!("encode chunk {rank}"))),
            }
        })
    }
}

/// Reads up to `chunk_size` bytes into a fresh buffer; `None` at end of input.
fn read_chunk<R: Read>(reader: &mut R, chunk_size: usize) -> Result<Option<Bytes>> {
    let mut buffer = try_reserve(chunk_size)?;
    let read = reader
        .by_ref()
        .take(chunk_size as u64)
        .read_to_end(&mut buffer)?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(Bytes::from(buffer)))
    }
}
