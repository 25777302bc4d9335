use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::compression::decode_block;
use crate::format::{
    BlockHeader, DictionaryWindow, FrameDescriptor, LEGACY_BLOCK_SIZE, LegacyBlock,
    MAX_DICT_SIZE, StreamKind, dictionary_id, read_u32_le, read_up_to,
};
use crate::telemetry::{self, tags};
use crate::types::{BlockMode, ResultBuffer, StreamStats};
use crate::{LzpipeError, Result};

use super::driver::{
    ChunkPipeline, SharedRegister, new_register, submit_write, unwrap_register,
};
use super::failure::StreamFailure;
use super::types::{NoopProgress, ProgressSink, StreamProgress};

/// Counts bytes pulled from the compressed source.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.count += read as u64;
        Ok(read)
    }
}

enum MagicRead {
    Magic(u32),
    /// Input ended after fewer than four bytes.
    Partial(Vec<u8>),
    End,
}

/// Sequential decoder for one input. Decoded blocks travel to the writer
/// scheduler in pooled buffers, so decoding overlaps with flushing while the
/// pool caps how far the decoder can run ahead.
struct StreamDecoder<'a, R, W: Write, S: ?Sized> {
    pipeline: &'a ChunkPipeline,
    reader: &'a mut CountingReader<R>,
    pool: &'a BufferPool,
    register: &'a SharedRegister<W, PooledBuffer>,
    bytes_out: &'a AtomicU64,
    failure: &'a Arc<StreamFailure>,
    progress: &'a mut S,
    started_at: Instant,
    rank: u64,
    streams: u64,
    skipped: u64,
}

impl<R, W, S> StreamDecoder<'_, R, W, S>
where
    R: Read,
    W: Write + Send + 'static,
    S: ProgressSink + ?Sized,
{
    fn run(&mut self) -> Result<()> {
        let mut next = self.read_magic()?;
        loop {
            let magic = match next {
                MagicRead::End => return Ok(()),
                MagicRead::Partial(prefix) => return self.unrecognized(&prefix),
                MagicRead::Magic(magic) => magic,
            };

            next = match StreamKind::from_magic(magic) {
                StreamKind::Frame => {
                    self.decode_frame()?;
                    self.streams += 1;
                    self.read_magic()?
                }
                StreamKind::Legacy => {
                    let after = self.decode_legacy()?;
                    self.streams += 1;
                    match after {
                        Some(magic) => MagicRead::Magic(magic),
                        None => MagicRead::End,
                    }
                }
                StreamKind::Skippable => {
                    self.skip_frame(magic)?;
                    self.read_magic()?
                }
                StreamKind::Unknown => return self.unrecognized(&magic.to_le_bytes()),
            };
        }
    }

    fn read_magic(&mut self) -> Result<MagicRead> {
        let mut raw = [0u8; 4];
        Ok(match read_up_to(self.reader, &mut raw)? {
            0 => MagicRead::End,
            4 => MagicRead::Magic(u32::from_le_bytes(raw)),
            n => MagicRead::Partial(raw[..n].to_vec()),
        })
    }

    fn unrecognized(&mut self, prefix: &[u8]) -> Result<()> {
        if self.streams > 0 || self.skipped > 0 {
            tracing::warn!(
                target: tags::TARGET_FORMAT,
                offset = self.reader.count - prefix.len() as u64,
                "stream followed by undecodable data; ignoring the rest"
            );
            return Ok(());
        }
        if self.pipeline.config.pass_through {
            return self.pass_through(prefix);
        }
        Err(LzpipeError::InvalidFormat("unrecognized stream header"))
    }

    /// Copies the rest of the input verbatim, prefix first.
    fn pass_through(&mut self, prefix: &[u8]) -> Result<()> {
        tracing::debug!(target: tags::TARGET_FORMAT, "unknown header; passing input through");
        let limit = self.pool.buffer_capacity().max(prefix.len()) as u64;
        let mut carry = prefix;
        loop {
            self.check_failed()?;
            let mut block = self.pool.acquire()?;
            block.extend_from_slice(carry);
            carry = &[];

            let room = limit.saturating_sub(block.len() as u64);
            let read = (&mut *self.reader)
                .take(room)
                .read_to_end(block.as_mut_vec())?;
            if block.is_empty() {
                return Ok(());
            }
            self.emit(block)?;
            if read == 0 {
                return Ok(());
            }
        }
    }

    fn skip_frame(&mut self, magic: u32) -> Result<()> {
        let size = u64::from(read_u32_le(self.reader)?);
        let skipped = io::copy(&mut (&mut *self.reader).take(size), &mut io::sink())?;
        if skipped != size {
            return Err(LzpipeError::InvalidFormat("truncated skippable frame"));
        }
        self.skipped += 1;
        tracing::debug!(
            target: tags::TARGET_FORMAT,
            magic = format_args!("{magic:#010x}"),
            size,
            "skippable frame skipped"
        );
        Ok(())
    }

    fn decode_frame(&mut self) -> Result<()> {
        let descriptor = FrameDescriptor::read_after_magic(self.reader)?;
        let dictionary = self.frame_dictionary(&descriptor)?;
        let max_block = descriptor.block_size.bytes();
        tracing::debug!(
            target: tags::TARGET_FORMAT,
            block_size = max_block,
            block_mode = ?descriptor.block_mode,
            block_checksum = descriptor.block_checksum,
            content_checksum = descriptor.content_checksum,
            "frame started"
        );

        let mut window = DictionaryWindow::with_initial(MAX_DICT_SIZE, dictionary.as_deref());
        let mut hasher = crc32fast::Hasher::new();
        let mut decoded = 0u64;
        let mut payload = Vec::new();

        loop {
            self.check_failed()?;
            let header = BlockHeader::read(self.reader)?;
            if header == BlockHeader::EndMark {
                break;
            }

            let len = header.payload_len();
            if len > max_block {
                return Err(LzpipeError::InvalidFormat(
                    "block larger than the frame block size",
                ));
            }
            payload.clear();
            payload.resize(len, 0);
            self.reader.read_exact(&mut payload)?;

            if descriptor.block_checksum {
                let expected = read_u32_le(self.reader)?;
                let actual = crc32fast::hash(&payload);
                if expected != actual {
                    return Err(LzpipeError::ChecksumMismatch { expected, actual }
                        .with_context(format!("block {}", self.rank)));
                }
            }

            let mut block = self.pool.acquire()?;
            if let BlockHeader::Compressed(_) = header {
                let block_dictionary = match descriptor.block_mode {
                    BlockMode::Independent => dictionary.as_deref(),
                    BlockMode::Linked => (!window.is_empty()).then(|| window.as_slice()),
                };
                decode_block(
                    self.pipeline.decoder.as_ref(),
                    &payload,
                    block_dictionary,
                    block.as_mut_vec(),
                    max_block,
                )
                .map_err(|err| err.with_context(format!("decode block {}", self.rank)))?;
            } else {
                block.extend_from_slice(&payload);
            }

            hasher.update(&block);
            decoded += block.len() as u64;
            if descriptor.block_mode == BlockMode::Linked {
                window.append(&block);
            }
            self.emit(block)?;
        }

        if descriptor.content_checksum {
            let expected = read_u32_le(self.reader)?;
            let actual = hasher.finalize();
            if expected != actual {
                return Err(LzpipeError::ChecksumMismatch { expected, actual }
                    .with_context("frame content"));
            }
        }
        match descriptor.content_size {
            Some(size) if size != decoded => Err(LzpipeError::InvalidFormat(
                "decoded size does not match frame content size",
            )),
            _ => Ok(()),
        }
    }

    /// Matches the configured dictionary against the one the frame names.
    fn frame_dictionary(&self, descriptor: &FrameDescriptor) -> Result<Option<Bytes>> {
        let Some(expected) = descriptor.dict_id else {
            return Ok(None);
        };
        let configured = DictionaryWindow::with_initial(
            MAX_DICT_SIZE,
            self.pipeline.config.params.dictionary.as_deref(),
        )
        .snapshot();

        match configured {
            None => Err(LzpipeError::InvalidConfig(format!(
                "frame needs dictionary {expected:#010x} but none was given"
            ))),
            Some(dict) if dictionary_id(&dict) == expected => Ok(Some(dict)),
            Some(dict) => Err(LzpipeError::InvalidConfig(format!(
                "dictionary {:#010x} does not match frame dictionary {expected:#010x}",
                dictionary_id(&dict)
            ))),
        }
    }

    /// Decodes legacy blocks until the stream ends. Returns the magic number
    /// of the stream that follows, if any.
    fn decode_legacy(&mut self) -> Result<Option<u32>> {
        tracing::debug!(target: tags::TARGET_FORMAT, "legacy stream started");
        let mut payload = Vec::new();
        loop {
            self.check_failed()?;
            let len = match LegacyBlock::read(self.reader)? {
                LegacyBlock::End => return Ok(None),
                LegacyBlock::NextMagic(magic) => return Ok(Some(magic)),
                LegacyBlock::Block(len) => len,
            };

            payload.clear();
            payload.resize(len, 0);
            self.reader.read_exact(&mut payload)?;

            let mut block = self.pool.acquire()?;
            decode_block(
                self.pipeline.decoder.as_ref(),
                &payload,
                None,
                block.as_mut_vec(),
                LEGACY_BLOCK_SIZE,
            )
            .map_err(|err| err.with_context(format!("decode legacy block {}", self.rank)))?;
            self.emit(block)?;
        }
    }

    fn emit(&mut self, block: PooledBuffer) -> Result<()> {
        let rank = self.rank;
        self.rank += 1;
        submit_write(
            &self.pipeline.writer,
            self.register,
            self.failure,
            ResultBuffer::new(rank, block),
        );
        telemetry::increment_counter(
            tags::METRIC_PIPELINE_CHUNK_COUNT,
            1,
            &[("subsystem", "pipeline"), ("op", "decompress")],
        );

        self.progress.on_progress(&StreamProgress {
            chunks: self.rank,
            bytes_in: self.reader.count,
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
        });
        self.check_failed()
    }

    /// Stops decoding once a write job has failed. The real error is already
    /// in the failure slot, so this one is never reported.
    fn check_failed(&self) -> Result<()> {
        if self.failure.is_failed() {
            return Err(LzpipeError::Other(anyhow::anyhow!(
                "stream aborted after an earlier failure"
            )));
        }
        Ok(())
    }
}

impl ChunkPipeline {
    /// Decodes every stream in `reader` into `writer`.
    ///
    /// Frames, legacy streams, and skippable frames may be concatenated.
    /// Undecodable bytes after the first stream end decoding with a warning.
    pub fn decompress_stream<R, W>(&self, reader: R, writer: W) -> Result<(W, StreamStats)>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let mut sink = NoopProgress;
        self.decompress_stream_with(reader, writer, &mut sink)
    }

    /// Decodes with progress reporting.
    pub fn decompress_stream_with<R, W, S>(
        &self,
        reader: R,
        writer: W,
        progress: &mut S,
    ) -> Result<(W, StreamStats)>
    where
        R: Read,
        W: Write + Send + 'static,
        S: ProgressSink + ?Sized,
    {
        let pool = BufferPool::new(self.config.block_size.bytes(), self.config.decode_buffers);
        self.decompress_stream_pooled(reader, writer, &pool, progress)
    }

    /// Decodes into buffers drawn from `pool`.
    ///
    /// The decoder blocks whenever every pool buffer is waiting to be written,
    /// so at most `pool.max_buffers()` decoded blocks exist at once.
    pub fn decompress_stream_pooled<R, W, S>(
        &self,
        reader: R,
        writer: W,
        pool: &BufferPool,
        progress: &mut S,
    ) -> Result<(W, StreamStats)>
    where
        R: Read,
        W: Write + Send + 'static,
        S: ProgressSink + ?Sized,
    {
        let started_at = Instant::now();
        let failure = Arc::new(StreamFailure::new());
        let (register, bytes_out): (SharedRegister<W, PooledBuffer>, _) = new_register(writer);
        let mut reader = CountingReader {
            inner: reader,
            count: 0,
        };

        let (ranks, streams) = {
            let mut decoder = StreamDecoder {
                pipeline: self,
                reader: &mut reader,
                pool,
                register: &register,
                bytes_out: &bytes_out,
                failure: &failure,
                progress,
                started_at,
                rank: 0,
                streams: 0,
                skipped: 0,
            };
            if let Err(err) = decoder.run() {
                failure.fail(err);
            }
            (decoder.rank, decoder.streams)
        };
        self.settle(&failure)?;

        let register = unwrap_register(register, ranks)?;
        let bytes_out = register.bytes_written();
        let writer = register.finish(ranks)?;

        telemetry::increment_counter(
            tags::METRIC_PIPELINE_STREAM_COUNT,
            1,
            &[("subsystem", "pipeline"), ("op", "decompress")],
        );
        let stats = StreamStats {
            bytes_in: reader.count,
            bytes_out,
            chunks: ranks,
            frames: streams,
            elapsed: started_at.elapsed(),
        };
        tracing::debug!(
            target: tags::TARGET_PIPELINE,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            streams = stats.frames,
            buffers_peak = pool.metrics().peak_outstanding,
            "decompression finished"
        );
        Ok((writer, stats))
    }

    /// Decodes and verifies `reader` without writing anything.
    pub fn test_stream<R: Read>(&self, reader: R) -> Result<StreamStats> {
        self.decompress_stream(reader, io::sink())
            .map(|(_, stats)| stats)
    }
}
