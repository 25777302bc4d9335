use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::resolve_workers;
use crate::format::LEGACY_BLOCK_SIZE;
use crate::types::{BlockMode, BlockSizeId, StreamFormat};

/// Knobs that shape the encoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    /// Compression effort. `0` stores blocks without compressing them.
    pub level: i32,
    /// Whether frame blocks may reference the tail of the previous block.
    pub block_mode: BlockMode,
    /// Appends a CRC-32 after every frame block.
    pub block_checksum: bool,
    /// Appends a CRC-32 of the whole decoded content to the frame trailer.
    pub stream_checksum: bool,
    /// Declared input length, written into the frame header and verified on
    /// decode.
    pub content_size: Option<u64>,
    /// Bytes that seed the first dictionary window, typically from
    /// [`load_dictionary`](crate::format::load_dictionary).
    pub dictionary: Option<Bytes>,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            level: 1,
            block_mode: BlockMode::Independent,
            block_checksum: false,
            stream_checksum: true,
            content_size: None,
            dictionary: None,
        }
    }
}

/// Construction config for a [`ChunkPipeline`](super::ChunkPipeline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Container written by the compressor.
    pub format: StreamFormat,
    /// Chunk size of the frame format. The legacy format always uses 8 MiB.
    pub block_size: BlockSizeId,
    /// Compute workers; `0` resolves to detected cores minus one.
    pub workers: usize,
    /// Compute queue capacity; `0` means twice the worker count.
    pub queue_capacity: usize,
    /// Decoded blocks allowed in flight between decoder and writer.
    pub decode_buffers: usize,
    /// Copies input with an unrecognized magic number verbatim on decode.
    pub pass_through: bool,
    pub params: CodecParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::Frame,
            block_size: BlockSizeId::default(),
            workers: 0,
            queue_capacity: 0,
            decode_buffers: 4,
            pass_through: false,
            params: CodecParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Bytes read per chunk by the compressor.
    pub fn chunk_size(&self) -> usize {
        match self.format {
            StreamFormat::Frame => self.block_size.bytes(),
            StreamFormat::Legacy => LEGACY_BLOCK_SIZE,
        }
    }

    pub fn resolved_workers(&self) -> usize {
        resolve_workers(self.workers)
    }

    pub fn resolved_queue_capacity(&self) -> usize {
        if self.queue_capacity > 0 {
            self.queue_capacity
        } else {
            self.resolved_workers() * 2
        }
    }
}

/// Point-in-time progress of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamProgress {
    /// Chunks handed to the compute side (compression) or decoded (decompression).
    pub chunks: u64,
    pub bytes_in: u64,
    /// Bytes already flushed to the sink.
    pub bytes_out: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Receives progress updates from the driver thread.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: &StreamProgress);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&mut self, _progress: &StreamProgress) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnProgressSink<F>
where
    F: FnMut(&StreamProgress),
{
    pub callback: F,
}

impl<F> FnProgressSink<F>
where
    F: FnMut(&StreamProgress),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for FnProgressSink<F>
where
    F: FnMut(&StreamProgress),
{
    fn on_progress(&mut self, progress: &StreamProgress) {
        (self.callback)(progress);
    }
}
