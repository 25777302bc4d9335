pub mod buffer;
pub mod compression;
pub mod core;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use buffer::{BufferPool, PoolMetricsSnapshot, PooledBuffer};
pub use compression::{BlockCodec, Lz4Codec, StoredCodec, codec_for_level};
pub use crate::core::{SchedulerSnapshot, Task, TaskScheduler, resolve_workers};
pub use error::LzpipeError;
pub use format::{DictionaryWindow, ReorderBuffer, WriteRegister, load_dictionary};
pub use pipeline::{
    BatchOptions, ChunkPipeline, CodecParams, FileOutcome, FnProgressSink, NoopProgress,
    PipelineConfig, ProgressSink, StreamProgress,
};
pub use telemetry::worker::{DefaultSchedulerTelemetry, SchedulerTelemetry};
pub use types::{
    BlockMode, BlockSizeId, ChunkDescriptor, Result, ResultBuffer, StreamFormat, StreamStats,
};
