//! Chunked pipeline driver.
//!
//! Compression reads the source in fixed-size chunks on the calling thread,
//! hands each chunk to the compute scheduler, and lets codec tasks forward
//! their output to the single-worker writer scheduler, where the
//! [`WriteRegister`](crate::format::WriteRegister) restores rank order.
//! Decompression decodes sequentially and reuses the same write path.

mod batch;
mod compress;
mod decompress;
mod driver;
mod failure;
pub mod types;

pub use batch::{BatchOptions, DEFAULT_SUFFIX, FileOutcome};
pub use driver::ChunkPipeline;
pub use types::{
    CodecParams, FnProgressSink, NoopProgress, PipelineConfig, ProgressSink, StreamProgress,
};
