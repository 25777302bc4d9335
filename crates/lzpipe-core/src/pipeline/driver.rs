use std::io::Write;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::compression::{BlockCodec, Lz4Codec, codec_for_level};
use crate::core::TaskScheduler;
use crate::format::WriteRegister;
use crate::telemetry::{self, tags};
use crate::types::{ResultBuffer, StreamFormat};
use crate::{LzpipeError, Result};

use super::failure::StreamFailure;
use super::types::PipelineConfig;

pub(crate) type SharedRegister<W, T> = Arc<Mutex<WriteRegister<W, T>>>;

/// Order-preserving chunk pipeline.
///
/// Owns a compute scheduler for codec tasks and a single-worker writer
/// scheduler that serializes access to the sink and its [`WriteRegister`].
/// Every stream gets its own register and failure slot, so one pipeline can
/// transcode any number of streams back to back.
pub struct ChunkPipeline {
    pub(crate) config: PipelineConfig,
    pub(crate) encoder: Arc<dyn BlockCodec>,
    pub(crate) decoder: Arc<dyn BlockCodec>,
    pub(crate) compute: Arc<TaskScheduler>,
    pub(crate) writer: Arc<TaskScheduler>,
}

impl ChunkPipeline {
    /// Builds a pipeline with the codec implied by the configured level.
    ///
    /// Stored blocks never reach the decoder, so decoding is LZ4 at every level.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let encoder: Arc<dyn BlockCodec> = match config.format {
            StreamFormat::Frame => codec_for_level(config.params.level),
            // Legacy blocks carry no stored flag, so they are always LZ4.
            StreamFormat::Legacy => Arc::new(Lz4Codec),
        };
        Self::with_codecs(config, encoder, Arc::new(Lz4Codec))
    }

    /// Builds a pipeline that encodes and decodes with `codec`.
    pub fn with_codec(config: PipelineConfig, codec: Arc<dyn BlockCodec>) -> Result<Self> {
        Self::with_codecs(config, Arc::clone(&codec), codec)
    }

    /// Builds a pipeline with separate codecs for each direction.
    pub fn with_codecs(
        config: PipelineConfig,
        encoder: Arc<dyn BlockCodec>,
        decoder: Arc<dyn BlockCodec>,
    ) -> Result<Self> {
        let workers = config.resolved_workers();
        let capacity = config.resolved_queue_capacity();

        let compute = if workers == 1 {
            TaskScheduler::inline("compute")
        } else {
            TaskScheduler::new("compute", workers, capacity)?
        };
        let writer = TaskScheduler::new("writer", 1, capacity)?;

        let mut pipeline =
            Self::with_schedulers(config, encoder, Arc::new(compute), Arc::new(writer));
        pipeline.decoder = decoder;
        Ok(pipeline)
    }

    /// Builds a pipeline on caller-owned schedulers that encodes and decodes
    /// with `codec`.
    ///
    /// The writer scheduler must have exactly one worker (or be inline) for
    /// results to reach the sink in rank order.
    pub fn with_schedulers(
        config: PipelineConfig,
        codec: Arc<dyn BlockCodec>,
        compute: Arc<TaskScheduler>,
        writer: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            config,
            encoder: Arc::clone(&codec),
            decoder: codec,
            compute,
            writer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn compute_scheduler(&self) -> &Arc<TaskScheduler> {
        &self.compute
    }

    pub fn writer_scheduler(&self) -> &Arc<TaskScheduler> {
        &self.writer
    }

    /// Waits for both schedulers, then reports the stream's first error or the
    /// first task panic.
    pub(crate) fn settle(&self, failure: &StreamFailure) -> Result<()> {
        self.compute.drain();
        self.writer.drain();

        let outcome = match failure.take() {
            Some(err) => Err(err),
            None => match self
                .compute
                .take_panic()
                .or_else(|| self.writer.take_panic())
            {
                Some(message) => Err(LzpipeError::TaskPanicked(message)),
                None => Ok(()),
            },
        };

        if outcome.is_err() {
            telemetry::increment_counter(
                tags::METRIC_PIPELINE_STREAM_FAILED_COUNT,
                1,
                &[("subsystem", "pipeline"), ("op", "settle")],
            );
        }
        outcome
    }
}

impl std::fmt::Debug for ChunkPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPipeline")
            .field("config", &self.config)
            .field("encoder", &self.encoder.name())
            .field("decoder", &self.decoder.name())
            .field("compute", &self.compute)
            .field("writer", &self.writer)
            .finish()
    }
}

/// Wraps a fresh register for sharing with write jobs. The returned counter
/// tracks bytes written, so progress reports never contend with the sink.
pub(crate) fn new_register<W: Write, T: AsRef<[u8]>>(
    writer: W,
) -> (SharedRegister<W, T>, Arc<AtomicU64>) {
    let register = WriteRegister::new(writer);
    let bytes_written = register.bytes_written_counter();
    (Arc::new(Mutex::new(register)), bytes_written)
}

pub(crate) fn lock_register<W: Write, T: AsRef<[u8]>>(
    register: &SharedRegister<W, T>,
) -> MutexGuard<'_, WriteRegister<W, T>> {
    match register.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Recovers the register once every task holding a handle to it has finished.
pub(crate) fn unwrap_register<W: Write, T: AsRef<[u8]>>(
    register: SharedRegister<W, T>,
    total_ranks: u64,
) -> Result<WriteRegister<W, T>> {
    let mutex = Arc::try_unwrap(register).map_err(|_| LzpipeError::Consistency {
        reason: "write register still shared after drain",
        rank: total_ranks,
        expected: total_ranks,
    })?;
    Ok(match mutex.into_inner() {
        Ok(register) => register,
        Err(poisoned) => poisoned.into_inner(),
    })
}

/// Queues a write job that hands `result` to the register.
///
/// Errors from the sink or the register land in `failure`; once the stream
/// has failed, later results are dropped unwritten.
pub(crate) fn submit_write<W, T>(
    writer: &TaskScheduler,
    register: &SharedRegister<W, T>,
    failure: &Arc<StreamFailure>,
    result: ResultBuffer<T>,
) where
    W: Write + Send + 'static,
    T: AsRef<[u8]> + Send + 'static,
{
    let job_register = Arc::clone(register);
    let job_failure = Arc::clone(failure);
    let job = move || {
        if job_failure.is_failed() {
            return;
        }
        let mut register = lock_register(&job_register);
        if let Err(err) = register.complete(result) {
            job_failure.fail(err);
        }
    };

    if let Err(err) = writer.submit(job) {
        failure.fail(err);
    }
}
