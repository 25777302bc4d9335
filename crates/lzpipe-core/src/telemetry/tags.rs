/// Log target for scheduler lifecycle events.
pub const TARGET_SCHEDULER: &str = "lzpipe.scheduler";
/// Log target for chunk submission and stream lifecycle.
pub const TARGET_PIPELINE: &str = "lzpipe.pipeline";
/// Log target for ordered block writes.
pub const TARGET_REGISTER: &str = "lzpipe.register";
/// Log target for frame and legacy stream parsing.
pub const TARGET_FORMAT: &str = "lzpipe.format";
/// Log target for buffer pool operations.
pub const TARGET_BUFFER: &str = "lzpipe.buffer";

pub const METRIC_SCHEDULER_TASK_START_COUNT: &str = "lzpipe.scheduler.task.start.count";
pub const METRIC_SCHEDULER_TASK_FINISH_COUNT: &str = "lzpipe.scheduler.task.finish.count";
pub const METRIC_SCHEDULER_TASK_PANIC_COUNT: &str = "lzpipe.scheduler.task.panic.count";
pub const METRIC_SCHEDULER_TASK_LATENCY_US: &str = "lzpipe.scheduler.task.latency_us";
pub const METRIC_SCHEDULER_QUEUE_DEPTH: &str = "lzpipe.scheduler.queue.depth";

pub const METRIC_CODEC_ENCODE_COUNT: &str = "lzpipe.codec.encode.count";
pub const METRIC_CODEC_DECODE_COUNT: &str = "lzpipe.codec.decode.count";
pub const METRIC_CODEC_ENCODE_LATENCY_US: &str = "lzpipe.codec.encode.latency_us";
pub const METRIC_CODEC_DECODE_LATENCY_US: &str = "lzpipe.codec.decode.latency_us";
pub const METRIC_CODEC_INPUT_BYTES: &str = "lzpipe.codec.input_bytes";
pub const METRIC_CODEC_OUTPUT_BYTES: &str = "lzpipe.codec.output_bytes";

pub const METRIC_REGISTER_WRITE_COUNT: &str = "lzpipe.register.write.count";
pub const METRIC_REGISTER_HELD_COUNT: &str = "lzpipe.register.held.count";
pub const METRIC_REGISTER_HELD_PEAK: &str = "lzpipe.register.held.peak";

pub const METRIC_BUFFER_ACQUIRE_COUNT: &str = "lzpipe.buffer.acquire.count";
pub const METRIC_BUFFER_ACQUIRE_WAIT_US: &str = "lzpipe.buffer.acquire.wait_us";
pub const METRIC_BUFFER_OUTSTANDING: &str = "lzpipe.buffer.outstanding";

pub const METRIC_PIPELINE_CHUNK_COUNT: &str = "lzpipe.pipeline.chunk.count";
pub const METRIC_PIPELINE_STREAM_COUNT: &str = "lzpipe.pipeline.stream.count";
pub const METRIC_PIPELINE_STREAM_FAILED_COUNT: &str = "lzpipe.pipeline.stream.failed.count";
