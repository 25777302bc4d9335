use std::sync::Arc;
use std::time::Instant;

use crate::telemetry::{self, tags};
use crate::types::duration_to_us;
use crate::Result;

pub mod lz4;
pub mod stored;

pub use lz4::Lz4Codec;
pub use stored::StoredCodec;

/// A block codec: one input chunk in, one encoded chunk out.
///
/// Implementations are pure with respect to the stream. They never see ranks
/// or neighbouring chunks, only the optional dictionary snapshot the driver
/// hands them, so any number of calls may run concurrently.
pub trait BlockCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Worst-case encoded size for `input_len` bytes of input.
    fn max_encoded_len(&self, input_len: usize) -> usize;

    /// Encodes `input`, failing if the result would exceed `capacity` bytes.
    fn encode(&self, input: &[u8], dictionary: Option<&[u8]>, capacity: usize) -> Result<Vec<u8>>;

    /// Decodes `input` into `output`, which is cleared first. Fails if the
    /// decoded size would exceed `capacity` bytes.
    fn decode_into(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> Result<()>;
}

/// Chooses the codec for a compression level: `0` stores blocks, anything else
/// uses LZ4.
pub fn codec_for_level(level: i32) -> Arc<dyn BlockCodec> {
    if level == 0 {
        Arc::new(StoredCodec)
    } else {
        Arc::new(Lz4Codec)
    }
}

/// Encodes one block and records codec metrics.
pub fn encode_block(
    codec: &dyn BlockCodec,
    input: &[u8],
    dictionary: Option<&[u8]>,
    capacity: usize,
) -> Result<Vec<u8>> {
    let started_at = Instant::now();
    let result = codec.encode(input, dictionary, capacity);

    if let Ok(ref encoded) = result {
        let labels = [("codec", codec.name()), ("op", "encode")];
        telemetry::increment_counter(tags::METRIC_CODEC_ENCODE_COUNT, 1, &labels);
        telemetry::record_histogram(
            tags::METRIC_CODEC_ENCODE_LATENCY_US,
            duration_to_us(started_at.elapsed()),
            &labels,
        );
        telemetry::record_histogram(tags::METRIC_CODEC_INPUT_BYTES, input.len() as u64, &labels);
        telemetry::record_histogram(
            tags::METRIC_CODEC_OUTPUT_BYTES,
            encoded.len() as u64,
            &labels,
        );
    }

    result
}

/// Decodes one block and records codec metrics.
pub fn decode_block(
    codec: &dyn BlockCodec,
    input: &[u8],
    dictionary: Option<&[u8]>,
    output: &mut Vec<u8>,
    capacity: usize,
) -> Result<()> {
    let started_at = Instant::now();
    codec.decode_into(input, dictionary, output, capacity)?;

    let labels = [("codec", codec.name()), ("op", "decode")];
    telemetry::increment_counter(tags::METRIC_CODEC_DECODE_COUNT, 1, &labels);
    telemetry::record_histogram(
        tags::METRIC_CODEC_DECODE_LATENCY_US,
        duration_to_us(started_at.elapsed()),
        &labels,
    );
    Ok(())
}
