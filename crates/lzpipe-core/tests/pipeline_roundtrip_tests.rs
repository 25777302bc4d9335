mod common;

use std::sync::Arc;

use bytes::Bytes;
use lzpipe_core::format::{FRAME_MAGIC, LEGACY_BLOCK_SIZE, LEGACY_MAGIC};
use lzpipe_core::{
    BlockCodec, BlockMode, ChunkPipeline, FnProgressSink, Lz4Codec, LzpipeError, PipelineConfig,
    StreamFormat, StreamProgress,
};

use common::{CHUNK, frame_config, sample_data};

fn roundtrip(
    compress: &ChunkPipeline,
    decompress: &ChunkPipeline,
    input: &[u8],
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let (encoded, stats) = compress.compress_stream(input, Vec::new())?;
    assert_eq!(stats.bytes_in, input.len() as u64);
    assert_eq!(stats.bytes_out, encoded.len() as u64);
    assert_eq!(stats.chunks, input.len().div_ceil(compress.config().chunk_size()) as u64);

    let (decoded, decoded_stats) = decompress.decompress_stream(encoded.as_slice(), Vec::new())?;
    assert_eq!(decoded_stats.bytes_out, decoded.len() as u64);
    assert_eq!(decoded_stats.bytes_in, encoded.len() as u64);
    Ok(decoded)
}

const FRAME_SIZES: [usize; 6] = [0, CHUNK - 1, CHUNK, CHUNK + 1, 3 * CHUNK, 3 * CHUNK + 123];

#[test]
fn independent_frames_roundtrip_across_chunk_boundaries() -> Result<(), Box<dyn std::error::Error>>
{
    let pipeline = ChunkPipeline::new(frame_config(BlockMode::Independent, 4))?;
    for size in FRAME_SIZES {
        let input = sample_data(size, size as u32);
        let decoded = roundtrip(&pipeline, &pipeline, &input)?;
        assert_eq!(decoded, input, "size {size}");
    }
    Ok(())
}

#[test]
fn linked_frames_roundtrip_across_chunk_boundaries() -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = ChunkPipeline::new(frame_config(BlockMode::Linked, 4))?;
    for size in FRAME_SIZES {
        let input = sample_data(size, 7 + size as u32);
        let decoded = roundtrip(&pipeline, &pipeline, &input)?;
        assert_eq!(decoded, input, "size {size}");
    }
    Ok(())
}

#[test]
fn linked_blocks_compress_repeated_content_better() -> Result<(), Box<dyn std::error::Error>> {
    // Two chunks with identical content: only linked mode can reference the first.
    let mut input = sample_data(CHUNK, 99);
    input.extend_from_within(..);

    let independent = ChunkPipeline::new(frame_config(BlockMode::Independent, 2))?;
    let linked = ChunkPipeline::new(frame_config(BlockMode::Linked, 2))?;
    let (a, _) = independent.compress_stream(input.as_slice(), Vec::new())?;
    let (b, _) = linked.compress_stream(input.as_slice(), Vec::new())?;
    assert!(b.len() < a.len(), "linked {} vs independent {}", b.len(), a.len());
    Ok(())
}

#[test]
fn single_worker_pipeline_matches_parallel_output() -> Result<(), Box<dyn std::error::Error>> {
    let input = sample_data(5 * CHUNK + 17, 3);
    for mode in [BlockMode::Independent, BlockMode::Linked] {
        let serial = ChunkPipeline::new(frame_config(mode, 1))?;
        let parallel = ChunkPipeline::new(frame_config(mode, 4))?;
        assert!(serial.compute_scheduler().is_inline());

        let (a, _) = serial.compress_stream(input.as_slice(), Vec::new())?;
        let (b, _) = parallel.compress_stream(input.as_slice(), Vec::new())?;
        assert_eq!(a, b, "{mode:?}");
    }
    Ok(())
}

#[test]
fn legacy_streams_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig {
        format: StreamFormat::Legacy,
        workers: 2,
        ..PipelineConfig::default()
    };
    let pipeline = ChunkPipeline::new(config)?;
    assert_eq!(pipeline.config().chunk_size(), LEGACY_BLOCK_SIZE);

    for size in [
        0,
        1_000,
        LEGACY_BLOCK_SIZE - 1,
        LEGACY_BLOCK_SIZE,
        LEGACY_BLOCK_SIZE + 1,
        2 * LEGACY_BLOCK_SIZE,
    ] {
        let input = sample_data(size, size as u32);
        let decoded = roundtrip(&pipeline, &pipeline, &input)?;
        assert_eq!(decoded, input, "size {size}");
    }
    Ok(())
}

/// LZ4 with every output byte masked, so its blocks are not LZ4 on the wire.
#[derive(Debug)]
struct MaskedCodec;

const MASK: u8 = 0x5A;

impl BlockCodec for MaskedCodec {
    fn name(&self) -> &'static str {
        "masked"
    }

    fn max_encoded_len(&self, input_len: usize) -> usize {
        Lz4Codec.max_encoded_len(input_len)
    }

    fn encode(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        capacity: usize,
    ) -> lzpipe_core::Result<Vec<u8>> {
        let mut encoded = Lz4Codec.encode(input, dictionary, capacity)?;
        encoded.iter_mut().for_each(|byte| *byte ^= MASK);
        Ok(encoded)
    }

    fn decode_into(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> lzpipe_core::Result<()> {
        let unmasked: Vec<u8> = input.iter().map(|byte| byte ^ MASK).collect();
        Lz4Codec.decode_into(&unmasked, dictionary, output, capacity)
    }
}

#[test]
fn plugged_codec_decodes_its_own_streams() -> Result<(), Box<dyn std::error::Error>> {
    let input = sample_data(3 * CHUNK + 500, 21);
    for mode in [BlockMode::Independent, BlockMode::Linked] {
        let masked = ChunkPipeline::with_codec(frame_config(mode, 3), Arc::new(MaskedCodec))?;
        let decoded = roundtrip(&masked, &masked, &input)?;
        assert_eq!(decoded, input, "{mode:?}");

        let (encoded, _) = masked.compress_stream(input.as_slice(), Vec::new())?;
        let plain = ChunkPipeline::new(frame_config(mode, 3))?;
        assert!(
            plain
                .decompress_stream(encoded.as_slice(), Vec::new())
                .is_err(),
            "{mode:?} masked stream decoded as plain LZ4"
        );
    }
    Ok(())
}

#[test]
fn separate_codecs_per_direction() -> Result<(), Box<dyn std::error::Error>> {
    let input = sample_data(2 * CHUNK, 8);
    let encoder = ChunkPipeline::with_codecs(
        frame_config(BlockMode::Independent, 2),
        Arc::new(MaskedCodec),
        Arc::new(Lz4Codec),
    )?;
    let (encoded, _) = encoder.compress_stream(input.as_slice(), Vec::new())?;
    let err = encoder
        .decompress_stream(encoded.as_slice(), Vec::new())
        .expect_err("masked blocks decoded by plain LZ4");
    assert!(matches!(
        err.root(),
        LzpipeError::Decompression(_) | LzpipeError::ChecksumMismatch { .. }
    ));

    let decoder = ChunkPipeline::with_codecs(
        frame_config(BlockMode::Independent, 2),
        Arc::new(Lz4Codec),
        Arc::new(MaskedCodec),
    )?;
    let (decoded, _) = decoder.decompress_stream(encoded.as_slice(), Vec::new())?;
    assert_eq!(decoded, input);
    Ok(())
}

#[test]
fn level_zero_pipeline_still_decodes_lz4() -> Result<(), Box<dyn std::error::Error>> {
    let input = sample_data(2 * CHUNK + 9, 4);
    let lz4 = ChunkPipeline::new(frame_config(BlockMode::Independent, 2))?;
    let (encoded, _) = lz4.compress_stream(input.as_slice(), Vec::new())?;

    let mut config = frame_config(BlockMode::Independent, 2);
    config.params.level = 0;
    let stored = ChunkPipeline::new(config)?;
    let (decoded, _) = stored.decompress_stream(encoded.as_slice(), Vec::new())?;
    assert_eq!(decoded, input);
    Ok(())
}

#[test]
fn empty_inputs_produce_minimal_streams() -> Result<(), Box<dyn std::error::Error>> {
    let frame = ChunkPipeline::new(frame_config(BlockMode::Independent, 2))?;
    let (encoded, stats) = frame.compress_stream(&[][..], Vec::new())?;
    // magic, FLG, BD, HC, end mark, content checksum
    assert_eq!(encoded.len(), 15);
    assert_eq!(encoded[..4], FRAME_MAGIC.to_le_bytes());
    assert_eq!(stats.chunks, 0);

    let legacy = ChunkPipeline::new(PipelineConfig {
        format: StreamFormat::Legacy,
        workers: 2,
        ..PipelineConfig::default()
    })?;
    let (encoded, _) = legacy.compress_stream(&[][..], Vec::new())?;
    assert_eq!(encoded, LEGACY_MAGIC.to_le_bytes());
    Ok(())
}

#[test]
fn level_zero_stores_blocks() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = frame_config(BlockMode::Independent, 2);
    config.params.level = 0;
    let pipeline = ChunkPipeline::new(config)?;

    let input = sample_data(2 * CHUNK + 5, 11);
    let (encoded, _) = pipeline.compress_stream(input.as_slice(), Vec::new())?;
    // Header, three block headers, end mark, content checksum.
    assert_eq!(encoded.len(), 7 + 3 * 4 + input.len() + 4 + 4);

    let decoded = roundtrip(&pipeline, &pipeline, &input)?;
    assert_eq!(decoded, input);
    Ok(())
}

#[test]
fn incompressible_blocks_fall_back_to_stored() -> Result<(), Box<dyn std::error::Error>> {
    let mut state = 0x9E37_79B9u32;
    let noise: Vec<u8> = (0..CHUNK)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect();

    let pipeline = ChunkPipeline::new(frame_config(BlockMode::Independent, 2))?;
    let (encoded, _) = pipeline.compress_stream(noise.as_slice(), Vec::new())?;
    assert!(encoded.len() <= noise.len() + 7 + 4 + 4 + 4);

    let (decoded, _) = pipeline.decompress_stream(encoded.as_slice(), Vec::new())?;
    assert_eq!(decoded, noise);
    Ok(())
}

#[test]
fn block_checksums_and_content_size_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let input = sample_data(2 * CHUNK + 300, 21);
    let mut config = frame_config(BlockMode::Linked, 3);
    config.params.block_checksum = true;
    config.params.content_size = Some(input.len() as u64);
    let pipeline = ChunkPipeline::new(config)?;

    let decoded = roundtrip(&pipeline, &pipeline, &input)?;
    assert_eq!(decoded, input);
    Ok(())
}

#[test]
fn stream_checksum_can_be_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = frame_config(BlockMode::Independent, 2);
    config.params.stream_checksum = false;
    let pipeline = ChunkPipeline::new(config)?;

    let (encoded, _) = pipeline.compress_stream(&[][..], Vec::new())?;
    assert_eq!(encoded.len(), 11);

    let input = sample_data(CHUNK + 1, 4);
    assert_eq!(roundtrip(&pipeline, &pipeline, &input)?, input);
    Ok(())
}

#[test]
fn dictionaries_roundtrip_in_both_block_modes() -> Result<(), Box<dyn std::error::Error>> {
    let dictionary = Bytes::from(sample_data(80 * 1024, 5));
    let input = sample_data(3 * CHUNK + 10, 5);

    for mode in [BlockMode::Independent, BlockMode::Linked] {
        let mut config = frame_config(mode, 3);
        config.params.dictionary = Some(dictionary.clone());
        let with_dict = ChunkPipeline::new(config)?;
        let without_dict = ChunkPipeline::new(frame_config(mode, 3))?;

        let decoded = roundtrip(&with_dict, &with_dict, &input)?;
        assert_eq!(decoded, input, "{mode:?}");

        let (plain, _) = without_dict.compress_stream(input.as_slice(), Vec::new())?;
        let (primed, _) = with_dict.compress_stream(input.as_slice(), Vec::new())?;
        assert!(primed.len() < plain.len(), "{mode:?}");
    }
    Ok(())
}

#[test]
fn progress_reports_every_chunk() -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = ChunkPipeline::new(frame_config(BlockMode::Independent, 3))?;
    let input = sample_data(4 * CHUNK, 8);

    let mut seen = Vec::new();
    let mut sink = FnProgressSink::new(|progress: &StreamProgress| seen.push(*progress));
    let (encoded, _) = pipeline.compress_stream_with(input.as_slice(), Vec::new(), &mut sink)?;

    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|pair| pair[0].chunks < pair[1].chunks));
    assert_eq!(seen.last().map(|p| p.bytes_in), Some(input.len() as u64));
    assert!(seen.iter().all(|p| p.bytes_out <= encoded.len() as u64));
    Ok(())
}

#[test]
fn one_pipeline_handles_streams_back_to_back() -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = ChunkPipeline::new(frame_config(BlockMode::Linked, 4))?;
    for seed in 0..5 {
        let input = sample_data(2 * CHUNK + seed as usize * 1000, seed);
        assert_eq!(roundtrip(&pipeline, &pipeline, &input)?, input);
    }
    let snapshot = pipeline.compute_scheduler().snapshot();
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.panicked, 0);
    Ok(())
}
