#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use lzpipe_core::{
    BlockCodec, BlockMode, BlockSizeId, Lz4Codec, LzpipeError, PipelineConfig, StreamFormat,
};

pub const CHUNK: usize = 64 * 1024;

/// Compressible but non-trivial bytes: short words drawn by a fixed LCG.
pub fn sample_data(len: usize, seed: u32) -> Vec<u8> {
    const WORDS: [&[u8]; 8] = [
        b"block ", b"chunk ", b"rank ", b"order ", b"drain ", b"frame ", b"window ", b"\n",
    ];
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let word = WORDS[(state >> 16) as usize % WORDS.len()];
        out.extend_from_slice(word);
        if state % 5 == 0 {
            out.push((state >> 8) as u8);
        }
    }
    out.truncate(len);
    out
}

/// Input whose chunk `i` starts with the marker byte `i`, so test codecs can
/// tell chunks apart without seeing ranks.
pub fn marked_chunks(chunks: usize, chunk_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks * chunk_len);
    for i in 0..chunks {
        let mut chunk = sample_data(chunk_len, i as u32);
        chunk[0] = i as u8;
        out.extend_from_slice(&chunk);
    }
    out
}

pub fn frame_config(block_mode: BlockMode, workers: usize) -> PipelineConfig {
    let mut config = PipelineConfig {
        format: StreamFormat::Frame,
        block_size: BlockSizeId::Max64Kb,
        workers,
        ..PipelineConfig::default()
    };
    config.params.block_mode = block_mode;
    config
}

/// LZ4 codec that stalls chunks with marker `m` for `(2 - m % 3) * 4` ms, so
/// earlier chunks routinely finish after later ones.
#[derive(Debug, Default)]
pub struct SleepyCodec;

impl BlockCodec for SleepyCodec {
    fn name(&self) -> &'static str {
        "sleepy"
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
        let marker = input.first().copied().unwrap_or(0);
        thread::sleep(Duration::from_millis(u64::from(2 - marker % 3) * 4));
        Lz4Codec.encode(input, dictionary, capacity)
    }

    fn decode_into(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> lzpipe_core::Result<()> {
        Lz4Codec.decode_into(input, dictionary, output, capacity)
    }
}

/// LZ4 codec that rejects the chunk carrying `fail_marker` and tracks how many
/// encodes are running.
#[derive(Debug)]
pub struct FailingCodec {
    pub fail_marker: u8,
    pub active: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl FailingCodec {
    pub fn new(fail_marker: u8) -> Self {
        Self {
            fail_marker,
            active: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BlockCodec for FailingCodec {
    fn name(&self) -> &'static str {
        "failing"
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
        self.active.fetch_add(1, Ordering::AcqRel);
        self.calls.fetch_add(1, Ordering::AcqRel);
        thread::sleep(Duration::from_millis(1));
        let result = if input.first() == Some(&self.fail_marker) {
            Err(LzpipeError::Codec(format!(
                "injected failure on marker {}",
                self.fail_marker
            )))
        } else {
            Lz4Codec.encode(input, dictionary, capacity)
        };
        self.active.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn decode_into(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> lzpipe_core::Result<()> {
        Lz4Codec.decode_into(input, dictionary, output, capacity)
    }
}

/// Sink that counts live instances, so a test can prove the pipeline released it.
#[derive(Debug)]
pub struct TrackedSink {
    pub bytes: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl TrackedSink {
    pub fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self {
            bytes: Vec::new(),
            live: Arc::clone(live),
        }
    }
}

impl Write for TrackedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for TrackedSink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sink that sleeps on every write to let a fast producer run ahead.
#[derive(Debug, Default)]
pub struct SlowSink {
    pub bytes: Vec<u8>,
    pub delay: Duration,
}

impl Write for SlowSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that lets `pass` writes through, then blocks the next write until the
/// gate's sender is dropped.
#[derive(Debug)]
pub struct GatedSink {
    pub bytes: Vec<u8>,
    pass: usize,
    gate: Option<mpsc::Receiver<()>>,
}

impl GatedSink {
    pub fn new(pass: usize) -> (Self, mpsc::Sender<()>) {
        let (open, gate) = mpsc::channel();
        let sink = Self {
            bytes: Vec::new(),
            pass,
            gate: Some(gate),
        };
        (sink, open)
    }
}

impl Write for GatedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pass > 0 {
            self.pass -= 1;
        } else if let Some(gate) = self.gate.take() {
            // Returns once the sender is dropped.
            while gate.recv().is_ok() {}
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that fails every write.
#[derive(Debug, Default)]
pub struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
