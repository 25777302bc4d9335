use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::LzpipeError;

pub type Result<T> = std::result::Result<T, LzpipeError>;

/// Converts a duration to whole microseconds, clamped to `u64::MAX`.
#[inline]
pub fn duration_to_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}

/// One sequential slice of the input stream.
///
/// Ranks are assigned by the driver in strictly increasing, gapless order and
/// are the only ordering key used downstream. Once a descriptor is handed to a
/// codec task it is never mutated again, so both byte views can be read from
/// any worker without synchronization.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub rank: u64,
    pub input: Bytes,
    /// Read-only snapshot of the dictionary window that precedes this chunk.
    pub dictionary: Option<Bytes>,
    pub is_last: bool,
}

impl ChunkDescriptor {
    pub fn new(rank: u64, input: Bytes, dictionary: Option<Bytes>, is_last: bool) -> Self {
        Self {
            rank,
            input,
            dictionary,
            is_last,
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn dictionary(&self) -> Option<&[u8]> {
        self.dictionary.as_deref()
    }
}

/// Output of one codec task, consumed exactly once by the write register.
#[derive(Debug)]
pub struct ResultBuffer<T = Vec<u8>> {
    pub rank: u64,
    pub data: T,
    /// Copied from the chunk's `is_last`; the register rejects any rank after it.
    pub is_last: bool,
}

impl<T: AsRef<[u8]>> ResultBuffer<T> {
    pub fn new(rank: u64, data: T) -> Self {
        Self {
            rank,
            data,
            is_last: false,
        }
    }

    /// Marks whether this result closes its stream.
    pub fn with_last(mut self, is_last: bool) -> Self {
        self.is_last = is_last;
        self
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref()
    }
}

/// On-disk container used for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Self-describing frame with a shared header and trailer.
    #[default]
    Frame,
    /// Fixed 8 MiB blocks, each prefixed with its compressed length.
    Legacy,
}

/// Whether a chunk may reference the tail of the previous chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockMode {
    #[default]
    Independent,
    Linked,
}

/// Maximum block size advertised in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockSizeId {
    Max64Kb,
    Max256Kb,
    Max1Mb,
    #[default]
    Max4Mb,
}

impl BlockSizeId {
    pub fn bytes(self) -> usize {
        match self {
            Self::Max64Kb => 64 * 1024,
            Self::Max256Kb => 256 * 1024,
            Self::Max1Mb => 1024 * 1024,
            Self::Max4Mb => 4 * 1024 * 1024,
        }
    }

    pub fn to_id(self) -> u8 {
        match self {
            Self::Max64Kb => 4,
            Self::Max256Kb => 5,
            Self::Max1Mb => 6,
            Self::Max4Mb => 7,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            4 => Ok(Self::Max64Kb),
            5 => Ok(Self::Max256Kb),
            6 => Ok(Self::Max1Mb),
            7 => Ok(Self::Max4Mb),
            _ => Err(LzpipeError::InvalidFormat("invalid block size id")),
        }
    }

    /// Picks the smallest id whose block size holds `block_size` bytes.
    pub fn for_block_size(block_size: usize) -> Self {
        [Self::Max64Kb, Self::Max256Kb, Self::Max1Mb, Self::Max4Mb]
            .into_iter()
            .find(|id| id.bytes() >= block_size)
            .unwrap_or(Self::Max4Mb)
    }
}

/// Totals for one transcoded stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: u64,
    pub frames: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl StreamStats {
    /// Output size as a percentage of input size.
    pub fn ratio_percent(&self) -> f64 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64 * 100.0
        }
    }
}
