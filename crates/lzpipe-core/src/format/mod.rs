//! On-disk framing and the ordered write path.
//!
//! Two container policies share one block codec contract: the legacy format
//! (fixed 8 MiB blocks, each prefixed with its compressed length) and the
//! self-describing frame (shared header and trailer, optional checksums,
//! optional inter-block dictionary linkage). Both feed a [`WriteRegister`],
//! which puts out-of-order results back in rank order.

use std::io::{ErrorKind, Read};

use crate::{LzpipeError, Result};

pub mod consts;
pub mod dictionary;
pub mod frame;
pub mod legacy;
pub mod register;
pub mod reorder;

pub use consts::{
    BLOCK_HEADER_SIZE, BLOCK_UNCOMPRESSED_FLAG, END_MARK, FRAME_MAGIC, FRAME_VERSION,
    LEGACY_BLOCK_SIZE, LEGACY_MAGIC, MAGIC_SIZE, MAX_DICT_SIZE, SKIPPABLE_MAGIC_BASE,
    SKIPPABLE_MAGIC_MASK,
};
pub use dictionary::{DictionaryWindow, dictionary_id, load_dictionary};
pub use frame::{BlockHeader, FrameDescriptor, encode_frame_block, encode_trailer};
pub use legacy::{LegacyBlock, encode_legacy_block, legacy_block_bound, legacy_header};
pub use register::WriteRegister;
pub use reorder::ReorderBuffer;

/// Stream type announced by a magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Frame,
    Legacy,
    Skippable,
    Unknown,
}

impl StreamKind {
    pub fn from_magic(magic: u32) -> Self {
        if magic == FRAME_MAGIC {
            Self::Frame
        } else if magic == LEGACY_MAGIC {
            Self::Legacy
        } else if magic & SKIPPABLE_MAGIC_MASK == SKIPPABLE_MAGIC_BASE {
            Self::Skippable
        } else {
            Self::Unknown
        }
    }
}

/// Reads a little-endian word, failing on a short read.
pub(crate) fn read_u32_le<R: Read>(reader: &mut R) -> Result<u32> {
    try_read_u32_le(reader)?.ok_or(LzpipeError::InvalidFormat("unexpected end of stream"))
}

/// Reads a little-endian word, returning `None` at a clean end of input.
pub(crate) fn try_read_u32_le<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut raw = [0u8; 4];
    match read_up_to(reader, &mut raw)? {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes(raw))),
        _ => Err(LzpipeError::InvalidFormat("truncated length word")),
    }
}

/// Fills as much of `buf` as the reader can provide, stopping early only at
/// end of input. Returns the number of bytes read.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

/// Allocates an empty buffer with room for `len` bytes, reporting failure
/// instead of aborting.
pub(crate) fn try_reserve(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|err| LzpipeError::Allocation(format!("cannot reserve {len} bytes: {err}")))?;
    Ok(buffer)
}
