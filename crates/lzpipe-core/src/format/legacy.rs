use std::io::Read;

use crate::compression::{self, BlockCodec, Lz4Codec};
use crate::Result;

use super::{BLOCK_HEADER_SIZE, LEGACY_BLOCK_SIZE, LEGACY_MAGIC, try_read_u32_le, try_reserve};

/// Bytes that open a legacy stream.
pub fn legacy_header() -> [u8; 4] {
    LEGACY_MAGIC.to_le_bytes()
}

/// Largest compressed length a legacy block may declare.
///
/// Anything above it cannot be a block and is read as the magic number of the
/// next stream instead.
pub fn legacy_block_bound() -> usize {
    Lz4Codec.max_encoded_len(LEGACY_BLOCK_SIZE)
}

/// Encodes one legacy block: compressed length followed by the compressed bytes.
pub fn encode_legacy_block(codec: &dyn BlockCodec, input: &[u8]) -> Result<Vec<u8>> {
    let encoded =
        compression::encode_block(codec, input, None, codec.max_encoded_len(input.len()))?;

    let mut framed = try_reserve(BLOCK_HEADER_SIZE + encoded.len())?;
    framed.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    framed.extend_from_slice(&encoded);
    Ok(framed)
}

/// What follows the previous legacy block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyBlock {
    /// Another block with this many compressed bytes.
    Block(usize),
    /// The stream ended and the next one starts with this magic number.
    NextMagic(u32),
    /// Clean end of input.
    End,
}

impl LegacyBlock {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let Some(word) = try_read_u32_le(reader)? else {
            return Ok(Self::End);
        };
        if word as usize > legacy_block_bound() {
            Ok(Self::NextMagic(word))
        } else {
            Ok(Self::Block(word as usize))
        }
    }
}
