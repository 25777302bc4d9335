use std::io::Read;

use crate::compression::{self, BlockCodec};
use crate::types::{BlockMode, BlockSizeId};
use crate::{LzpipeError, Result};

use super::consts::{
    BD_BLOCK_SIZE_SHIFT, BD_RESERVED_MASK, FLG_BLOCK_CHECKSUM, FLG_BLOCK_INDEPENDENCE,
    FLG_CONTENT_CHECKSUM, FLG_CONTENT_SIZE, FLG_DICT_ID, FLG_RESERVED, FLG_VERSION_SHIFT,
};
use super::{
    BLOCK_HEADER_SIZE, BLOCK_UNCOMPRESSED_FLAG, END_MARK, FRAME_MAGIC, FRAME_VERSION, MAGIC_SIZE,
    read_u32_le, try_reserve,
};

/// Header fields of a self-describing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub block_mode: BlockMode,
    pub block_size: BlockSizeId,
    pub block_checksum: bool,
    pub content_checksum: bool,
    pub content_size: Option<u64>,
    pub dict_id: Option<u32>,
}

impl Default for FrameDescriptor {
    fn default() -> Self {
        Self {
            block_mode: BlockMode::Independent,
            block_size: BlockSizeId::default(),
            block_checksum: false,
            content_checksum: true,
            content_size: None,
            dict_id: None,
        }
    }
}

impl FrameDescriptor {
    /// Serialized header length, magic included.
    pub fn encoded_len(&self) -> usize {
        let mut len = MAGIC_SIZE + 3;
        if self.content_size.is_some() {
            len += 8;
        }
        if self.dict_id.is_some() {
            len += 4;
        }
        len
    }

    /// Serializes the magic number, descriptor, and header checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&FRAME_MAGIC.to_le_bytes());

        let mut flg = FRAME_VERSION << FLG_VERSION_SHIFT;
        if self.block_mode == BlockMode::Independent {
            flg |= FLG_BLOCK_INDEPENDENCE;
        }
        if self.block_checksum {
            flg |= FLG_BLOCK_CHECKSUM;
        }
        if self.content_size.is_some() {
            flg |= FLG_CONTENT_SIZE;
        }
        if self.content_checksum {
            flg |= FLG_CONTENT_CHECKSUM;
        }
        if self.dict_id.is_some() {
            flg |= FLG_DICT_ID;
        }
        bytes.push(flg);
        bytes.push(self.block_size.to_id() << BD_BLOCK_SIZE_SHIFT);

        if let Some(size) = self.content_size {
            bytes.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(id) = self.dict_id {
            bytes.extend_from_slice(&id.to_le_bytes());
        }

        let check = header_check(&bytes[MAGIC_SIZE..]);
        bytes.push(check);
        bytes
    }

    /// Parses the descriptor that follows an already consumed frame magic.
    pub fn read_after_magic<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; 2];
        reader.read_exact(&mut fixed)?;
        let [flg, bd] = fixed;

        if flg >> FLG_VERSION_SHIFT != FRAME_VERSION {
            return Err(LzpipeError::InvalidFormat("unsupported frame version"));
        }
        if flg & FLG_RESERVED != 0 {
            return Err(LzpipeError::InvalidFormat("reserved frame flag set"));
        }
        if bd & BD_RESERVED_MASK != 0 {
            return Err(LzpipeError::InvalidFormat("reserved block descriptor bits set"));
        }

        let mut descriptor = Vec::with_capacity(14);
        descriptor.extend_from_slice(&fixed);

        let content_size = if flg & FLG_CONTENT_SIZE != 0 {
            let mut raw = [0u8; 8];
            reader.read_exact(&mut raw)?;
            descriptor.extend_from_slice(&raw);
            Some(u64::from_le_bytes(raw))
        } else {
            None
        };

        let dict_id = if flg & FLG_DICT_ID != 0 {
            let mut raw = [0u8; 4];
            reader.read_exact(&mut raw)?;
            descriptor.extend_from_slice(&raw);
            Some(u32::from_le_bytes(raw))
        } else {
            None
        };

        let mut check = [0u8; 1];
        reader.read_exact(&mut check)?;
        if check[0] != header_check(&descriptor) {
            return Err(LzpipeError::InvalidFormat("frame header checksum mismatch"));
        }

        Ok(Self {
            block_mode: if flg & FLG_BLOCK_INDEPENDENCE != 0 {
                BlockMode::Independent
            } else {
                BlockMode::Linked
            },
            block_size: BlockSizeId::from_id(bd >> BD_BLOCK_SIZE_SHIFT)?,
            block_checksum: flg & FLG_BLOCK_CHECKSUM != 0,
            content_checksum: flg & FLG_CONTENT_CHECKSUM != 0,
            content_size,
            dict_id,
        })
    }
}

fn header_check(descriptor: &[u8]) -> u8 {
    (crc32fast::hash(descriptor) >> 8) as u8
}

/// Decoded block length word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    EndMark,
    Compressed(usize),
    Stored(usize),
}

impl BlockHeader {
    pub fn from_word(word: u32) -> Self {
        if word == END_MARK {
            Self::EndMark
        } else if word & BLOCK_UNCOMPRESSED_FLAG != 0 {
            Self::Stored((word & !BLOCK_UNCOMPRESSED_FLAG) as usize)
        } else {
            Self::Compressed(word as usize)
        }
    }

    pub fn to_word(self) -> u32 {
        match self {
            Self::EndMark => END_MARK,
            Self::Compressed(len) => len as u32,
            Self::Stored(len) => len as u32 | BLOCK_UNCOMPRESSED_FLAG,
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self::from_word(read_u32_le(reader)?))
    }

    /// Number of payload bytes that follow the length word.
    pub fn payload_len(self) -> usize {
        match self {
            Self::EndMark => 0,
            Self::Compressed(len) | Self::Stored(len) => len,
        }
    }
}

/// Encodes one chunk as a framed block: length word, payload, optional checksum.
///
/// The block is stored uncompressed when encoding does not make it smaller.
pub fn encode_frame_block(
    codec: &dyn BlockCodec,
    input: &[u8],
    dictionary: Option<&[u8]>,
    block_checksum: bool,
) -> Result<Vec<u8>> {
    let encoded = compression::encode_block(
        codec,
        input,
        dictionary,
        codec.max_encoded_len(input.len()),
    )?;

    let (header, payload) = if encoded.len() < input.len() {
        (BlockHeader::Compressed(encoded.len()), encoded.as_slice())
    } else {
        (BlockHeader::Stored(input.len()), input)
    };

    let checksum_len = if block_checksum { BLOCK_HEADER_SIZE } else { 0 };
    let mut framed = try_reserve(BLOCK_HEADER_SIZE + payload.len() + checksum_len)?;
    framed.extend_from_slice(&header.to_word().to_le_bytes());
    framed.extend_from_slice(payload);
    if block_checksum {
        framed.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    }
    Ok(framed)
}

/// End mark followed by the optional whole-content checksum.
pub fn encode_trailer(content_checksum: Option<u32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&END_MARK.to_le_bytes());
    if let Some(checksum) = content_checksum {
        bytes.extend_from_slice(&checksum.to_le_bytes());
    }
    bytes
}
