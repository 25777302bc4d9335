use lz4_flex::block;

use crate::{LzpipeError, Result};

use super::BlockCodec;

/// LZ4 block codec.
///
/// A dictionary, when given, acts as the window preceding the block: matches may
/// reach back into it, and the decoder must be handed the same bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn max_encoded_len(&self, input_len: usize) -> usize {
        block::get_maximum_output_size(input_len)
    }

    fn encode(&self, input: &[u8], dictionary: Option<&[u8]>, capacity: usize) -> Result<Vec<u8>> {
        let encoded = match dictionary {
            Some(dict) if !dict.is_empty() => block::compress_with_dict(input, dict),
            _ => block::compress(input),
        };

        if encoded.len() > capacity {
            return Err(LzpipeError::Codec(format!(
                "lz4 output of {} bytes exceeds capacity {capacity}",
                encoded.len()
            )));
        }
        Ok(encoded)
    }

    fn decode_into(
        &self,
        input: &[u8],
        dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> Result<()> {
        output.clear();
        output.resize(capacity, 0);

        let decoded = match dictionary {
            Some(dict) if !dict.is_empty() => {
                block::decompress_into_with_dict(input, output.as_mut_slice(), dict)
            }
            _ => block::decompress_into(input, output.as_mut_slice()),
        }
        .map_err(|err| LzpipeError::Decompression(format!("lz4 decode failed: {err}")))?;

        output.truncate(decoded);
        Ok(())
    }
}
