use crate::{LzpipeError, Result};

use super::BlockCodec;

/// Identity codec used for compression level 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredCodec;

impl BlockCodec for StoredCodec {
    fn name(&self) -> &'static str {
        "stored"
    }

    fn max_encoded_len(&self, input_len: usize) -> usize {
        input_len
    }

    fn encode(&self, input: &[u8], _dictionary: Option<&[u8]>, capacity: usize) -> Result<Vec<u8>> {
        if input.len() > capacity {
            return Err(LzpipeError::Codec(format!(
                "stored block of {} bytes exceeds capacity {capacity}",
                input.len()
            )));
        }
        Ok(input.to_vec())
    }

    fn decode_into(
        &self,
        input: &[u8],
        _dictionary: Option<&[u8]>,
        output: &mut Vec<u8>,
        capacity: usize,
    ) -> Result<()> {
        if input.len() > capacity {
            return Err(LzpipeError::Decompression(
                "stored block larger than the block size limit".to_string(),
            ));
        }
        output.clear();
        output.extend_from_slice(input);
        Ok(())
    }
}
