use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;

use crate::{LzpipeError, Result};

use super::MAX_DICT_SIZE;

/// Trailing-byte window carried from one chunk to the next.
///
/// Owned by the driver alone. Workers only ever see a [`snapshot`](Self::snapshot),
/// which is an immutable copy taken before the chunk's task is submitted.
#[derive(Debug, Clone)]
pub struct DictionaryWindow {
    capacity: usize,
    bytes: Vec<u8>,
}

impl DictionaryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Creates a window pre-filled with the tail of `initial`.
    pub fn with_initial(capacity: usize, initial: Option<&[u8]>) -> Self {
        let mut window = Self::new(capacity);
        if let Some(initial) = initial {
            window.append(initial);
        }
        window
    }

    /// Slides the window forward so it holds the last `capacity` bytes of
    /// `window ++ chunk`.
    pub fn append(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.bytes.clear();
            self.bytes
                .extend_from_slice(&chunk[chunk.len() - self.capacity..]);
            return;
        }

        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.bytes.drain(..overflow);
        }
        self.bytes.extend_from_slice(chunk);
    }

    /// Immutable copy of the current window, or `None` while it is empty.
    pub fn snapshot(&self) -> Option<Bytes> {
        (!self.bytes.is_empty()).then(|| Bytes::copy_from_slice(&self.bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Reads the last [`MAX_DICT_SIZE`] bytes of `path` to seed the first window.
pub fn load_dictionary(path: impl AsRef<Path>) -> Result<Bytes> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|err| {
        LzpipeError::from(err).with_context(format!("open dictionary {}", path.display()))
    })?;

    let len = file.metadata()?.len();
    if len > MAX_DICT_SIZE as u64 {
        file.seek(SeekFrom::End(-(MAX_DICT_SIZE as i64)))?;
    }

    let mut bytes = Vec::with_capacity(MAX_DICT_SIZE.min(len as usize));
    file.read_to_end(&mut bytes)?;
    if bytes.len() > MAX_DICT_SIZE {
        bytes.drain(..bytes.len() - MAX_DICT_SIZE);
    }

    tracing::debug!(
        target: crate::telemetry::tags::TARGET_FORMAT,
        path = %path.display(),
        len = bytes.len(),
        "dictionary loaded"
    );
    Ok(Bytes::from(bytes))
}

/// Identifier recorded in a frame header for a dictionary.
pub fn dictionary_id(dictionary: &[u8]) -> u32 {
    crc32fast::hash(dictionary)
}
