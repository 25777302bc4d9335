use thiserror::Error;

#[derive(Debug, Error)]
pub enum LzpipeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("allocation error: {0}")]
    Allocation(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("checksum mismatch (expected {expected:#010x}, actual {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("consistency error: {reason} (rank {rank}, next expected {expected})")]
    Consistency {
        reason: &'static str,
        rank: u64,
        expected: u64,
    },
    #[error("task panicked: {0}")]
    TaskPanicked(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<LzpipeError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LzpipeError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &LzpipeError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors that indicate a scheduler or driver bug rather than bad input.
    pub fn is_consistency(&self) -> bool {
        matches!(self.root(), Self::Consistency { .. })
    }
}
