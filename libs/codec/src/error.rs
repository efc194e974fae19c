//! Codec error types

use thiserror::Error;

/// Errors produced while framing or parsing wire records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A frame announced a body larger than the configured cap.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The underlying stream failed or closed mid-frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True when the peer closed the stream at a frame boundary: the normal
    /// end of a session rather than a protocol violation.
    pub fn is_clean_eof(&self) -> bool {
        matches!(
            self,
            CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
