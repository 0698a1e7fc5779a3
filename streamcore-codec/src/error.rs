use thiserror::Error;

/// Error kinds raised by byte-stream and codec-header parsing (§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("short read: wanted {wanted} bytes, have {have}")]
    ShortRead { wanted: usize, have: usize },

    #[error("bad extradata: {0}")]
    BadExtradata(String),

    #[error("codec not supported: {0}")]
    Unsupported(String),

    #[error("protocol malformed: {0}")]
    Malformed(String),
}
