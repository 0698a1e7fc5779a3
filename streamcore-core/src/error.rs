use thiserror::Error;

/// Error kinds shared by every streamer, independent of which protocol
/// engine raised them (§7).
#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("unknown option {key:?}")]
    UnknownOption { key: String },

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
