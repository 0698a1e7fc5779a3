use thiserror::Error;

/// Error kinds raised by box parsing and the demux engine (§7).
#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("short read: wanted {wanted} bytes, have {have}")]
    ShortRead { wanted: usize, have: usize },

    #[error("unsupported box version {0}")]
    UnsupportedVersion(u8),

    #[error("missing required box: {0}")]
    MissingBox(String),

    #[error("bad extradata: {0}")]
    BadExtradata(String),

    #[error("codec header error: {0}")]
    Codec(#[from] streamcore_codec::CodecError),

    #[error("streamer error: {0}")]
    Streamer(#[from] streamcore_core::StreamerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
