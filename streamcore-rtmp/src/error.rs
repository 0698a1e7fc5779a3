use thiserror::Error;

/// Error kinds raised by the handshake, chunk-stream mux/demux, AMF0 codec,
/// and client state machine (§7).
#[derive(Debug, Error)]
pub enum RtmpError {
    #[error("short read: wanted {wanted} bytes, have {have}")]
    ShortRead { wanted: usize, have: usize },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("amf decode error: {0}")]
    Amf(String),

    #[error("unexpected server response in phase {phase}: {detail}")]
    UnexpectedResponse { phase: &'static str, detail: String },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("codec error: {0}")]
    Codec(#[from] streamcore_codec::CodecError),

    #[error("streamer error: {0}")]
    Streamer(#[from] streamcore_core::StreamerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
