//! Byte-stream primitives and codec-header parsing shared by the MP4 demux
//! and RTMP client engines: AVCC/Annex-B NALU framing, H.264/H.265
//! decoder-configuration records, and AAC `AudioSpecificConfig` (§4.D.1).

pub mod aac;
pub mod bytestream;
pub mod error;
pub mod h264;
pub mod h265;

pub use error::CodecError;
