//! RTMP client engine (§4.E): simple handshake, AMF0 command dialogue,
//! and chunk-stream mux/demux, wired into the same [`Streamer`]/[`Sinker`]
//! substrate the MP4 engine uses.

pub mod amf0;
pub mod chunk;
pub mod client;
pub mod error;
pub mod handshake;

pub use client::{Phase, Role, RtmpControlCallback, RtmpRequest, RtmpSession, RtmpTransport};
pub use error::RtmpError;
