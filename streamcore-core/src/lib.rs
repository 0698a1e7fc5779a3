//! Packet model and streamer substrate shared by the MP4 demux and RTMP
//! client engines: the two non-trivial protocol engines in this toolkit
//! are wired together as directed graphs of named streamers exchanging
//! [`Packet`]s (see `SPEC_FULL.md` §2, §4.A, §4.B).

pub mod error;
pub mod packet;
pub mod reader;
pub mod reporter;
pub mod streamer;

pub use error::StreamerError;
pub use packet::{AvType, CodecType, FmtType, Packet};
pub use reader::{FileReader, Reader, SharedReader};
pub use reporter::{Reporter, TracingReporter};
pub use streamer::{Registry, Sinker, SinkerFanout, Streamer};
