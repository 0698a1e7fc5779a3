//! MP4 box model, parser, and DTS-ordered demux engine (§4.C, §4.D).
//!
//! [`boxes`] holds the per-box-type parse functions, [`movie`] the parsed
//! data model they populate, and [`demux`] the [`Streamer`](streamcore_core::Streamer)
//! that turns a parsed [`movie::MovInfo`] plus its backing [`Reader`](streamcore_core::Reader)
//! into a schedule of elementary-stream [`Packet`](streamcore_core::Packet)s.

pub mod boxes;
pub mod demux;
pub mod error;
pub mod movie;

pub use demux::Demuxer;
pub use error::Mp4Error;
pub use movie::{ChunkSample, MovInfo, SampleEntry, SampleOffset, TrackInfo};
