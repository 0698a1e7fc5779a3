use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::reader::SharedReader;

/// Coarse category of the payload carried by a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvType {
    Video,
    Audio,
    Metadata,
    /// `av_type = mov-box`: payload is empty, `r#box` carries an opaque
    /// reference to a parsed MP4 box instead.
    MovBox,
    Unknown,
}

impl fmt::Display for AvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AvType::Video => "video",
            AvType::Audio => "audio",
            AvType::Metadata => "metadata",
            AvType::MovBox => "mov-box",
            AvType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Elementary codec carried by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    H264,
    H265,
    H266,
    Av1,
    Aac,
    Opus,
    Unknown,
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecType::H264 => "h264",
            CodecType::H265 => "h265",
            CodecType::H266 => "h266",
            CodecType::Av1 => "av1",
            CodecType::Aac => "aac",
            CodecType::Opus => "opus",
            CodecType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Whether `payload` is raw elementary-stream bytes or retains
/// container-specific framing (e.g. still AVCC-length-prefixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FmtType {
    Raw,
    ContainerSpecific,
}

/// The primary in-flight unit carried between streamers.
///
/// A packet exclusively owns its payload for its lifetime; once handed to
/// sinkers it is wrapped in an `Arc<Packet>` and must not be mutated
/// (§3, §4.A). `Packet::new` builds the mutable, not-yet-shared value; a
/// producer freezes it by wrapping in `Arc` before calling a sinker's
/// `source_data`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub av_type: AvType,
    pub codec_type: CodecType,
    pub fmt_type: FmtType,
    pub dts: i64,
    pub pts: i64,
    pub is_keyframe: bool,
    pub is_sequence_header: bool,
    pub stream_id: i64,
    pub payload: Bytes,
    pub reader: Option<SharedReader>,
    pub r#box: Option<Arc<dyn Any + Send + Sync>>,
    pub box_type: Option<String>,
    /// Name of the streamer that produced this packet, for log/event
    /// correlation only — never part of any invariant or comparison.
    pub source: Option<String>,
}

impl Packet {
    /// Returns a packet with an empty owned payload buffer of the given
    /// capacity hint.
    pub fn new(capacity: usize) -> Self {
        Packet {
            av_type: AvType::Unknown,
            codec_type: CodecType::Unknown,
            fmt_type: FmtType::Raw,
            dts: 0,
            pts: 0,
            is_keyframe: false,
            is_sequence_header: false,
            stream_id: 0,
            payload: Bytes::from(Vec::with_capacity(capacity)),
            reader: None,
            r#box: None,
            box_type: None,
            source: None,
        }
    }

    /// Copies every field except `payload` from `other` into `self`.
    pub fn copy_properties(&mut self, other: &Packet) {
        self.av_type = other.av_type;
        self.codec_type = other.codec_type;
        self.fmt_type = other.fmt_type;
        self.dts = other.dts;
        self.pts = other.pts;
        self.is_keyframe = other.is_keyframe;
        self.is_sequence_header = other.is_sequence_header;
        self.stream_id = other.stream_id;
        self.reader = other.reader.clone();
        self.r#box = other.r#box.clone();
        self.box_type = other.box_type.clone();
        self.source = other.source.clone();
    }

    /// A JSON-ish dump used by the event reporter. `hex` controls whether
    /// the payload is included (as a hex string) at all.
    pub fn dump(&self, hex: bool) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("av_type".into(), serde_json::Value::String(self.av_type.to_string()));
        obj.insert("codec_type".into(), serde_json::Value::String(self.codec_type.to_string()));
        obj.insert("dts".into(), serde_json::Value::from(self.dts));
        obj.insert("pts".into(), serde_json::Value::from(self.pts));
        obj.insert("is_keyframe".into(), serde_json::Value::from(self.is_keyframe));
        obj.insert("is_sequence_header".into(), serde_json::Value::from(self.is_sequence_header));
        obj.insert("stream_id".into(), serde_json::Value::from(self.stream_id));
        obj.insert("len".into(), serde_json::Value::from(self.payload.len()));
        if let Some(bt) = &self.box_type {
            obj.insert("box_type".into(), serde_json::Value::String(bt.clone()));
        }
        if hex {
            obj.insert("payload".into(), serde_json::Value::String(hex_encode(&self.payload)));
        }
        serde_json::Value::Object(obj).to_string()
    }
}

fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for byte in data {
        s.push_str(&format!("{:02x}", byte));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_has_empty_payload() {
        let p = Packet::new(64);
        assert_eq!(p.payload.len(), 0);
        assert_eq!(p.dts, 0);
        assert!(!p.is_keyframe);
    }

    #[test]
    fn copy_properties_preserves_payload() {
        let mut src = Packet::new(0);
        src.dts = 42;
        src.pts = 50;
        src.is_keyframe = true;
        src.av_type = AvType::Video;

        let mut dst = Packet::new(0);
        dst.payload = Bytes::from_static(b"hello");
        dst.copy_properties(&src);

        assert_eq!(dst.dts, 42);
        assert_eq!(dst.pts, 50);
        assert!(dst.is_keyframe);
        assert_eq!(dst.av_type, AvType::Video);
        assert_eq!(dst.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn dump_without_hex_omits_payload() {
        let mut p = Packet::new(0);
        p.payload = Bytes::from_static(b"\x00\x01");
        let dump = p.dump(false);
        assert!(!dump.contains("payload"));
        let dump_hex = p.dump(true);
        assert!(dump_hex.contains("0001"));
    }
}
