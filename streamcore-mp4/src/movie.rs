//! The parsed movie model (§3): one [`MovInfo`] per file, one [`TrackInfo`]
//! per `trak`, carrying the timing tables a track's sample schedule is
//! built from.

use streamcore_core::CodecType;

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleEntry {
    pub sample_count: u32,
    pub samples_delta: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleOffset {
    pub sample_count: u32,
    pub sample_offset: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkSample {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// One `trak`'s parsed header and sample tables.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    /// Position of this track within `MovInfo::tracks`, independent of
    /// `track_id` (which is assigned by the encoder and may be sparse).
    pub track_index: usize,
    pub timescale: u32,
    /// Microseconds.
    pub duration: f64,
    /// `"vide"` or `"soun"`.
    pub handler_type: String,
    pub codec_type: CodecType,

    pub width: u32,
    pub height: u32,

    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u32,

    /// Codec-config bytes: AVCDecoderConfigurationRecord, HEVC/LHEVC
    /// decoder-configuration-record, or AudioSpecificConfig (§4.D.1).
    pub sequence_data: Vec<u8>,

    pub sample_entries: Vec<SampleEntry>,
    pub sample_offsets: Vec<SampleOffset>,
    pub iframe_samples: Vec<u32>,
    pub chunk_samples: Vec<ChunkSample>,
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u32>,
}

impl TrackInfo {
    pub fn new(track_index: usize) -> Self {
        TrackInfo {
            track_id: 0,
            track_index,
            timescale: 0,
            duration: 0.0,
            handler_type: String::new(),
            codec_type: CodecType::Unknown,
            width: 0,
            height: 0,
            channel_count: 0,
            sample_size: 0,
            sample_rate: 0,
            sequence_data: Vec::new(),
            sample_entries: Vec::new(),
            sample_offsets: Vec::new(),
            iframe_samples: Vec::new(),
            chunk_samples: Vec::new(),
            sample_sizes: Vec::new(),
            chunk_offsets: Vec::new(),
        }
    }

    pub fn is_video(&self) -> bool {
        self.handler_type == "vide"
    }

    pub fn is_audio(&self) -> bool {
        self.handler_type == "soun"
    }
}

/// Parsed `moov` contents plus the file-level `ftyp` fields (§3).
#[derive(Debug, Clone, Default)]
pub struct MovInfo {
    pub major_brand: String,
    pub minor_version: u32,
    pub compatible_brands: Vec<String>,
    /// Microseconds.
    pub duration: f64,
    pub next_track_id: u32,
    pub tracks: Vec<TrackInfo>,
}
