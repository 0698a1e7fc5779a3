//! The MP4 demux engine (§4.D): walks a complete `ftyp`/`moov`/`mdat` file,
//! builds a DTS-ordered sample schedule, and emits one [`Packet`] per NALU
//! (video) or per sample (audio) to every attached sinker. Grounded on
//! `Mp4Demuxer::OnRead`/`makeMovItems`/`adjustAllDts`/`handleMovItems`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use streamcore_codec::h264;
use streamcore_codec::h265;
use streamcore_core::{AvType, CodecType, FmtType, Packet, Reader, Reporter, Sinker, SinkerFanout, Streamer, StreamerError};

use crate::boxes::{parse_ftyp, parse_moov, read_box_header};
use crate::error::Mp4Error;
use crate::movie::{MovInfo, TrackInfo};

const DEFAULT_OPTIONS: &[(&str, &str)] = &[("re", "false"), ("box_detail", "false")];

/// Minimum sample size the original engine bothers to forward; anything
/// smaller is assumed to be padding and dropped.
const MIN_SAMPLE_LEN: usize = 5;

#[derive(Debug, Clone)]
struct MovItem {
    track_index: usize,
    sample_offset: u64,
    sample_size: u32,
    is_keyframe: bool,
    dts: i64,
    pts: i64,
}

/// MP4 source-to-elementary-stream demuxer. Implements [`Streamer`] so it
/// can sit in a pipeline: attach sinkers with `add_sinker`, then either call
/// [`Demuxer::demux`] directly against a [`Reader`] (file mode) or feed it
/// whole-file buffers through [`Sinker::source_data`] (push mode).
pub struct Demuxer {
    name: String,
    fanout: SinkerFanout,
    reporter: Mutex<Option<Arc<dyn Reporter>>>,
    options: Mutex<HashMap<String, String>>,
    start: Mutex<Option<Instant>>,
}

impl Demuxer {
    pub fn new(name: impl Into<String>) -> Self {
        let mut options = HashMap::new();
        for (k, v) in DEFAULT_OPTIONS {
            options.insert((*k).to_string(), (*v).to_string());
        }
        Demuxer {
            name: name.into(),
            fanout: SinkerFanout::new(),
            reporter: Mutex::new(None),
            options: Mutex::new(options),
            start: Mutex::new(None),
        }
    }

    fn option_bool(&self, key: &str) -> bool {
        self.options.lock().unwrap().get(key).map(|v| v == "true").unwrap_or(false)
    }

    fn report(&self, kind: &str, value: &str) {
        if let Some(reporter) = self.reporter.lock().unwrap().as_ref() {
            reporter.on_report(&self.name, kind, value);
        }
    }

    /// Walks the full top-level box stream (`ftyp`/`moov`/`free`/`mdat`),
    /// schedules every sample in DTS order once `moov` is parsed, and
    /// dispatches packets as it goes.
    pub fn demux(&self, reader: &dyn Reader) -> Result<(), Mp4Error> {
        let box_detail = self.option_bool("box_detail");
        let mut offset = 0u64;
        let mut ftyp_major: Option<String> = None;

        loop {
            let mut head = [0u8; 16];
            let n = reader.read_at(offset, &mut head)?;
            if n < 8 {
                break;
            }
            let header = match read_box_header(&head[..n]) {
                Ok(h) => h,
                Err(_) => break,
            };
            if header.box_size == 0 {
                break;
            }

            if box_detail {
                self.dispatch_box_detail(&header.box_type)?;
            }

            match header.box_type.as_str() {
                "ftyp" => {
                    let body = self.read_box_body(reader, offset, &header)?;
                    let ftyp = parse_ftyp(&body)?;
                    ftyp_major = Some(ftyp.major_brand);
                }
                "moov" => {
                    let body = self.read_box_body(reader, offset, &header)?;
                    let mut mov = parse_moov(&body)?;
                    if let Some(major) = ftyp_major.take() {
                        mov.major_brand = major;
                    }
                    self.report("moov", &format!("{{\"tracks\":{}}}", mov.tracks.len()));
                    self.process_movie(&mov, reader)?;
                }
                _ => {}
            }

            offset += header.box_size;
        }

        Ok(())
    }

    fn read_box_body(&self, reader: &dyn Reader, offset: u64, header: &crate::boxes::BoxHeader) -> Result<Vec<u8>, Mp4Error> {
        let body_len = (header.box_size as usize).saturating_sub(header.header_len);
        let mut body = vec![0u8; body_len];
        reader.read_exact_at(offset + header.header_len as u64, &mut body)?;
        Ok(body)
    }

    fn dispatch_box_detail(&self, box_type: &str) -> Result<(), StreamerError> {
        let mut packet = Packet::new(0);
        packet.av_type = AvType::MovBox;
        packet.box_type = Some(box_type.to_string());
        packet.source = Some(self.name.clone());
        self.fanout.dispatch(Arc::new(packet))
    }

    fn process_movie(&self, mov: &MovInfo, reader: &dyn Reader) -> Result<(), Mp4Error> {
        let config_packets = make_sequence_header_packets(mov)?;
        let mut schedule = schedule_samples(mov);
        adjust_all_dts(&mut schedule, &mov.tracks);

        for packet in config_packets {
            self.output(packet)?;
        }
        self.handle_items(mov, &schedule, reader)?;
        Ok(())
    }

    fn handle_items(&self, mov: &MovInfo, schedule: &BTreeMap<i64, Vec<MovItem>>, reader: &dyn Reader) -> Result<(), Mp4Error> {
        for items in schedule.values() {
            for item in items {
                if (item.sample_size as usize) < MIN_SAMPLE_LEN {
                    continue;
                }
                let track = &mov.tracks[item.track_index];
                let mut buf = vec![0u8; item.sample_size as usize];
                reader.read_exact_at(item.sample_offset, &mut buf)?;

                match track.codec_type {
                    CodecType::H264 => {
                        for nalu in h264::split_avcc_sample(&buf)? {
                            let is_seq_hdr = !nalu.is_empty() && (h264::is_sps(nalu[0]) || h264::is_pps(nalu[0]));
                            let is_key = !nalu.is_empty() && h264::is_idr(nalu[0]);
                            self.output(video_packet(track, item, h264::annex_b_frame(nalu), is_seq_hdr, is_key))?;
                        }
                    }
                    CodecType::H265 => {
                        for nalu in h264::split_avcc_sample(&buf)? {
                            let is_seq_hdr = !nalu.is_empty()
                                && (h265::is_vps(nalu[0]) || h265::is_sps(nalu[0]) || h265::is_pps(nalu[0]));
                            self.output(video_packet(track, item, h264::annex_b_frame(nalu), is_seq_hdr, item.is_keyframe))?;
                        }
                    }
                    _ => {
                        let mut packet = Packet::new(buf.len());
                        packet.av_type = if track.is_audio() { AvType::Audio } else { AvType::Video };
                        packet.codec_type = track.codec_type;
                        packet.fmt_type = FmtType::Raw;
                        packet.stream_id = track.track_id as i64;
                        packet.dts = item.dts;
                        packet.pts = item.pts;
                        packet.is_keyframe = item.is_keyframe;
                        packet.source = Some(self.name.clone());
                        packet.payload = Bytes::from(buf);
                        self.output(packet)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn output(&self, packet: Packet) -> Result<(), Mp4Error> {
        if self.option_bool("re") && !packet.is_sequence_header {
            self.wait_based_on_timestamp(packet.dts);
        }
        self.fanout.dispatch(Arc::new(packet))?;
        Ok(())
    }

    fn wait_based_on_timestamp(&self, dts_us: i64) {
        let mut start = self.start.lock().unwrap();
        let now = Instant::now();
        let started_at = *start.get_or_insert(now);
        let target = started_at + Duration::from_micros(dts_us.max(0) as u64);
        if target > now {
            std::thread::sleep(target - now);
        }
    }
}

fn video_packet(track: &TrackInfo, item: &MovItem, payload: Vec<u8>, is_sequence_header: bool, is_keyframe: bool) -> Packet {
    let mut packet = Packet::new(payload.len());
    packet.av_type = AvType::Video;
    packet.codec_type = track.codec_type;
    packet.fmt_type = FmtType::Raw;
    packet.stream_id = track.track_id as i64;
    packet.dts = item.dts;
    packet.pts = item.pts;
    packet.is_keyframe = is_keyframe;
    packet.is_sequence_header = is_sequence_header;
    packet.payload = Bytes::from(payload);
    packet
}

/// Pass 1 of `makeMovItems`: one or more codec-config packets per track,
/// emitted before any sample so a late-joining decoder always sees headers
/// first.
fn make_sequence_header_packets(mov: &MovInfo) -> Result<Vec<Packet>, Mp4Error> {
    let mut packets = Vec::new();
    for track in &mov.tracks {
        match track.codec_type {
            CodecType::H264 => {
                let dcr = h264::AvcDecoderConfigurationRecord::parse(&track.sequence_data)?;
                let (sps, pps) = dcr.first_sps_pps()?;
                packets.push(sequence_header_packet(track, h264::annex_b_frame(sps)));
                packets.push(sequence_header_packet(track, h264::annex_b_frame(pps)));
            }
            CodecType::H265 => {
                let dcr = h265::HevcDecoderConfigurationRecord::parse(&track.sequence_data)?;
                let (vps, sps, pps) = dcr.first_vps_sps_pps()?;
                packets.push(sequence_header_packet(track, h264::annex_b_frame(vps)));
                packets.push(sequence_header_packet(track, h264::annex_b_frame(sps)));
                packets.push(sequence_header_packet(track, h264::annex_b_frame(pps)));
            }
            CodecType::Aac => {
                streamcore_codec::aac::AudioSpecificConfig::parse(&track.sequence_data)?;
                let mut packet = Packet::new(track.sequence_data.len());
                packet.av_type = AvType::Audio;
                packet.codec_type = CodecType::Aac;
                packet.is_sequence_header = true;
                packet.stream_id = track.track_id as i64;
                packet.payload = Bytes::from(track.sequence_data.clone());
                packets.push(packet);
            }
            other => {
                return Err(Mp4Error::BadExtradata(format!("unsupported codec type {other} for track {}", track.track_id)));
            }
        }
    }
    Ok(packets)
}

fn sequence_header_packet(track: &TrackInfo, payload: Vec<u8>) -> Packet {
    let mut packet = Packet::new(payload.len());
    packet.av_type = AvType::Video;
    packet.codec_type = track.codec_type;
    packet.fmt_type = FmtType::Raw;
    packet.stream_id = track.track_id as i64;
    packet.is_sequence_header = true;
    packet.payload = Bytes::from(payload);
    packet
}

/// Pass 2 of `makeMovItems`: walks `stco`/`stsc` to find each chunk's
/// samples, then `stts`/`ctts`/`stss` for each sample's duration, CTS
/// offset and keyframe flag, producing a DTS-keyed schedule — the Rust
/// equivalent of the original's `std::multimap<int64_t, MovItem>`.
fn schedule_samples(mov: &MovInfo) -> BTreeMap<i64, Vec<MovItem>> {
    let mut schedule: BTreeMap<i64, Vec<MovItem>> = BTreeMap::new();

    for track in &mov.tracks {
        let mut sample_index = 1u32;
        let mut dts: i64 = 0;

        for (chunk_offset_index, &chunk_offset) in track.chunk_offsets.iter().enumerate() {
            let chunk_number = chunk_offset_index as u32 + 1;
            let samples_per_chunk = samples_per_chunk_for(track, chunk_number);
            let mut sample_offset = chunk_offset as u64;

            for _ in 0..samples_per_chunk {
                let sample_size = *track.sample_sizes.get((sample_index - 1) as usize).unwrap_or(&0);
                let duration = duration_for_sample(track, sample_index);
                let cts = cts_for_sample(track, sample_index);
                let pts = dts + cts as i64;
                let keyframe = is_keyframe(track, sample_index);

                let (sched_dts, sched_pts) = rescale_to_micros(dts, pts, track.timescale);
                schedule.entry(sched_dts).or_default().push(MovItem {
                    track_index: track.track_index,
                    sample_offset,
                    sample_size,
                    is_keyframe: keyframe,
                    dts: sched_dts,
                    pts: sched_pts,
                });

                sample_offset += sample_size as u64;
                dts += duration as i64;
                sample_index += 1;
            }
        }
    }

    schedule
}

fn samples_per_chunk_for(track: &TrackInfo, chunk_number: u32) -> u32 {
    for (i, entry) in track.chunk_samples.iter().enumerate() {
        let next_first_chunk = track.chunk_samples.get(i + 1).map(|n| n.first_chunk).unwrap_or(u32::MAX);
        if chunk_number >= entry.first_chunk && chunk_number < next_first_chunk {
            return entry.samples_per_chunk;
        }
    }
    1
}

fn duration_for_sample(track: &TrackInfo, sample_index: u32) -> u32 {
    let mut remaining = sample_index;
    for entry in &track.sample_entries {
        if remaining <= entry.sample_count {
            return entry.samples_delta;
        }
        remaining -= entry.sample_count;
    }
    0
}

fn cts_for_sample(track: &TrackInfo, sample_index: u32) -> u32 {
    let mut remaining = sample_index;
    for entry in &track.sample_offsets {
        if remaining <= entry.sample_count {
            return entry.sample_offset;
        }
        remaining -= entry.sample_count;
    }
    0
}

fn is_keyframe(track: &TrackInfo, sample_index: u32) -> bool {
    track.iframe_samples.is_empty() || track.iframe_samples.contains(&sample_index)
}

fn rescale_to_micros(dts: i64, pts: i64, timescale: u32) -> (i64, i64) {
    if timescale == 0 {
        (dts, pts)
    } else {
        (dts * 1_000_000 / timescale as i64, pts * 1_000_000 / timescale as i64)
    }
}

/// Aligns the first samples of two tracks onto a shared timeline: the
/// track whose first scheduled sample appears second in DTS order has its
/// dts/pts shifted forward by the other track's first dts plus that
/// track's first frame duration.
fn adjust_all_dts(schedule: &mut BTreeMap<i64, Vec<MovItem>>, tracks: &[TrackInfo]) {
    let mut first_dts_by_track: HashMap<usize, i64> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();

    for items in schedule.values() {
        for item in items {
            first_dts_by_track.entry(item.track_index).or_insert_with(|| {
                order.push(item.track_index);
                item.dts
            });
        }
    }

    if order.len() < 2 {
        return;
    }

    let first_track = order[0];
    let second_track = order[1];
    let first_track_frame_duration = first_frame_duration_micros(tracks, first_track);
    let shift = first_dts_by_track[&first_track] + first_track_frame_duration;

    for items in schedule.values_mut() {
        for item in items.iter_mut() {
            if item.track_index == second_track {
                item.dts += shift;
                item.pts += shift;
            }
        }
    }
}

fn first_frame_duration_micros(tracks: &[TrackInfo], track_index: usize) -> i64 {
    let track = &tracks[track_index];
    let Some(first) = track.sample_entries.first() else { return 0 };
    if track.timescale == 0 {
        first.samples_delta as i64
    } else {
        first.samples_delta as i64 * 1_000_000 / track.timescale as i64
    }
}

impl Sinker for Demuxer {
    fn streamer_name(&self) -> &str {
        &self.name
    }

    /// Treats the packet's payload as a complete, in-memory MP4 file.
    /// Incremental demuxing of a byte stream whose box boundaries span
    /// multiple `source_data` calls is out of scope (no fragmented-MP4,
    /// no strict clock recovery).
    fn source_data(&self, packet: Arc<Packet>) -> Result<(), StreamerError> {
        let buffer = packet.payload.to_vec();
        self.demux(&buffer).map_err(|e| StreamerError::Io(std::io::Error::other(e.to_string())))
    }
}

impl Streamer for Demuxer {
    fn add_sinker(&self, sinker: Arc<dyn Sinker>) {
        self.fanout.add(sinker);
    }

    fn remove_sinker(&self, name: &str) -> usize {
        self.fanout.remove(name)
    }

    fn add_option(&self, key: &str, value: &str) -> Result<(), StreamerError> {
        let mut options = self.options.lock().unwrap();
        if !options.contains_key(key) {
            return Err(StreamerError::UnknownOption { key: key.to_string() });
        }
        options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_reporter(&self, reporter: Arc<dyn Reporter>) {
        *self.reporter.lock().unwrap() = Some(reporter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_is_rejected() {
        let demux = Demuxer::new("mp4-demux");
        let err = demux.add_option("nope", "true").unwrap_err();
        assert!(matches!(err, StreamerError::UnknownOption { .. }));
    }

    #[test]
    fn known_option_is_accepted() {
        let demux = Demuxer::new("mp4-demux");
        demux.add_option("re", "true").unwrap();
    }

    #[test]
    fn samples_per_chunk_uses_last_matching_entry() {
        let mut track = TrackInfo::new(0);
        track.chunk_samples = vec![
            crate::movie::ChunkSample { first_chunk: 1, samples_per_chunk: 2, sample_description_index: 1 },
            crate::movie::ChunkSample { first_chunk: 3, samples_per_chunk: 5, sample_description_index: 1 },
        ];
        assert_eq!(samples_per_chunk_for(&track, 1), 2);
        assert_eq!(samples_per_chunk_for(&track, 2), 2);
        assert_eq!(samples_per_chunk_for(&track, 3), 5);
        assert_eq!(samples_per_chunk_for(&track, 100), 5);
    }

    #[test]
    fn duration_for_sample_walks_run_length_list() {
        let mut track = TrackInfo::new(0);
        track.sample_entries = vec![
            crate::movie::SampleEntry { sample_count: 2, samples_delta: 1000 },
            crate::movie::SampleEntry { sample_count: 1, samples_delta: 2000 },
        ];
        assert_eq!(duration_for_sample(&track, 1), 1000);
        assert_eq!(duration_for_sample(&track, 2), 1000);
        assert_eq!(duration_for_sample(&track, 3), 2000);
    }

    #[test]
    fn keyframe_defaults_true_without_stss() {
        let track = TrackInfo::new(0);
        assert!(is_keyframe(&track, 1));
    }

    #[test]
    fn keyframe_respects_stss_list() {
        let mut track = TrackInfo::new(0);
        track.iframe_samples = vec![1, 10];
        assert!(is_keyframe(&track, 1));
        assert!(!is_keyframe(&track, 2));
    }

    #[test]
    fn adjust_all_dts_shifts_second_track_forward() {
        let mut video = TrackInfo::new(0);
        video.timescale = 1000;
        video.sample_entries = vec![crate::movie::SampleEntry { sample_count: 10, samples_delta: 33 }];
        let audio = TrackInfo::new(1);
        let tracks = vec![video, audio];

        let mut schedule: BTreeMap<i64, Vec<MovItem>> = BTreeMap::new();
        schedule.insert(0, vec![MovItem { track_index: 0, sample_offset: 0, sample_size: 10, is_keyframe: true, dts: 0, pts: 0 }]);
        schedule.insert(500, vec![MovItem { track_index: 1, sample_offset: 10, sample_size: 10, is_keyframe: true, dts: 500, pts: 500 }]);

        adjust_all_dts(&mut schedule, &tracks);

        let audio_item = &schedule[&500][0];
        assert_eq!(audio_item.dts, 500 + 0 + 33);
    }

    #[test]
    fn rescale_handles_zero_timescale() {
        assert_eq!(rescale_to_micros(10, 20, 0), (10, 20));
        assert_eq!(rescale_to_micros(1000, 1000, 1000), (1_000_000, 1_000_000));
    }
}
