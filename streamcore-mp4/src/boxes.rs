//! MP4 box model and parser (§4.C): reads the `ftyp`/`moov` box tree and
//! the per-track timing tables, grounded on the original box-by-box
//! recursive-descent parser (`mp4_box.hpp`) but expressed as byte-slice
//! parse functions over a [`MovInfo`] instead of a class-per-box-type
//! parent-pointer tree.

use streamcore_codec::bytestream::ByteReader;
use streamcore_codec::h264::AvcDecoderConfigurationRecord;
use streamcore_codec::h265::HevcDecoderConfigurationRecord;
use streamcore_core::CodecType;

use crate::error::Mp4Error;
use crate::movie::{ChunkSample, MovInfo, SampleEntry, SampleOffset, TrackInfo};

/// The 8 (or 16, for a 64-bit size) byte box header every MP4 box starts
/// with.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub box_type: String,
    pub box_size: u64,
    pub header_len: usize,
}

pub fn read_box_header(data: &[u8]) -> Result<BoxHeader, Mp4Error> {
    if data.len() < 8 {
        return Err(Mp4Error::ShortRead { wanted: 8, have: data.len() });
    }
    let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let box_type = String::from_utf8_lossy(&data[4..8]).into_owned();

    if size32 == 1 {
        if data.len() < 16 {
            return Err(Mp4Error::ShortRead { wanted: 16, have: data.len() });
        }
        let large_size = u64::from_be_bytes(data[8..16].try_into().unwrap());
        Ok(BoxHeader { box_type, box_size: large_size, header_len: 16 })
    } else {
        Ok(BoxHeader { box_type, box_size: size32, header_len: 8 })
    }
}

/// Walks the immediate children of a container box body, calling `f` with
/// each child's type and body (the bytes after its own header).
pub fn for_each_child<'a>(
    data: &'a [u8],
    mut f: impl FnMut(&str, &'a [u8]) -> Result<(), Mp4Error>,
) -> Result<(), Mp4Error> {
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < 8 {
            break;
        }
        let header = read_box_header(&data[pos..])?;
        let box_total = header.box_size as usize;
        if box_total < header.header_len || pos + box_total > data.len() {
            return Err(Mp4Error::ShortRead { wanted: box_total, have: data.len() - pos });
        }
        let body = &data[pos + header.header_len..pos + box_total];
        f(&header.box_type, body)?;
        pos += box_total;
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct FtypBox {
    pub major_brand: String,
    pub minor_version: u32,
    pub compatible_brands: Vec<String>,
}

pub fn parse_ftyp(body: &[u8]) -> Result<FtypBox, Mp4Error> {
    let mut r = ByteReader::new(body);
    let major_brand = brand_string(r.read_u32()?);
    let minor_version = r.read_u32()?;
    let mut compatible_brands = Vec::new();
    while r.remaining() >= 4 {
        compatible_brands.push(brand_string(r.read_u32()?));
    }
    Ok(FtypBox { major_brand, minor_version, compatible_brands })
}

fn brand_string(value: u32) -> String {
    String::from_utf8_lossy(&value.to_be_bytes()).into_owned()
}

pub fn parse_moov(body: &[u8]) -> Result<MovInfo, Mp4Error> {
    let mut mov = MovInfo::default();

    for_each_child(body, |box_type, child| {
        match box_type {
            "mvhd" => parse_mvhd(child, &mut mov)?,
            "trak" => {
                let index = mov.tracks.len();
                let mut track = TrackInfo::new(index);
                parse_trak(child, &mut track)?;
                mov.tracks.push(track);
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(mov)
}

fn parse_mvhd(body: &[u8], mov: &mut MovInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    let version_flag = r.read_u32()?;
    let version = (version_flag >> 24) as u8;

    let (timescale, duration);
    if version == 0 {
        r.skip(8)?; // creation_time, modification_time
        timescale = r.read_u32()?;
        duration = r.read_u32()? as u64;
    } else {
        r.skip(16)?;
        timescale = r.read_u32()?;
        duration = r.read_u64()?;
    }

    mov.duration = if timescale != 0 { duration as f64 * 1_000_000.0 / timescale as f64 } else { duration as f64 };

    // rate, volume, reserved1, reserved2[2], matrix[9], pre_defined[6]
    r.skip(4 + 2 + 2 + 8 + 36 + 24)?;
    mov.next_track_id = r.read_u32()?;
    Ok(())
}

fn parse_trak(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    for_each_child(body, |box_type, child| {
        match box_type {
            "tkhd" => parse_tkhd(child, track)?,
            "mdia" => parse_mdia(child, track)?,
            _ => {}
        }
        Ok(())
    })
}

fn parse_tkhd(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    let version_flag = r.read_u32()?;
    let version = (version_flag >> 24) as u8;

    if version == 0 {
        r.skip(8)?; // creation_time, modification_time
        track.track_id = r.read_u32()?;
        r.skip(4)?; // reserved1
        r.skip(4)?; // duration (superseded by mdhd)
    } else {
        r.skip(16)?;
        track.track_id = r.read_u32()?;
        r.skip(4)?;
        r.skip(8)?;
    }
    r.skip(8)?; // reserved2[2]
    r.skip(2 + 2)?; // layer, alternate_group
    r.skip(2 + 2)?; // volume, reserved3
    r.skip(36)?; // transform_matrix[9]
    let width = r.read_u32()?;
    let height = r.read_u32()?;
    track.width = width >> 16;
    track.height = height >> 16;
    Ok(())
}

fn parse_mdia(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    for_each_child(body, |box_type, child| {
        match box_type {
            "mdhd" => parse_mdhd(child, track)?,
            "hdlr" => parse_hdlr(child, track)?,
            "minf" => parse_minf(child, track)?,
            _ => {}
        }
        Ok(())
    })
}

fn parse_mdhd(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    let version_flag = r.read_u32()?;
    let version = (version_flag >> 24) as u8;

    let (timescale, duration);
    if version == 0 {
        r.skip(8)?;
        timescale = r.read_u32()?;
        duration = r.read_u32()? as u64;
    } else {
        r.skip(16)?;
        timescale = r.read_u32()?;
        duration = r.read_u64()?;
    }
    track.timescale = timescale;
    track.duration = if timescale != 0 { duration as f64 * 1_000_000.0 / timescale as f64 } else { 0.0 };
    Ok(())
}

fn parse_hdlr(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?; // version_flag
    r.skip(4)?; // pre_defined
    let handler_type = r.read_u32()?;
    track.handler_type = brand_string(handler_type);
    Ok(())
}

fn parse_minf(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    for_each_child(body, |box_type, child| {
        if box_type == "stbl" {
            parse_stbl(child, track)?;
        }
        Ok(())
    })
}

fn parse_stbl(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    for_each_child(body, |box_type, child| {
        match box_type {
            "stsd" => parse_stsd(child, track)?,
            "stts" => parse_stts(child, track)?,
            "ctts" => parse_ctts(child, track)?,
            "stss" => parse_stss(child, track)?,
            "stsc" => parse_stsc(child, track)?,
            "stsz" => parse_stsz(child, track)?,
            "stco" => parse_stco(child, track)?,
            _ => {}
        }
        Ok(())
    })
}

fn parse_stts(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let entry_count = r.read_u32()?;
    for _ in 0..entry_count {
        let sample_count = r.read_u32()?;
        let samples_delta = r.read_u32()?;
        track.sample_entries.push(SampleEntry { sample_count, samples_delta });
    }
    Ok(())
}

fn parse_ctts(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let entry_count = r.read_u32()?;
    for _ in 0..entry_count {
        let sample_count = r.read_u32()?;
        let sample_offset = r.read_u32()?;
        track.sample_offsets.push(SampleOffset { sample_count, sample_offset });
    }
    Ok(())
}

fn parse_stss(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let entry_count = r.read_u32()?;
    for _ in 0..entry_count {
        track.iframe_samples.push(r.read_u32()?);
    }
    Ok(())
}

fn parse_stsc(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let entry_count = r.read_u32()?;
    for _ in 0..entry_count {
        if r.remaining() < 12 {
            break;
        }
        let first_chunk = r.read_u32()?;
        let samples_per_chunk = r.read_u32()?;
        let sample_description_index = r.read_u32()?;
        track.chunk_samples.push(ChunkSample { first_chunk, samples_per_chunk, sample_description_index });
    }
    Ok(())
}

fn parse_stsz(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let constant_size = r.read_u32()?;
    let sample_count = r.read_u32()?;
    if constant_size == 0 {
        for _ in 0..sample_count {
            track.sample_sizes.push(r.read_u32()?);
        }
    } else {
        track.sample_sizes = vec![constant_size; sample_count as usize];
    }
    Ok(())
}

fn parse_stco(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?;
    let entry_count = r.read_u32()?;
    for _ in 0..entry_count {
        track.chunk_offsets.push(r.read_u32()?);
    }
    Ok(())
}

const STSD_ENTRY_FIXED_HEADER_LEN: usize = 78;

fn parse_stsd(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?; // version_flag
    let entry_count = r.read_u32()?;
    if entry_count == 0 {
        return Ok(());
    }
    let rest = &body[r.position()..];
    let header = read_box_header(rest)?;
    let entry_body = &rest[header.header_len..header.box_size as usize];

    match header.box_type.as_str() {
        "avc1" => parse_avc1(entry_body, track)?,
        "hvc1" | "hev1" => parse_hvc1(entry_body, track)?,
        "mp4a" => parse_mp4a(entry_body, track)?,
        _ => {}
    }
    Ok(())
}

fn parse_video_sample_entry_header(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    if body.len() < STSD_ENTRY_FIXED_HEADER_LEN {
        return Err(Mp4Error::ShortRead { wanted: STSD_ENTRY_FIXED_HEADER_LEN, have: body.len() });
    }
    let width = u16::from_be_bytes([body[28], body[29]]);
    let height = u16::from_be_bytes([body[30], body[31]]);
    track.width = width as u32;
    track.height = height as u32;
    Ok(())
}

fn parse_avc1(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    parse_video_sample_entry_header(body, track)?;
    track.codec_type = CodecType::H264;

    let children = &body[STSD_ENTRY_FIXED_HEADER_LEN..];
    for_each_child(children, |box_type, child| {
        if box_type == "avcC" {
            AvcDecoderConfigurationRecord::parse(child)?;
            track.sequence_data = child.to_vec();
        }
        Ok(())
    })
}

fn parse_hvc1(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    parse_video_sample_entry_header(body, track)?;
    track.codec_type = CodecType::H265;

    let children = &body[STSD_ENTRY_FIXED_HEADER_LEN..];
    for_each_child(children, |box_type, child| {
        if box_type == "hvcC" {
            HevcDecoderConfigurationRecord::parse(child)?;
            track.sequence_data = child.to_vec();
        }
        Ok(())
    })
}

const MP4A_FIXED_HEADER_LEN: usize = 28;

fn parse_mp4a(body: &[u8], track: &mut TrackInfo) -> Result<(), Mp4Error> {
    if body.len() < MP4A_FIXED_HEADER_LEN {
        return Err(Mp4Error::ShortRead { wanted: MP4A_FIXED_HEADER_LEN, have: body.len() });
    }
    let mut r = ByteReader::new(body);
    r.skip(4 + 2 + 2)?; // reserved1, reserved2, data_ref_index
    r.skip(2 + 2)?; // version, revision_level
    r.skip(4)?; // reserved3
    track.channel_count = r.read_u16()?;
    track.sample_size = r.read_u16()?;
    r.skip(2 + 2)?; // pre_defined, reserved4
    track.sample_rate = r.read_u32()? >> 16;
    track.codec_type = CodecType::Aac;

    let children = &body[MP4A_FIXED_HEADER_LEN..];
    for_each_child(children, |box_type, child| {
        if box_type == "esds" {
            track.sequence_data = parse_esds(child)?;
        }
        Ok(())
    })
}

/// ISO/IEC 14496-1 `ES_Descriptor` length field: a 4-byte big-endian
/// accumulator that masks each shifted byte down to its low 7 bits before
/// adding it in, per the box parser's descriptor-length reader.
fn descriptor_length(bytes: [u8; 4]) -> u32 {
    let mut ret = 0u32;
    for i in (1..=3).rev() {
        let unit = bytes[3 - i] as u32;
        ret += (unit << (i * 7)) & 0x7f;
    }
    ret += bytes[3] as u32 & 0x7f;
    ret
}

fn read_descriptor_length(r: &mut ByteReader) -> Result<u32, Mp4Error> {
    let bytes = r.read_bytes(4)?;
    Ok(descriptor_length([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parses an `esds` box body down to the `DecoderSpecificInfo` bytes
/// (the `AudioSpecificConfig` for AAC), per §4.C.
fn parse_esds(body: &[u8]) -> Result<Vec<u8>, Mp4Error> {
    let mut r = ByteReader::new(body);
    r.skip(4)?; // version_flag

    let _es_descr_tag = r.read_u8()?;
    let _es_descr_len = read_descriptor_length(&mut r)?;
    r.skip(2)?; // es_id

    let flags = r.read_u8()?;
    let stream_dependence_flag = (flags >> 7) & 0x01;
    let url_flag = (flags >> 6) & 0x01;
    let ocr_stream_flag = (flags >> 5) & 0x01;

    if stream_dependence_flag != 0 {
        r.skip(2)?;
    }
    if url_flag != 0 {
        let url_length = r.read_u8()? as usize;
        r.skip(url_length)?;
    }
    if ocr_stream_flag != 0 {
        r.skip(2)?;
    }

    let _dec_conf_descr_tag = r.read_u8()?;
    let _decoder_specific_info_len = read_descriptor_length(&mut r)?;

    r.skip(1)?; // object_type_indication
    r.skip(1)?; // streamtype/upstream
    r.skip(3)?; // buffer_size (24 bits)
    r.skip(4)?; // maxbitrate
    r.skip(4)?; // avg_bit_rate

    let _dec_specific_info_tag = r.read_u8()?;
    let extra_data_len = read_descriptor_length(&mut r)? as usize;

    if extra_data_len == 0 || extra_data_len > r.remaining() {
        return Ok(Vec::new());
    }
    Ok(r.read_bytes(extra_data_len)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_bytes(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn parses_ftyp_brands() {
        let mut body = Vec::new();
        body.extend_from_slice(b"isom");
        body.extend_from_slice(&512u32.to_be_bytes());
        body.extend_from_slice(b"isom");
        body.extend_from_slice(b"mp41");
        let ftyp = parse_ftyp(&body).unwrap();
        assert_eq!(ftyp.major_brand, "isom");
        assert_eq!(ftyp.minor_version, 512);
        assert_eq!(ftyp.compatible_brands, vec!["isom", "mp41"]);
    }

    #[test]
    fn parses_mvhd_v0_duration_in_microseconds() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes()); // version_flag
        body.extend_from_slice(&[0u8; 8]); // creation/modification time
        body.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        body.extend_from_slice(&2000u32.to_be_bytes()); // duration
        body.extend_from_slice(&[0u8; 4 + 2 + 2 + 8 + 36 + 24]);
        body.extend_from_slice(&7u32.to_be_bytes()); // next_track_id

        let mut mov = MovInfo::default();
        parse_mvhd(&body, &mut mov).unwrap();
        assert_eq!(mov.duration, 2_000_000.0);
        assert_eq!(mov.next_track_id, 7);
    }

    #[test]
    fn parses_stco_chunk_offsets() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&100u32.to_be_bytes());
        body.extend_from_slice(&5000u32.to_be_bytes());

        let mut track = TrackInfo::new(0);
        parse_stco(&box_bytes_body(&body), &mut track).unwrap();
        assert_eq!(track.chunk_offsets, vec![100, 5000]);
    }

    fn box_bytes_body(body: &[u8]) -> Vec<u8> {
        body.to_vec()
    }

    #[test]
    fn parses_stsz_constant_size() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&40u32.to_be_bytes()); // constant_size
        body.extend_from_slice(&3u32.to_be_bytes()); // sample_count

        let mut track = TrackInfo::new(0);
        parse_stsz(&body, &mut track).unwrap();
        assert_eq!(track.sample_sizes, vec![40, 40, 40]);
    }

    #[test]
    fn for_each_child_stops_on_truncated_box() {
        let mut data = box_bytes(b"mdhd", &[1, 2, 3]);
        data.truncate(data.len() - 1);
        let err = for_each_child(&data, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Mp4Error::ShortRead { .. }));
    }

    #[test]
    fn for_each_child_visits_every_sibling() {
        let mut data = box_bytes(b"tkhd", &[0xaa]);
        data.extend_from_slice(&box_bytes(b"mdia", &[0xbb]));
        let mut seen = Vec::new();
        for_each_child(&data, |box_type, _| {
            seen.push(box_type.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["tkhd", "mdia"]);
    }

    #[test]
    fn descriptor_length_only_retains_last_byte_low_bits() {
        assert_eq!(descriptor_length([0xff, 0xff, 0xff, 0x05]), 5);
        assert_eq!(descriptor_length([0x00, 0x00, 0x00, 0x80]), 0);
    }
}
