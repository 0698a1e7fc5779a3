//! H.264 NALU classification, AVCC↔Annex-B conversion, and
//! AVCDecoderConfigurationRecord parsing (§4.D.1, §4.D.3, §8).

use crate::bytestream::ByteReader;
use crate::error::CodecError;

pub const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

const MAX_NALU_LEN: usize = 10_000_000;

pub const NAL_TYPE_SLICE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

/// The NAL unit type field (low 5 bits of the first header byte).
pub fn nal_type(first_byte: u8) -> u8 {
    first_byte & 0x1f
}

pub fn is_idr(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_TYPE_SLICE_IDR
}

pub fn is_sps(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_TYPE_SPS
}

pub fn is_pps(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_TYPE_PPS
}

/// Parsed `AVCDecoderConfigurationRecord` (ISO/IEC 14496-15): just the
/// fields the demux engine needs — the SPS/PPS NALU lists and the AVCC
/// length-field size.
#[derive(Debug, Clone)]
pub struct AvcDecoderConfigurationRecord {
    pub nalu_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcDecoderConfigurationRecord {
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(data);
        let _configuration_version = r.read_u8()?;
        let _avc_profile_indication = r.read_u8()?;
        let _profile_compatibility = r.read_u8()?;
        let _avc_level_indication = r.read_u8()?;
        let length_size_byte = r.read_u8()?;
        let nalu_length_size = (length_size_byte & 0x03) + 1;

        let num_sps_byte = r.read_u8()?;
        let num_sps = num_sps_byte & 0x1f;
        let mut sps = Vec::with_capacity(num_sps as usize);
        for _ in 0..num_sps {
            let len = r.read_u16()? as usize;
            sps.push(r.read_bytes(len)?.to_vec());
        }

        let num_pps = r.read_u8()?;
        let mut pps = Vec::with_capacity(num_pps as usize);
        for _ in 0..num_pps {
            let len = r.read_u16()? as usize;
            pps.push(r.read_bytes(len)?.to_vec());
        }

        Ok(AvcDecoderConfigurationRecord { nalu_length_size, sps, pps })
    }

    /// The first SPS and PPS, used for the one-time sequence-header
    /// emission (§4.D.1). Fails with `bad extradata` when either is
    /// missing or empty.
    pub fn first_sps_pps(&self) -> Result<(&[u8], &[u8]), CodecError> {
        let sps = self.sps.first().map(|v| v.as_slice()).unwrap_or(&[]);
        let pps = self.pps.first().map(|v| v.as_slice()).unwrap_or(&[]);
        if sps.is_empty() || pps.is_empty() {
            return Err(CodecError::BadExtradata("missing SPS or PPS in AVCDecoderConfigurationRecord".into()));
        }
        Ok((sps, pps))
    }
}

/// Wraps a single NALU in Annex-B framing (`00 00 00 01` + nalu bytes).
pub fn annex_b_frame(nalu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nalu.len() + ANNEX_B_START_CODE.len());
    out.extend_from_slice(&ANNEX_B_START_CODE);
    out.extend_from_slice(nalu);
    out
}

/// Splits one AVCC-framed sample (a sequence of `(4-byte length, nalu)`)
/// into its constituent NALU byte ranges. Rejects any declared length
/// greater than 10,000,000 bytes as `protocol-malformed` (§4.D.3).
pub fn split_avcc_sample(sample: &[u8]) -> Result<Vec<&[u8]>, CodecError> {
    let mut nalus = Vec::new();
    let mut pos = 0usize;
    while pos < sample.len() {
        if sample.len() - pos < 4 {
            return Err(CodecError::ShortRead { wanted: 4, have: sample.len() - pos });
        }
        let len = read_u24_len(&sample[pos..pos + 4]);
        if len > MAX_NALU_LEN {
            return Err(CodecError::Malformed(format!("nalu length {} exceeds maximum", len)));
        }
        pos += 4;
        if sample.len() - pos < len {
            return Err(CodecError::ShortRead { wanted: len, have: sample.len() - pos });
        }
        nalus.push(&sample[pos..pos + len]);
        pos += len;
    }
    Ok(nalus)
}

fn read_u24_len(buf: &[u8]) -> usize {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

/// Concatenates `(4-byte length, nalu)` for each of `nalus`, the inverse of
/// [`split_avcc_sample`] (§8 AVCC↔Annex-B invariant).
pub fn nalus_to_avcc(nalus: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nalu in nalus {
        out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        out.extend_from_slice(nalu);
    }
    out
}

/// Splits an Annex-B byte stream into NALU byte ranges (without start
/// codes), tolerating both 4-byte and 3-byte start codes.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            }
        }
        i += 1;
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map(|&s| start_code_len_before(data, s)).unwrap_or(data.len());
        nalus.push(&data[start..end]);
    }
    nalus
}

fn start_code_len_before(data: &[u8], next_start: usize) -> usize {
    // next_start points just past the following start code; walk back to
    // find where it began.
    if next_start >= 4 && data[next_start - 4] == 0 && data[next_start - 3] == 0 && data[next_start - 2] == 0 && data[next_start - 1] == 1 {
        next_start - 4
    } else {
        next_start - 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avcc_round_trip() {
        let nalus: Vec<&[u8]> = vec![&[0x67, 0x01, 0x02], &[0x68, 0x03]];
        let avcc = nalus_to_avcc(&nalus);
        let parsed = split_avcc_sample(&avcc).unwrap();
        assert_eq!(parsed, nalus);
    }

    #[test]
    fn annex_b_round_trip_up_to_framing() {
        let nalus: Vec<&[u8]> = vec![&[0x67, 0xaa], &[0x68, 0xbb, 0xcc]];
        let mut annex_b = Vec::new();
        for n in &nalus {
            annex_b.extend_from_slice(&annex_b_frame(n));
        }
        let parsed = split_annex_b(&annex_b);
        assert_eq!(parsed, nalus);
    }

    #[test]
    fn oversize_nalu_length_is_malformed() {
        let mut sample = vec![0u8; 4];
        sample[0] = 0x01; // 0x01000000 > 10_000_000
        let err = split_avcc_sample(&sample).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn extradata_with_missing_pps_is_bad_extradata() {
        // configuration_version, profile, compat, level, length_size_byte,
        // num_sps=1, sps_len=2, sps bytes, num_pps=0
        let data = [1u8, 0x64, 0x00, 0x1f, 0xff, 0x01, 0x00, 0x02, 0x67, 0x01, 0x00];
        let dcr = AvcDecoderConfigurationRecord::parse(&data).unwrap();
        let err = dcr.first_sps_pps().unwrap_err();
        assert!(matches!(err, CodecError::BadExtradata(_)));
    }

    #[test]
    fn classify_nal_types() {
        assert!(is_sps(0x67));
        assert!(is_pps(0x68));
        assert!(is_idr(0x65));
    }
}
