//! H.265 NALU classification and `HVCC`/`LHVC` decoder-configuration-record
//! parsing, grounded on `GetHevcDecInfoFromExtradata` /
//! `GetLHevcDecInfoFromExtradata` (§4.D.1, §9 Open Question on LHEVC field
//! extraction).

use crate::bytestream::ByteReader;
use crate::error::CodecError;

pub const NAL_UNIT_VPS: u8 = 32;
pub const NAL_UNIT_SPS: u8 = 33;
pub const NAL_UNIT_PPS: u8 = 34;

/// The NAL unit type field (bits 1-6 of the first header byte, per the
/// two-byte HEVC NAL header).
pub fn nal_type(first_byte: u8) -> u8 {
    (first_byte >> 1) & 0x3f
}

pub fn is_vps(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_UNIT_VPS
}

pub fn is_sps(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_UNIT_SPS
}

pub fn is_pps(first_byte: u8) -> bool {
    nal_type(first_byte) == NAL_UNIT_PPS
}

/// One `nalArray` entry of an `HEVCDecoderConfigurationRecord`: a run of
/// NALUs sharing a single `nal_unit_type`.
#[derive(Debug, Clone)]
pub struct HevcNaluArray {
    pub array_completeness: u8,
    pub nal_unit_type: u8,
    pub nalus: Vec<Vec<u8>>,
}

/// Parsed `HEVCDecoderConfigurationRecord` (ISO/IEC 14496-15).
#[derive(Debug, Clone)]
pub struct HevcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bitdepth_luma_minus8: u8,
    pub bitdepth_chroma_minus8: u8,
    pub avg_framerate: u16,
    pub constant_framerate: u8,
    pub num_temporal_layers: u8,
    pub temporalid_nested: u8,
    pub length_size_minus_one: u8,
    pub nalu_arrays: Vec<HevcNaluArray>,
}

impl HevcDecoderConfigurationRecord {
    /// Parses an `hvcC` box payload. Fails with `bad extradata` when the
    /// configuration version is not 1, exactly as
    /// `GetHevcDecInfoFromExtradata` returns `-1` on that mismatch.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(data);

        let configuration_version = r.read_u8()?;
        if configuration_version != 1 {
            return Err(CodecError::BadExtradata(format!(
                "unsupported hvcC configuration_version {}",
                configuration_version
            )));
        }

        let b = r.read_u8()?;
        let general_profile_space = (b >> 6) & 0x03;
        let general_tier_flag = (b >> 5) & 0x01;
        let general_profile_idc = b & 0x1f;

        let general_profile_compatibility_flags = r.read_u32()?;

        let hi = r.read_u32()? as u64;
        let lo = r.read_u16()? as u64;
        let general_constraint_indicator_flags = (hi << 16) | lo;

        let general_level_idc = r.read_u8()?;
        let min_spatial_segmentation_idc = r.read_u16()? & 0x0fff;
        let parallelism_type = r.read_u8()? & 0x03;
        let chroma_format = r.read_u8()? & 0x03;
        let bitdepth_luma_minus8 = r.read_u8()? & 0x07;
        let bitdepth_chroma_minus8 = r.read_u8()? & 0x07;
        let avg_framerate = r.read_u16()?;

        let b = r.read_u8()?;
        let constant_framerate = (b >> 6) & 0x03;
        let num_temporal_layers = (b >> 3) & 0x07;
        let temporalid_nested = (b >> 2) & 0x01;
        let length_size_minus_one = b & 0x03;

        let arrays_num = r.read_u8()?;
        let mut nalu_arrays = Vec::with_capacity(arrays_num as usize);
        for _ in 0..arrays_num {
            let b = r.read_u8()?;
            let array_completeness = (b >> 7) & 0x01;
            let nal_unit_type = b & 0x3f;
            let num_nalus = r.read_u16()?;
            let mut nalus = Vec::with_capacity(num_nalus as usize);
            for _ in 0..num_nalus {
                let len = r.read_u16()? as usize;
                nalus.push(r.read_bytes(len)?.to_vec());
            }
            nalu_arrays.push(HevcNaluArray { array_completeness, nal_unit_type, nalus });
        }

        Ok(HevcDecoderConfigurationRecord {
            configuration_version,
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
            min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format,
            bitdepth_luma_minus8,
            bitdepth_chroma_minus8,
            avg_framerate,
            constant_framerate,
            num_temporal_layers,
            temporalid_nested,
            length_size_minus_one,
            nalu_arrays,
        })
    }

    /// The first VPS, SPS and PPS NALU bytes, used for the one-time
    /// sequence-header emission (§4.D.1). Fails with `bad extradata` when
    /// any of the three is absent, mirroring `GetVpsSpsPpsFromHevcDecInfo`.
    pub fn first_vps_sps_pps(&self) -> Result<(&[u8], &[u8], &[u8]), CodecError> {
        let mut vps: Option<&[u8]> = None;
        let mut sps: Option<&[u8]> = None;
        let mut pps: Option<&[u8]> = None;
        for array in &self.nalu_arrays {
            let Some(first) = array.nalus.first() else { continue };
            match array.nal_unit_type {
                t if t == NAL_UNIT_VPS => vps.get_or_insert(first.as_slice()),
                t if t == NAL_UNIT_SPS => sps.get_or_insert(first.as_slice()),
                t if t == NAL_UNIT_PPS => pps.get_or_insert(first.as_slice()),
                _ => continue,
            };
        }
        match (vps, sps, pps) {
            (Some(vps), Some(sps), Some(pps)) => Ok((vps, sps, pps)),
            _ => Err(CodecError::BadExtradata("missing VPS, SPS or PPS in hvcC".into())),
        }
    }
}

/// Parsed `L-HEVC` (Layered HEVC / MV-HEVC extension) decoder-configuration
/// record. The original parser derives `num_temporal_layers` and
/// `temporalid_nested` as boolean comparisons rather than shifted field
/// extractions; this keeps that behavior rather than correcting it, per the
/// design note on LHEVC field fidelity.
#[derive(Debug, Clone)]
pub struct LhevcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub num_temporal_layers: bool,
    pub temporalid_nested: bool,
    pub length_size_minus_one: u8,
    pub nalu_arrays: Vec<HevcNaluArray>,
}

impl LhevcDecoderConfigurationRecord {
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(data);

        let configuration_version = r.read_u8()?;

        let b0 = r.read_u8()?;
        let b1 = r.read_u8()?;
        let min_spatial_segmentation_idc = (((b0 & 0x0f) as u16) << 8) | b1 as u16;

        let parallelism_type = r.read_u8()? & 0x03;

        let b = r.read_u8()?;
        let num_temporal_layers = (b & 0x38) > 3;
        let temporalid_nested = (b & 0x04) > 2;
        let length_size_minus_one = b & 0x03;

        let arrays_num = r.read_u8()?;
        let mut nalu_arrays = Vec::with_capacity(arrays_num as usize);
        for _ in 0..arrays_num {
            let b = r.read_u8()?;
            let array_completeness = (b >> 7) & 0x01;
            let nal_unit_type = b & 0x3f;
            let num_nalus = r.read_u16()?;
            let mut nalus = Vec::with_capacity(num_nalus as usize);
            for _ in 0..num_nalus {
                let len = r.read_u16()? as usize;
                nalus.push(r.read_bytes(len)?.to_vec());
            }
            nalu_arrays.push(HevcNaluArray { array_completeness, nal_unit_type, nalus });
        }

        Ok(LhevcDecoderConfigurationRecord {
            configuration_version,
            min_spatial_segmentation_idc,
            parallelism_type,
            num_temporal_layers,
            temporalid_nested,
            length_size_minus_one,
            nalu_arrays,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hvcc() -> Vec<u8> {
        let mut data = vec![
            1u8, // configuration_version
            0b01_1_00001, // profile_space=01, tier=1, profile_idc=00001
            0x00, 0x00, 0x00, 0x01, // compatibility flags
            0x00, 0x00, 0x00, 0x01, 0x00, 0x01, // constraint indicator (48 bits)
            120, // level_idc
            0x00, 0x00, // min_spatial_segmentation_idc
            0x00, // parallelism_type
            0x01, // chroma_format
            0x00, // bitdepth luma
            0x00, // bitdepth chroma
            0x00, 0x00, // avg framerate
            0b00_001_0_11, // constant_framerate/num_temporal/nested/length_size
            3u8, // arrays_num
        ];
        // VPS array: 1 nalu
        data.push(NAL_UNIT_VPS);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&[0x40, 0x01, 0x0c]);
        // SPS array: 1 nalu
        data.push(NAL_UNIT_SPS);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&[0x42, 0x01]);
        // PPS array: 1 nalu
        data.push(NAL_UNIT_PPS);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&[0x44, 0x01]);
        data
    }

    #[test]
    fn parses_configuration_version() {
        let dcr = HevcDecoderConfigurationRecord::parse(&sample_hvcc()).unwrap();
        assert_eq!(dcr.configuration_version, 1);
        assert_eq!(dcr.nalu_arrays.len(), 3);
    }

    #[test]
    fn extracts_first_vps_sps_pps() {
        let dcr = HevcDecoderConfigurationRecord::parse(&sample_hvcc()).unwrap();
        let (vps, sps, pps) = dcr.first_vps_sps_pps().unwrap();
        assert_eq!(vps, &[0x40, 0x01, 0x0c]);
        assert_eq!(sps, &[0x42, 0x01]);
        assert_eq!(pps, &[0x44, 0x01]);
    }

    #[test]
    fn rejects_unsupported_configuration_version() {
        let mut data = sample_hvcc();
        data[0] = 2;
        let err = HevcDecoderConfigurationRecord::parse(&data).unwrap_err();
        assert!(matches!(err, CodecError::BadExtradata(_)));
    }

    #[test]
    fn classify_nal_types() {
        assert!(is_vps(NAL_UNIT_VPS << 1));
        assert!(is_sps(NAL_UNIT_SPS << 1));
        assert!(is_pps(NAL_UNIT_PPS << 1));
    }

    #[test]
    fn lhevc_temporal_fields_are_booleans_not_shifted_values() {
        // byte: constant_framerate(2) num_temporal_layers(3)=0b101 temporalid_nested(1)=1 length_size(2)=0b01
        let byte = 0b00_101_1_01u8;
        let data = vec![1u8, 0x00, 0x00, 0x00, byte, 0u8];
        let dcr = LhevcDecoderConfigurationRecord::parse(&data).unwrap();
        assert!(dcr.num_temporal_layers);
        assert!(dcr.temporalid_nested);
        assert_eq!(dcr.length_size_minus_one, 0b01);
    }
}
