//! AAC `AudioSpecificConfig` parsing (ISO/IEC 14496-3), used by the MP4
//! demux engine to emit the AAC sequence-header packet from an `esds` box's
//! decoder-specific-info (§4.D.1).

use crate::error::CodecError;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// Parses the two-byte-minimum `AudioSpecificConfig` bitstream. Only
    /// the fields the demux engine needs to label a packet are extracted;
    /// SBR/PS extension configs are not unpacked.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::ShortRead { wanted: 2, have: data.len() });
        }
        let object_type = (data[0] >> 3) & 0x1f;
        let sampling_frequency_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let channel_configuration = (data[1] >> 3) & 0x0f;

        let sampling_frequency = *SAMPLE_RATES
            .get(sampling_frequency_index as usize)
            .ok_or_else(|| CodecError::BadExtradata(format!("sampling frequency index {} out of range", sampling_frequency_index)))?;

        Ok(AudioSpecificConfig { object_type, sampling_frequency_index, sampling_frequency, channel_configuration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aac_lc_44100_stereo() {
        // object_type=2 (AAC LC), freq_index=4 (44100), channels=2
        let data = [0b00010_0_10u8, 0b0_0010_000];
        let asc = AudioSpecificConfig::parse(&data).unwrap();
        assert_eq!(asc.object_type, 2);
        assert_eq!(asc.sampling_frequency_index, 4);
        assert_eq!(asc.sampling_frequency, 44100);
        assert_eq!(asc.channel_configuration, 2);
    }

    #[test]
    fn rejects_out_of_range_frequency_index() {
        let data = [0b00010_1_11u8, 0b1_0010_000];
        let err = AudioSpecificConfig::parse(&data).unwrap_err();
        assert!(matches!(err, CodecError::BadExtradata(_)));
    }

    #[test]
    fn rejects_short_config() {
        let err = AudioSpecificConfig::parse(&[0x12]).unwrap_err();
        assert!(matches!(err, CodecError::ShortRead { .. }));
    }
}
