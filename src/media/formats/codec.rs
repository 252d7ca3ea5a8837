// SPDX-License-Identifier: GPL-3.0-only

//! H.264/H.265 bitstream helpers
//!
//! Encoders hand back access units in Annex-B framing (start-code delimited),
//! sometimes in length-prefixed (AVCC) framing, and configuration data may
//! arrive as raw parameter sets or as an `avcC` decoder configuration record.
//! These helpers find the parameter sets in any of those shapes, classify
//! NAL units, and build the configuration records MP4 sample entries need.

use crate::media::encoders::video::VideoCodec;

/// H.264 NAL unit types
pub mod h264 {
    pub const IDR: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
}

/// H.265 NAL unit types
pub mod hevc {
    pub const BLA_W_LP: u8 = 16;
    pub const CRA: u8 = 21;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
}

/// Codec parameter sets, each NAL unit including its header byte(s)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    pub vps: Vec<Vec<u8>>,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl ParameterSets {
    /// The primary configuration record (SPS) is present
    pub fn has_sps(&self) -> bool {
        !self.sps.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.vps.is_empty() && self.sps.is_empty() && self.pps.is_empty()
    }

    /// Add parameter sets found in `nals`, skipping duplicates
    fn collect<'a>(&mut self, codec: VideoCodec, nals: impl IntoIterator<Item = &'a [u8]>) {
        for nal in nals {
            let target = match (codec, nal_type(codec, nal)) {
                (VideoCodec::H264, Some(h264::SPS)) => &mut self.sps,
                (VideoCodec::H264, Some(h264::PPS)) => &mut self.pps,
                (VideoCodec::HEVC, Some(hevc::VPS)) => &mut self.vps,
                (VideoCodec::HEVC, Some(hevc::SPS)) => &mut self.sps,
                (VideoCodec::HEVC, Some(hevc::PPS)) => &mut self.pps,
                _ => continue,
            };
            if !target.iter().any(|existing| existing == nal) {
                target.push(nal.to_vec());
            }
        }
    }

    /// Fill in whatever `other` has that `self` lacks
    pub fn merge(&mut self, other: &ParameterSets) {
        for (mine, theirs) in [
            (&mut self.vps, &other.vps),
            (&mut self.sps, &other.sps),
            (&mut self.pps, &other.pps),
        ] {
            for nal in theirs {
                if !mine.contains(nal) {
                    mine.push(nal.clone());
                }
            }
        }
    }
}

/// NAL unit type of `nal` (header included)
pub fn nal_type(codec: VideoCodec, nal: &[u8]) -> Option<u8> {
    let header = *nal.first()?;
    Some(match codec {
        VideoCodec::H264 => header & 0x1F,
        VideoCodec::HEVC => (header >> 1) & 0x3F,
    })
}

/// Split an Annex-B byte stream into NAL units
///
/// Accepts both 3- and 4-byte start codes. Returns an empty list unless the
/// data begins with a start code.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    if !starts_with_start_code(data) {
        return Vec::new();
    }

    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(data.len(), |&next| next - 3);
        // Trailing zero belongs to the next 4-byte start code
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            nals.push(&data[start..end]);
        }
    }
    nals
}

fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Split length-prefixed (AVCC/HVCC) data into NAL units
///
/// Returns `None` unless the length fields tile the buffer exactly.
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> Option<Vec<&[u8]>> {
    if !(1..=4).contains(&length_size) || data.is_empty() {
        return None;
    }

    let mut nals = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let header = data.get(pos..pos + length_size)?;
        let len = header.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += length_size;
        if len == 0 {
            return None;
        }
        nals.push(data.get(pos..pos + len)?);
        pos += len;
    }
    Some(nals)
}

/// NAL units of an access unit in whichever framing it arrived
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let annex_b = split_annex_b(data);
    if !annex_b.is_empty() {
        return annex_b;
    }
    split_length_prefixed(data, 4).unwrap_or_default()
}

/// Parse an `avcC` decoder configuration record
pub fn parse_avcc_record(data: &[u8]) -> Option<ParameterSets> {
    if data.len() < 7 || data[0] != 1 {
        return None;
    }

    let mut sets = ParameterSets::default();
    let mut pos = 5;

    let sps_count = (*data.get(pos)? & 0x1F) as usize;
    pos += 1;
    for _ in 0..sps_count {
        let (nal, next) = read_u16_prefixed(data, pos)?;
        sets.sps.push(nal.to_vec());
        pos = next;
    }

    let pps_count = *data.get(pos)? as usize;
    pos += 1;
    for _ in 0..pps_count {
        let (nal, next) = read_u16_prefixed(data, pos)?;
        sets.pps.push(nal.to_vec());
        pos = next;
    }

    Some(sets)
}

fn read_u16_prefixed(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let len_bytes = data.get(pos..pos + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = pos + 2;
    Some((data.get(start..start + len)?, start + len))
}

/// Find the parameter sets carried by `data`
///
/// Tries Annex-B start codes first, then 4-byte length prefixes, then an
/// `avcC` record. The result is empty if none of them yields anything.
pub fn extract_parameter_sets(codec: VideoCodec, data: &[u8]) -> ParameterSets {
    let mut sets = ParameterSets::default();

    let annex_b = split_annex_b(data);
    if !annex_b.is_empty() {
        sets.collect(codec, annex_b);
        if !sets.is_empty() {
            return sets;
        }
    }

    if let Some(nals) = split_length_prefixed(data, 4) {
        sets.collect(codec, nals);
        if !sets.is_empty() {
            return sets;
        }
    }

    if codec == VideoCodec::H264
        && let Some(record) = parse_avcc_record(data)
    {
        return record;
    }

    sets
}

/// Parameter sets from several configuration buffers (e.g. `csd-0`, `csd-1`)
pub fn extract_from_buffers<B: AsRef<[u8]>>(codec: VideoCodec, buffers: &[B]) -> ParameterSets {
    let mut sets = ParameterSets::default();
    for buffer in buffers {
        sets.merge(&extract_parameter_sets(codec, buffer.as_ref()));
    }
    sets
}

/// Whether `nal_type` starts a random-access point
pub fn is_irap(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        VideoCodec::H264 => nal_type == h264::IDR,
        VideoCodec::HEVC => (hevc::BLA_W_LP..=hevc::CRA).contains(&nal_type),
    }
}

/// Keyframe detection: the encoder's flag, or any IDR/IRAP NAL in the data
pub fn is_keyframe(codec: VideoCodec, data: &[u8], flagged: bool) -> bool {
    flagged
        || split_nal_units(data)
            .iter()
            .filter_map(|nal| nal_type(codec, nal))
            .any(|t| is_irap(codec, t))
}

/// Rewrite Annex-B framing into 4-byte length prefixes for MP4 samples
///
/// Data without start codes is assumed to be length-prefixed already and is
/// returned unchanged.
pub fn annex_b_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let nals = split_annex_b(data);
    if nals.is_empty() {
        return data.to_vec();
    }

    let total: usize = nals.iter().map(|n| n.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Strip emulation-prevention bytes (`00 00 03` -> `00 00`)
fn unescape_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &b in nal {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Build an `avcC` decoder configuration record (4-byte NAL lengths)
pub fn build_avcc(sets: &ParameterSets) -> Option<Vec<u8>> {
    let sps = sets.sps.first()?;
    if sps.len() < 4 {
        return None;
    }

    let mut out = vec![
        1,      // configurationVersion
        sps[1], // AVCProfileIndication
        sps[2], // profile_compatibility
        sps[3], // AVCLevelIndication
        0xFF,   // lengthSizeMinusOne = 3
        0xE0 | (sets.sps.len().min(31) as u8),
    ];
    for nal in sets.sps.iter().take(31) {
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out.push(sets.pps.len().min(255) as u8);
    for nal in sets.pps.iter().take(255) {
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }
    Some(out)
}

/// Build an `hvcC` decoder configuration record (4-byte NAL lengths)
///
/// Profile, tier and level are copied from the SPS profile_tier_level; the
/// remaining fields assume 8-bit 4:2:0, which is all the converter produces.
pub fn build_hvcc(sets: &ParameterSets) -> Option<Vec<u8>> {
    let sps = unescape_rbsp(sets.sps.first()?);
    // 2-byte NAL header, 1 byte of VPS id/sub-layers, 12 bytes of PTL
    if sps.len() < 15 {
        return None;
    }

    let max_sub_layers = ((sps[2] >> 1) & 0x07) + 1;
    let temporal_id_nested = sps[2] & 0x01;

    let mut out = Vec::with_capacity(64);
    out.push(1); // configurationVersion
    out.push(sps[3]); // profile_space, tier_flag, profile_idc
    out.extend_from_slice(&sps[4..8]); // profile_compatibility_flags
    out.extend_from_slice(&sps[8..14]); // constraint_indicator_flags
    out.push(sps[14]); // level_idc
    out.extend_from_slice(&0xF000u16.to_be_bytes()); // min_spatial_segmentation_idc
    out.push(0xFC); // parallelismType
    out.push(0xFD); // chroma_format_idc = 1
    out.push(0xF8); // bit_depth_luma_minus8 = 0
    out.push(0xF8); // bit_depth_chroma_minus8 = 0
    out.extend_from_slice(&0u16.to_be_bytes()); // avgFrameRate
    out.push(((max_sub_layers & 0x07) << 3) | (temporal_id_nested << 2) | 0x03);

    let arrays = [
        (hevc::VPS, &sets.vps),
        (hevc::SPS, &sets.sps),
        (hevc::PPS, &sets.pps),
    ];
    out.push(arrays.iter().filter(|(_, nals)| !nals.is_empty()).count() as u8);
    for (nal_type, nals) in arrays {
        if nals.is_empty() {
            continue;
        }
        out.push(0x80 | nal_type); // array_completeness
        out.extend_from_slice(&(nals.len() as u16).to_be_bytes());
        for nal in nals {
            out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            out.extend_from_slice(nal);
        }
    }

    Some(out)
}

/// Codec configuration record for an MP4 sample entry
pub fn build_config_record(codec: VideoCodec, sets: &ParameterSets) -> Option<Vec<u8>> {
    match codec {
        VideoCodec::H264 => build_avcc(sets),
        VideoCodec::HEVC => build_hvcc(sets),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x21];
    const SLICE: &[u8] = &[0x41, 0x9A, 0x02];

    fn annex_b(nals: &[&[u8]], four_byte: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            if four_byte {
                out.push(0);
            }
            out.extend_from_slice(&[0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_split_mixed_start_codes() {
        let mut data = annex_b(&[SPS], true);
        data.extend(annex_b(&[PPS, IDR], false));
        let nals = split_annex_b(&data);
        assert_eq!(nals, vec![SPS, PPS, IDR]);
    }

    #[test]
    fn test_extract_from_annex_b() {
        let data = annex_b(&[SPS, PPS, IDR], true);
        let sets = extract_parameter_sets(VideoCodec::H264, &data);
        assert_eq!(sets.sps, vec![SPS.to_vec()]);
        assert_eq!(sets.pps, vec![PPS.to_vec()]);
    }

    #[test]
    fn test_extract_from_length_prefixed() {
        let mut data = Vec::new();
        for nal in [SPS, PPS] {
            data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            data.extend_from_slice(nal);
        }
        let sets = extract_parameter_sets(VideoCodec::H264, &data);
        assert!(sets.has_sps());
        assert_eq!(sets.pps.len(), 1);
    }

    #[test]
    fn test_avcc_record_round_trips_through_parser() {
        let sets = ParameterSets {
            vps: Vec::new(),
            sps: vec![SPS.to_vec()],
            pps: vec![PPS.to_vec()],
        };
        let record = build_avcc(&sets).unwrap();
        assert_eq!(&record[..5], &[1, 0x42, 0xC0, 0x1E, 0xFF]);
        assert_eq!(parse_avcc_record(&record), Some(sets.clone()));
        assert_eq!(extract_parameter_sets(VideoCodec::H264, &record), sets);
    }

    #[test]
    fn test_keyframe_detection() {
        let key = annex_b(&[SPS, PPS, IDR], true);
        let delta = annex_b(&[SLICE], true);
        assert!(is_keyframe(VideoCodec::H264, &key, false));
        assert!(!is_keyframe(VideoCodec::H264, &delta, false));
        assert!(is_keyframe(VideoCodec::H264, &delta, true));
    }

    #[test]
    fn test_hevc_nal_types() {
        let vps = [0x40, 0x01, 0x0C];
        let idr = [0x26, 0x01, 0xAF];
        assert_eq!(nal_type(VideoCodec::HEVC, &vps), Some(hevc::VPS));
        assert!(is_irap(VideoCodec::HEVC, nal_type(VideoCodec::HEVC, &idr).unwrap()));
    }

    #[test]
    fn test_length_prefixed_conversion() {
        let data = annex_b(&[SLICE], true);
        let converted = annex_b_to_length_prefixed(&data);
        assert_eq!(&converted[..4], &[0, 0, 0, 3]);
        assert_eq!(&converted[4..], SLICE);
        // Already length-prefixed data is left alone
        assert_eq!(annex_b_to_length_prefixed(&converted), converted);
    }

    #[test]
    fn test_unescape_rbsp() {
        assert_eq!(unescape_rbsp(&[0, 0, 3, 1, 5]), vec![0, 0, 1, 5]);
    }

    #[test]
    fn test_garbage_yields_no_parameter_sets() {
        let sets = extract_parameter_sets(VideoCodec::H264, &[0xFF, 0xFE, 0xFD]);
        assert!(sets.is_empty());
    }
}
