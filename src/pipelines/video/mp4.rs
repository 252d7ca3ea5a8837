// SPDX-License-Identifier: MPL-2.0

//! In-memory MP4 writer for a single H.264/H.265 video track
//!
//! Samples are appended to `mdat` as they arrive (converted to 4-byte length
//! prefixes); the sample tables and `moov` are written once on
//! [`Mp4Writer::finish`]. Layout: `ftyp`, `mdat`, `moov`.

use crate::constants::video::{MEDIA_TIMESCALE, MOVIE_TIMESCALE};
use crate::media::encoders::video::VideoCodec;
use crate::media::formats::codec::{self, ParameterSets};
use std::fmt;
use tracing::{debug, warn};

/// Errors from finishing the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mp4Error {
    /// No sample was ever written
    NoSamples,
    /// A table field does not fit its box encoding
    TooLarge(String),
}

impl fmt::Display for Mp4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mp4Error::NoSamples => write!(f, "No samples written"),
            Mp4Error::TooLarge(what) => write!(f, "{} does not fit the container", what),
        }
    }
}

impl std::error::Error for Mp4Error {}

#[derive(Debug, Clone)]
struct Sample {
    /// Offset inside the mdat payload
    offset: u64,
    size: u32,
    pts_us: i64,
    keyframe: bool,
}

/// Single-track MP4 writer
#[derive(Debug)]
pub struct Mp4Writer {
    codec: VideoCodec,
    width: u32,
    height: u32,
    frame_interval_us: i64,
    params: ParameterSets,
    samples: Vec<Sample>,
    mdat: Vec<u8>,
}

const MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

fn begin_box(out: &mut Vec<u8>, fourcc: &[u8; 4]) -> usize {
    let start = out.len();
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(fourcc);
    start
}

fn begin_full_box(out: &mut Vec<u8>, fourcc: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = begin_box(out, fourcc);
    out.push(version);
    out.extend_from_slice(&flags.to_be_bytes()[1..]);
    start
}

fn end_box(out: &mut [u8], start: usize) {
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn us_to_media(us: i64) -> u64 {
    (us.max(0) as u64) * MEDIA_TIMESCALE as u64 / 1_000_000
}

impl Mp4Writer {
    /// Create a writer; `params` may be empty and filled in from the first
    /// keyframe
    pub fn new(
        codec: VideoCodec,
        width: u32,
        height: u32,
        frame_interval_us: i64,
        params: ParameterSets,
    ) -> Self {
        Self {
            codec,
            width,
            height,
            frame_interval_us: frame_interval_us.max(1),
            params,
            samples: Vec::new(),
            mdat: Vec::new(),
        }
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Payload bytes written so far
    pub fn payload_len(&self) -> usize {
        self.mdat.len()
    }

    /// Append one access unit
    pub fn write_sample(&mut self, data: &[u8], pts_us: i64, keyframe: bool) {
        if keyframe && !self.params.has_sps() {
            let found = codec::extract_parameter_sets(self.codec, data);
            if found.has_sps() {
                debug!("Parameter sets recovered from keyframe");
                self.params.merge(&found);
            }
        }

        let payload = codec::annex_b_to_length_prefixed(data);
        self.samples.push(Sample {
            offset: self.mdat.len() as u64,
            size: payload.len() as u32,
            pts_us,
            keyframe,
        });
        self.mdat.extend_from_slice(&payload);
    }

    fn ftyp(out: &mut Vec<u8>) {
        let start = begin_box(out, b"ftyp");
        out.extend_from_slice(b"isom");
        put_u32(out, 512);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            out.extend_from_slice(brand);
        }
        end_box(out, start);
    }

    /// Bytes of `ftyp` + `mdat` only, without an index
    ///
    /// Used when the sample tables cannot be written; players that scan
    /// `mdat` can still recover the stream.
    pub fn unindexed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.mdat.len() + 64);
        Self::ftyp(&mut out);
        Self::mdat_header(&mut out, self.mdat.len() as u64);
        out.extend_from_slice(&self.mdat);
        out
    }

    fn mdat_header(out: &mut Vec<u8>, payload_len: u64) {
        if payload_len + 8 > u32::MAX as u64 {
            put_u32(out, 1);
            out.extend_from_slice(b"mdat");
            put_u64(out, payload_len + 16);
        } else {
            put_u32(out, (payload_len + 8) as u32);
            out.extend_from_slice(b"mdat");
        }
    }

    /// Per-sample durations in media timescale units
    fn durations(&self) -> Vec<u32> {
        let default = us_to_media(self.frame_interval_us).max(1) as u32;
        let mut durations: Vec<u32> = self
            .samples
            .windows(2)
            .map(|w| {
                let delta = us_to_media(w[1].pts_us - w[0].pts_us);
                if delta == 0 { default } else { delta.min(u32::MAX as u64) as u32 }
            })
            .collect();
        if !self.samples.is_empty() {
            durations.push(durations.last().copied().unwrap_or(default));
        }
        durations
    }

    /// Write the complete file
    pub fn finish(&self) -> Result<Vec<u8>, Mp4Error> {
        if self.samples.is_empty() {
            return Err(Mp4Error::NoSamples);
        }
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            return Err(Mp4Error::TooLarge("Frame size".into()));
        }

        let mut out = Vec::with_capacity(self.mdat.len() + 1024 + self.samples.len() * 16);
        Self::ftyp(&mut out);
        Self::mdat_header(&mut out, self.mdat.len() as u64);
        let chunk_base = out.len() as u64;
        out.extend_from_slice(&self.mdat);

        let durations = self.durations();
        let media_duration: u64 = durations.iter().map(|&d| d as u64).sum();
        let movie_duration = media_duration * MOVIE_TIMESCALE as u64 / MEDIA_TIMESCALE as u64;

        let moov = begin_box(&mut out, b"moov");
        self.mvhd(&mut out, movie_duration);

        let trak = begin_box(&mut out, b"trak");
        self.tkhd(&mut out, movie_duration);
        let mdia = begin_box(&mut out, b"mdia");
        Self::mdhd(&mut out, media_duration);
        Self::hdlr(&mut out);
        let minf = begin_box(&mut out, b"minf");
        Self::vmhd(&mut out);
        Self::dinf(&mut out);
        let stbl = begin_box(&mut out, b"stbl");
        self.stsd(&mut out);
        Self::stts(&mut out, &durations);
        self.stss(&mut out);
        Self::stsc(&mut out);
        self.stsz(&mut out);
        self.chunk_offsets(&mut out, chunk_base);
        end_box(&mut out, stbl);
        end_box(&mut out, minf);
        end_box(&mut out, mdia);
        end_box(&mut out, trak);
        end_box(&mut out, moov);

        debug!(
            samples = self.samples.len(),
            bytes = out.len(),
            codec = %self.codec,
            "MP4 container written"
        );
        Ok(out)
    }

    fn mvhd(&self, out: &mut Vec<u8>, duration: u64) {
        let start = begin_full_box(out, b"mvhd", 0, 0);
        put_u32(out, 0); // creation_time
        put_u32(out, 0); // modification_time
        put_u32(out, MOVIE_TIMESCALE);
        put_u32(out, duration.min(u32::MAX as u64) as u32);
        put_u32(out, 0x0001_0000); // rate 1.0
        put_u16(out, 0x0100); // volume 1.0
        out.extend_from_slice(&[0; 10]);
        for v in MATRIX {
            put_u32(out, v);
        }
        out.extend_from_slice(&[0; 24]); // pre_defined
        put_u32(out, 2); // next_track_ID
        end_box(out, start);
    }

    fn tkhd(&self, out: &mut Vec<u8>, duration: u64) {
        // enabled | in_movie
        let start = begin_full_box(out, b"tkhd", 0, 0x3);
        put_u32(out, 0);
        put_u32(out, 0);
        put_u32(out, 1); // track_ID
        put_u32(out, 0);
        put_u32(out, duration.min(u32::MAX as u64) as u32);
        out.extend_from_slice(&[0; 8]);
        put_u16(out, 0); // layer
        put_u16(out, 0); // alternate_group
        put_u16(out, 0); // volume
        put_u16(out, 0);
        for v in MATRIX {
            put_u32(out, v);
        }
        put_u32(out, self.width << 16);
        put_u32(out, self.height << 16);
        end_box(out, start);
    }

    fn mdhd(out: &mut Vec<u8>, duration: u64) {
        let start = begin_full_box(out, b"mdhd", 0, 0);
        put_u32(out, 0);
        put_u32(out, 0);
        put_u32(out, MEDIA_TIMESCALE);
        put_u32(out, duration.min(u32::MAX as u64) as u32);
        put_u16(out, 0x55C4); // 'und'
        put_u16(out, 0);
        end_box(out, start);
    }

    fn hdlr(out: &mut Vec<u8>) {
        let start = begin_full_box(out, b"hdlr", 0, 0);
        put_u32(out, 0);
        out.extend_from_slice(b"vide");
        out.extend_from_slice(&[0; 12]);
        out.extend_from_slice(b"VideoHandler\0");
        end_box(out, start);
    }

    fn vmhd(out: &mut Vec<u8>) {
        let start = begin_full_box(out, b"vmhd", 0, 1);
        put_u16(out, 0); // graphicsmode
        out.extend_from_slice(&[0; 6]); // opcolor
        end_box(out, start);
    }

    fn dinf(out: &mut Vec<u8>) {
        let dinf = begin_box(out, b"dinf");
        let dref = begin_full_box(out, b"dref", 0, 0);
        put_u32(out, 1);
        // Self-contained: data is in this file
        let url = begin_full_box(out, b"url ", 0, 1);
        end_box(out, url);
        end_box(out, dref);
        end_box(out, dinf);
    }

    fn stsd(&self, out: &mut Vec<u8>) {
        let stsd = begin_full_box(out, b"stsd", 0, 0);
        put_u32(out, 1);

        let entry = begin_box(out, &self.codec.sample_entry());
        out.extend_from_slice(&[0; 6]);
        put_u16(out, 1); // data_reference_index
        put_u16(out, 0);
        put_u16(out, 0);
        out.extend_from_slice(&[0; 12]);
        put_u16(out, self.width as u16);
        put_u16(out, self.height as u16);
        put_u32(out, 0x0048_0000); // 72 dpi
        put_u32(out, 0x0048_0000);
        put_u32(out, 0);
        put_u16(out, 1); // frame_count
        out.extend_from_slice(&[0; 32]); // compressorname
        put_u16(out, 0x0018); // depth
        put_u16(out, 0xFFFF); // pre_defined = -1

        match codec::build_config_record(self.codec, &self.params) {
            Some(record) => {
                let fourcc = match self.codec {
                    VideoCodec::H264 => b"avcC",
                    VideoCodec::HEVC => b"hvcC",
                };
                let config = begin_box(out, fourcc);
                out.extend_from_slice(&record);
                end_box(out, config);
            }
            None => {
                warn!(
                    codec = %self.codec,
                    "No parameter sets available, writing sample entry without configuration record"
                );
            }
        }

        end_box(out, entry);
        end_box(out, stsd);
    }

    fn stts(out: &mut Vec<u8>, durations: &[u32]) {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &d in durations {
            match runs.last_mut() {
                Some((count, delta)) if *delta == d => *count += 1,
                _ => runs.push((1, d)),
            }
        }

        let start = begin_full_box(out, b"stts", 0, 0);
        put_u32(out, runs.len() as u32);
        for (count, delta) in runs {
            put_u32(out, count);
            put_u32(out, delta);
        }
        end_box(out, start);
    }

    fn stss(&self, out: &mut Vec<u8>) {
        let sync: Vec<u32> = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.keyframe)
            .map(|(i, _)| i as u32 + 1)
            .collect();

        let start = begin_full_box(out, b"stss", 0, 0);
        put_u32(out, sync.len() as u32);
        for n in sync {
            put_u32(out, n);
        }
        end_box(out, start);
    }

    fn stsc(out: &mut Vec<u8>) {
        // One sample per chunk
        let start = begin_full_box(out, b"stsc", 0, 0);
        put_u32(out, 1);
        put_u32(out, 1); // first_chunk
        put_u32(out, 1); // samples_per_chunk
        put_u32(out, 1); // sample_description_index
        end_box(out, start);
    }

    fn stsz(&self, out: &mut Vec<u8>) {
        let start = begin_full_box(out, b"stsz", 0, 0);
        put_u32(out, 0);
        put_u32(out, self.samples.len() as u32);
        for sample in &self.samples {
            put_u32(out, sample.size);
        }
        end_box(out, start);
    }

    fn chunk_offsets(&self, out: &mut Vec<u8>, base: u64) {
        let last = self.samples.last().map_or(0, |s| s.offset) + base;
        if last > u32::MAX as u64 {
            let start = begin_full_box(out, b"co64", 0, 0);
            put_u32(out, self.samples.len() as u32);
            for sample in &self.samples {
                put_u64(out, base + sample.offset);
            }
            end_box(out, start);
        } else {
            let start = begin_full_box(out, b"stco", 0, 0);
            put_u32(out, self.samples.len() as u32);
            for sample in &self.samples {
                put_u32(out, (base + sample.offset) as u32);
            }
            end_box(out, start);
        }
    }
}
