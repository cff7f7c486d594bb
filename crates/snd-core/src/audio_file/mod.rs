//! RIFF/WAVE header handling
//!
//! Parses the chunks the mixer cares about: `fmt ` for the sample layout,
//! `data` for the payload extent, and `cue ` / `smpl` for the loop start.
//! Sample data itself is never read here; it goes through the wave cache.

mod compressed;

pub use compressed::{decode_compressed, DecodedAudio};

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::scale::pcm8_to_16;
use crate::types::SamplePair;

/// Plain integer PCM
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
/// WAVEFORMATEXTENSIBLE wrapper, accepted when the sub-format is PCM
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Audio file errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioFileError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),
    #[error("Missing required chunk: {0}")]
    MissingChunk(&'static str),
    #[error("File corrupted: {0}")]
    Corrupted(String),
}

fn io_err(e: std::io::Error) -> AudioFileError {
    AudioFileError::IoError(e.to_string())
}

/// Sample layout from the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
}

impl WaveFormat {
    /// 16-bit PCM layout with the given channel count and rate
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            sample_rate,
            bits_per_sample: 16,
            block_align: channels * 2,
        }
    }

    /// Check that the mixer can play this layout directly
    pub fn is_compatible(&self) -> Result<(), AudioFileError> {
        if self.format_tag != WAVE_FORMAT_PCM && self.format_tag != WAVE_FORMAT_EXTENSIBLE {
            return Err(AudioFileError::InvalidFormat(format!(
                "format tag {:#06x} is not PCM",
                self.format_tag
            )));
        }
        if self.bits_per_sample != 8 && self.bits_per_sample != 16 {
            return Err(AudioFileError::UnsupportedBitDepth(self.bits_per_sample));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(AudioFileError::UnsupportedChannels(self.channels));
        }
        let expected_align = self.channels * self.bits_per_sample / 8;
        if self.block_align != expected_align {
            return Err(AudioFileError::Corrupted(format!(
                "block align {} (expected {})",
                self.block_align, expected_align
            )));
        }
        Ok(())
    }

    /// Bytes per sample frame
    #[inline]
    pub fn sample_size(&self) -> usize {
        self.block_align as usize
    }
}

/// Everything the metadata cache needs from a wave header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveHeader {
    pub format: WaveFormat,
    /// Byte offset of the first sample in the file
    pub data_offset: u64,
    /// Payload size in bytes
    pub data_size: u32,
    /// Loop start in sample frames, if the file is marked as looping
    pub loop_start: Option<u32>,
}

impl WaveHeader {
    pub fn sample_count(&self) -> u32 {
        self.data_size / self.format.block_align.max(1) as u32
    }
}

/// Parse a RIFF/WAVE header from any seekable reader
pub fn parse_wave_header<R: Read + Seek>(reader: &mut R) -> Result<WaveHeader, AudioFileError> {
    let mut header = [0u8; 12];
    reader.read_exact(&mut header).map_err(io_err)?;
    if &header[0..4] != b"RIFF" {
        return Err(AudioFileError::InvalidFormat("Not a RIFF file".into()));
    }
    if &header[8..12] != b"WAVE" {
        return Err(AudioFileError::InvalidFormat("Not a WAVE file".into()));
    }

    let mut format: Option<WaveFormat> = None;
    let mut data: Option<(u64, u32)> = None;
    let mut cue_start: Option<u32> = None;
    let mut smpl_start: Option<u32> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        if reader.read_exact(&mut chunk_id).is_err() {
            break;
        }
        let mut size_bytes = [0u8; 4];
        if reader.read_exact(&mut size_bytes).is_err() {
            // Trailing garbage after the last full chunk
            break;
        }
        let chunk_size = u32::from_le_bytes(size_bytes);

        match &chunk_id {
            b"fmt " => {
                format = Some(read_fmt_chunk(reader, chunk_size)?);
            }
            b"data" => {
                let offset = reader.stream_position().map_err(io_err)?;
                data = Some((offset, chunk_size));
                reader
                    .seek(SeekFrom::Current(chunk_size as i64))
                    .map_err(io_err)?;
            }
            b"cue " => {
                let body = read_chunk_body(reader, chunk_size)?;
                cue_start = parse_cue_chunk(&body);
            }
            b"smpl" => {
                let body = read_chunk_body(reader, chunk_size)?;
                smpl_start = parse_smpl_chunk(&body);
            }
            _ => {
                reader
                    .seek(SeekFrom::Current(chunk_size as i64))
                    .map_err(io_err)?;
            }
        }

        // Pad to word boundary
        if chunk_size % 2 != 0 {
            reader.seek(SeekFrom::Current(1)).map_err(io_err)?;
        }
    }

    let format = format.ok_or(AudioFileError::MissingChunk("fmt"))?;
    let (data_offset, data_size) = data.ok_or(AudioFileError::MissingChunk("data"))?;
    format.is_compatible()?;

    // The sampler chunk carries the authoritative loop, cue is the fallback
    let header = WaveHeader {
        format,
        data_offset,
        data_size,
        loop_start: smpl_start.or(cue_start),
    };
    if let Some(start) = header.loop_start {
        if start >= header.sample_count() {
            log::warn!(
                "[WAVE] loop start {} beyond {} samples, ignoring",
                start,
                header.sample_count()
            );
            return Ok(WaveHeader {
                loop_start: None,
                ..header
            });
        }
    }
    Ok(header)
}

/// Parse the header of a wave file on disk
pub fn read_wave_header<P: AsRef<Path>>(path: P) -> Result<WaveHeader, AudioFileError> {
    let file = File::open(path.as_ref()).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    parse_wave_header(&mut reader)
}

fn read_chunk_body<R: Read>(reader: &mut R, size: u32) -> Result<Vec<u8>, AudioFileError> {
    let mut body = vec![0u8; size as usize];
    reader.read_exact(&mut body).map_err(io_err)?;
    Ok(body)
}

fn read_fmt_chunk<R: Read>(reader: &mut R, size: u32) -> Result<WaveFormat, AudioFileError> {
    if size < 16 {
        return Err(AudioFileError::Corrupted("fmt chunk too small".into()));
    }
    let fmt = read_chunk_body(reader, size)?;

    let mut format_tag = u16::from_le_bytes([fmt[0], fmt[1]]);
    if format_tag == WAVE_FORMAT_EXTENSIBLE && fmt.len() >= 26 {
        // First two bytes of the sub-format GUID hold the real tag
        format_tag = u16::from_le_bytes([fmt[24], fmt[25]]);
    }

    Ok(WaveFormat {
        format_tag,
        channels: u16::from_le_bytes([fmt[2], fmt[3]]),
        sample_rate: u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]),
        block_align: u16::from_le_bytes([fmt[12], fmt[13]]),
        bits_per_sample: u16::from_le_bytes([fmt[14], fmt[15]]),
    })
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// First cue point's sample offset
fn parse_cue_chunk(body: &[u8]) -> Option<u32> {
    let count = le_u32(body, 0)?;
    if count == 0 {
        return None;
    }
    // 24-byte cue records, sample offset is the last field
    le_u32(body, 4 + 20)
}

/// Start of the first sampler loop
fn parse_smpl_chunk(body: &[u8]) -> Option<u32> {
    let loops = le_u32(body, 28)?;
    if loops == 0 {
        return None;
    }
    // 36-byte header, then id, type, start, end, fraction, play count
    le_u32(body, 36 + 8)
}

/// Convert raw PCM bytes to sample pairs in the 16-bit domain
///
/// Mono sources are duplicated to both sides. Returns the number of whole
/// frames converted, bounded by both `bytes` and `out`.
pub fn decode_pcm(bytes: &[u8], format: &WaveFormat, out: &mut [SamplePair]) -> usize {
    let frame = format.sample_size();
    if frame == 0 {
        return 0;
    }
    let frames = (bytes.len() / frame).min(out.len());
    let bytes = &bytes[..frames * frame];

    match (format.bits_per_sample, format.channels) {
        (16, 1) => {
            for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = SamplePair::mono(i16::from_le_bytes([src[0], src[1]]) as i32);
            }
        }
        (16, 2) => {
            for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *dst = SamplePair::new(
                    i16::from_le_bytes([src[0], src[1]]) as i32,
                    i16::from_le_bytes([src[2], src[3]]) as i32,
                );
            }
        }
        (8, 1) => {
            for (dst, &src) in out.iter_mut().zip(bytes.iter()) {
                *dst = SamplePair::mono(pcm8_to_16(src));
            }
        }
        (8, 2) => {
            for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = SamplePair::new(pcm8_to_16(src[0]), pcm8_to_16(src[1]));
            }
        }
        _ => return 0,
    }
    frames
}

/// In-memory wave builder used by tests across the crate
#[cfg(test)]
pub(crate) mod test_support {
    /// Assemble a 16-bit PCM wave file
    pub fn wave_bytes(
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
        cue: Option<u32>,
        smpl: Option<u32>,
    ) -> Vec<u8> {
        let mut body = Vec::new();

        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&sample_rate.to_le_bytes());
        body.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        body.extend_from_slice(&(channels * 2).to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());

        body.extend_from_slice(b"data");
        body.extend_from_slice(&((samples.len() * 2) as u32).to_le_bytes());
        for s in samples {
            body.extend_from_slice(&s.to_le_bytes());
        }

        if let Some(start) = cue {
            body.extend_from_slice(b"cue ");
            body.extend_from_slice(&28u32.to_le_bytes());
            body.extend_from_slice(&1u32.to_le_bytes());
            body.extend_from_slice(&[0u8; 20]);
            body.extend_from_slice(&start.to_le_bytes());
        }

        if let Some(start) = smpl {
            body.extend_from_slice(b"smpl");
            body.extend_from_slice(&60u32.to_le_bytes());
            let mut chunk = [0u8; 60];
            chunk[28..32].copy_from_slice(&1u32.to_le_bytes());
            chunk[44..48].copy_from_slice(&start.to_le_bytes());
            body.extend_from_slice(&chunk);
        }

        let mut out = Vec::with_capacity(body.len() + 12);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    /// Mono ramp `0, 1, 2, ...` wrapping at i16 range
    pub fn ramp_samples(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 30000) as i16).collect()
    }
}
