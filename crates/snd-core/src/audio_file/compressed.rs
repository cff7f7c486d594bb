//! Compressed source decoding
//!
//! Compressed assets (MP3, FLAC) are decoded once into resident 16-bit PCM
//! and from then on mix exactly like a wave.

use std::io::Cursor;

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};

use super::{AudioFileError, WaveFormat};

/// Fully decoded compressed asset
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Always 16-bit PCM, mono or stereo
    pub format: WaveFormat,
    /// Interleaved little-endian PCM
    pub pcm: Vec<u8>,
}

impl DecodedAudio {
    pub fn sample_count(&self) -> u32 {
        (self.pcm.len() / self.format.sample_size()) as u32
    }
}

/// Decode a compressed file held in memory
///
/// `extension` is a format hint only; the container is detected from the
/// bytes. Sources with more than two channels are folded to stereo.
pub fn decode_compressed(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, AudioFileError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioFileError::InvalidFormat(e.to_string()))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or(AudioFileError::MissingChunk("audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioFileError::Corrupted("unknown sample rate".into()))?;
    let source_channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| AudioFileError::Corrupted("unknown channel count".into()))?;
    if source_channels == 0 {
        return Err(AudioFileError::UnsupportedChannels(0));
    }
    let out_channels: u16 = if source_channels == 1 { 1 } else { 2 };

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioFileError::InvalidFormat(e.to_string()))?;

    let mut pcm = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioFileError::Corrupted(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                samples.copy_interleaved_ref(decoded);
                for frame in samples.samples().chunks_exact(source_channels) {
                    pcm.extend_from_slice(&frame[0].to_le_bytes());
                    if out_channels == 2 {
                        pcm.extend_from_slice(&frame[1].to_le_bytes());
                    }
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // A bad packet costs a few milliseconds of audio, not the asset
                log::warn!("[DECODE] skipping corrupt packet: {}", e);
            }
            Err(e) => return Err(AudioFileError::Corrupted(e.to_string())),
        }
    }

    if pcm.is_empty() {
        return Err(AudioFileError::Corrupted("no audio decoded".into()));
    }

    Ok(DecodedAudio {
        format: WaveFormat::pcm16(out_channels, sample_rate),
        pcm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_compressed(vec![0u8; 64], Some("mp3")).is_err());
    }
}
