//! Audio decoder using symphonia
//!
//! Decodes an in-memory asset (WAV/PCM, FLAC, MP3, Vorbis, AAC/MP4) to
//! interleaved stereo f32 at the source sample rate. Mono sources are
//! duplicated to both channels; sources with more than two channels keep
//! only the front pair.

use crate::error::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decoded PCM at the source rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved stereo samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before stereo normalization
    pub source_channels: usize,
}

impl DecodedAudio {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Simple whole-asset decoder
pub struct SimpleDecoder;

impl SimpleDecoder {
    /// Decode a complete asset held in memory.
    ///
    /// `extension` is a format hint taken from the asset URL.
    ///
    /// # Errors
    /// `Error::Decode` if the format cannot be probed, there is no audio track,
    /// the codec is unsupported, or no frames decode.
    pub fn decode_bytes(track_id: &str, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
        let decode_err = |reason: String| Error::Decode {
            track_id: track_id.to_string(),
            reason,
        };

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| decode_err(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| decode_err("No audio track found".to_string()))?;

        let stream_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| decode_err("Sample rate not found".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| decode_err(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();
        let mut source_channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut buffer_channels = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => {
                    warn!("Track '{}': error reading packet: {}", track_id, e);
                    break;
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != stream_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Track '{}': skipping corrupt packet: {}", track_id, e);
                    continue;
                }
                Err(e) => return Err(decode_err(format!("Decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if channels == 0 {
                continue;
            }
            source_channels = channels;

            // Reallocate when the packet is larger or the layout changed
            let needed = decoded.capacity() as u64;
            let reusable = sample_buf.as_ref().map_or(false, |buf| {
                buffer_channels == channels && buf.capacity() as u64 >= needed * channels as u64
            });
            if !reusable {
                sample_buf = Some(SampleBuffer::new(needed, spec));
                buffer_channels = channels;
            }

            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                Self::append_stereo(buf.samples(), channels, &mut samples);
            }
        }

        if samples.is_empty() {
            return Err(decode_err("No audio frames decoded".to_string()));
        }

        debug!(
            "Track '{}': decoded {} frames at {} Hz ({} source channels)",
            track_id,
            samples.len() / 2,
            sample_rate,
            source_channels
        );

        Ok(DecodedAudio {
            samples,
            sample_rate,
            source_channels,
        })
    }

    /// Append interleaved frames with any channel count as stereo
    fn append_stereo(interleaved: &[f32], channels: usize, output: &mut Vec<f32>) {
        match channels {
            1 => {
                output.reserve(interleaved.len() * 2);
                for &sample in interleaved {
                    output.push(sample);
                    output.push(sample);
                }
            }
            2 => output.extend_from_slice(interleaved),
            _ => {
                for frame in interleaved.chunks_exact(channels) {
                    output.push(frame[0]);
                    output.push(frame[1]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                for _ in 0..channels {
                    writer.write_sample(((i % 100) as i16) * 100).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_wav() {
        let decoded = SimpleDecoder::decode_bytes("a", wav_bytes(2, 48000, 4800), Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.source_channels, 2);
        assert_eq!(decoded.frame_count(), 4800);
    }

    #[test]
    fn test_decode_mono_duplicates_channels() {
        let decoded = SimpleDecoder::decode_bytes("a", wav_bytes(1, 44100, 441), Some("wav")).unwrap();
        assert_eq!(decoded.source_channels, 1);
        assert_eq!(decoded.frame_count(), 441);
        for frame in decoded.samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = SimpleDecoder::decode_bytes("junk", b"definitely not audio".to_vec(), None);
        match result {
            Err(Error::Decode { track_id, .. }) => assert_eq!(track_id, "junk"),
            other => panic!("expected decode error, got {:?}", other.map(|d| d.frame_count())),
        }
    }

    #[test]
    fn test_append_stereo_folds_surround() {
        let mut out = Vec::new();
        SimpleDecoder::append_stereo(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.4, 0.5]);
    }
}
