//! # Audio Decoding
//!
//! Decodes arbitrary uploaded audio (WAV, MP3, M4A, WebM/Opus, Ogg/Opus)
//! into the canonical transcription format. Decoding probes the byte content
//! itself; the uploaded filename is only a hint to the probe, never trusted.
//!
//! Browser MediaRecorder uploads arrive as WebM or Ogg containers carrying
//! opus, which symphonia can demux but not decode; those packets are routed
//! through libopus instead.
//!
//! The whole transform runs in memory: bytes in, samples out, no temp files.

use std::io::Cursor;

use anyhow::{anyhow, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_OPUS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{CanonicalAudio, CANONICAL_SAMPLE_RATE};

/// Opus decodes at 48kHz regardless of the stream's original rate.
const OPUS_SAMPLE_RATE: u32 = 48_000;
/// Samples per channel in the largest opus frame (120ms at 48kHz).
const OPUS_MAX_FRAME: usize = 5760;

/// Decode audio bytes into mono 16kHz f32 samples.
///
/// `hint_filename` (the original upload name, if any) seeds the format probe
/// with an extension hint; content probing still decides the real format.
pub fn decode_to_canonical(bytes: &[u8], hint_filename: Option<&str>) -> Result<CanonicalAudio> {
    if bytes.is_empty() {
        return Err(anyhow!("audio byte stream is empty"));
    }

    let cursor = Cursor::new(bytes.to_vec());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = hint_filename
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
    {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("unrecognized audio container: {}", e))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no decodable audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let (interleaved, sample_rate, channels) = if codec_params.codec == CODEC_TYPE_OPUS {
        decode_opus_track(&mut format, track_id, &codec_params)?
    } else {
        decode_symphonia_track(&mut format, track_id, &codec_params)?
    };

    if interleaved.is_empty() {
        return Err(anyhow!("audio stream contained no samples"));
    }

    let mono = if channels > 1 {
        downmix_to_mono(&interleaved, channels)
    } else {
        interleaved
    };

    let mut samples = if sample_rate != CANONICAL_SAMPLE_RATE {
        resample(&mono, sample_rate, CANONICAL_SAMPLE_RATE)
    } else {
        mono
    };

    normalize_peak(&mut samples);

    Ok(CanonicalAudio { samples })
}

/// Read the next packet, treating end-of-stream markers as completion.
///
/// Trailing corruption after valid audio also completes the stream; only a
/// read error before any samples were collected is fatal.
fn read_packet(format: &mut Box<dyn FormatReader>, have_samples: bool) -> Result<Option<Packet>> {
    match format.next_packet() {
        Ok(packet) => Ok(Some(packet)),
        Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Ok(None)
        }
        Err(SymphoniaError::ResetRequired) => Ok(None),
        Err(e) if have_samples => {
            tracing::warn!("audio stream ended with error: {}", e);
            Ok(None)
        }
        Err(e) => Err(anyhow!("failed to read audio packets: {}", e)),
    }
}

/// Decode a track through symphonia's own codecs.
fn decode_symphonia_track(
    format: &mut Box<dyn FormatReader>,
    track_id: u32,
    codec_params: &CodecParameters,
) -> Result<(Vec<f32>, u32, usize)> {
    let mut decoder = symphonia::default::get_codecs()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("unsupported audio codec: {}", e))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(CANONICAL_SAMPLE_RATE);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);

    while let Some(packet) = read_packet(format, !interleaved.is_empty())? {
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // Recoverable per-packet decode errors are skipped.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(anyhow!("audio decode failed: {}", e)),
        }
    }

    Ok((interleaved, sample_rate, channels))
}

/// Decode demuxed opus packets through libopus.
fn decode_opus_track(
    format: &mut Box<dyn FormatReader>,
    track_id: u32,
    codec_params: &CodecParameters,
) -> Result<(Vec<f32>, u32, usize)> {
    // libopus decodes mono or stereo; anything wider is downmixed to stereo
    // by the decoder itself.
    let channels = codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .clamp(1, 2);
    let layout = if channels == 2 {
        opus::Channels::Stereo
    } else {
        opus::Channels::Mono
    };
    let mut decoder = opus::Decoder::new(OPUS_SAMPLE_RATE, layout)
        .map_err(|e| anyhow!("failed to initialize opus decoder: {}", e))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut frame = vec![0.0f32; OPUS_MAX_FRAME * channels];

    while let Some(packet) = read_packet(format, !interleaved.is_empty())? {
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode_float(packet.buf(), &mut frame, false) {
            Ok(samples_per_channel) => {
                interleaved.extend_from_slice(&frame[..samples_per_channel * channels]);
            }
            // A corrupt packet mid-stream is skipped like any other
            // recoverable decode error.
            Err(e) => tracing::warn!("skipping undecodable opus packet: {}", e),
        }
    }

    Ok((interleaved, OPUS_SAMPLE_RATE, channels))
}

/// Average interleaved channels down to a single channel.
pub fn downmix_to_mono(interleaved: &[f32], num_channels: usize) -> Vec<f32> {
    interleaved
        .chunks(num_channels)
        .map(|frame| frame.iter().sum::<f32>() / num_channels as f32)
        .collect()
}

/// Linear resampler. Sufficient for speech-band rate conversion; the decoder
/// is the only caller and always targets 16kHz.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = (i as f64 / ratio) as usize;
        if src_idx < samples.len() {
            resampled.push(samples[src_idx]);
        } else {
            resampled.push(*samples.last().unwrap_or(&0.0));
        }
    }

    resampled
}

/// Scale samples back into [-1.0, 1.0] if decoding produced an overshoot.
pub fn normalize_peak(samples: &mut [f32]) {
    let max_abs = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if max_abs > 1.0 {
        let scale = 1.0 / max_abs;
        for sample in samples.iter_mut() {
            *sample *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_16k_wav() {
        let samples: Vec<i16> = (0..16_000)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let bytes = wav_bytes(16_000, 1, &samples);

        let audio = decode_to_canonical(&bytes, Some("question.wav")).unwrap();
        assert_eq!(audio.samples.len(), 16_000);
        assert!((audio.duration_secs() - 1.0).abs() < 0.01);
        assert!(audio.rms() > 0.05);
    }

    #[test]
    fn test_decode_downmixes_and_resamples() {
        // 1 second of stereo audio at 32kHz -> 16k mono samples
        let mut interleaved = Vec::new();
        for i in 0..32_000 {
            let s = ((i as f32 * 0.03).sin() * 6000.0) as i16;
            interleaved.push(s);
            interleaved.push(s);
        }
        let bytes = wav_bytes(32_000, 2, &interleaved);

        let audio = decode_to_canonical(&bytes, None).unwrap();
        assert!((audio.samples.len() as i64 - 16_000).unsigned_abs() < 32);
        assert!((audio.duration_secs() - 1.0).abs() < 0.01);
    }

    /// CRC-32 with the Ogg polynomial (0x04C11DB7, no reflection).
    fn ogg_crc(data: &[u8]) -> u32 {
        let mut crc = 0u32;
        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04C1_1DB7
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    fn ogg_page(serial: u32, seq: u32, header_type: u8, granule: u64, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        for packet in packets {
            let mut len = packet.len();
            while len >= 255 {
                lacing.push(255u8);
                len -= 255;
            }
            lacing.push(len as u8);
        }

        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0); // stream structure version
        page.push(header_type);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&seq.to_le_bytes());
        page.extend_from_slice(&[0u8; 4]); // crc, filled in below
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        for packet in packets {
            page.extend_from_slice(packet);
        }

        let crc = ogg_crc(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }

    /// An Ogg Opus stream of a mono 440Hz tone, like a browser recording.
    fn ogg_opus_bytes(seconds: f32) -> Vec<u8> {
        let mut head = Vec::new();
        head.extend_from_slice(b"OpusHead");
        head.push(1); // version
        head.push(1); // channels
        head.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
        head.extend_from_slice(&48_000u32.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes()); // output gain
        head.push(0); // mapping family

        let mut tags = Vec::new();
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&0u32.to_le_bytes()); // vendor string length
        tags.extend_from_slice(&0u32.to_le_bytes()); // comment count

        let mut encoder =
            opus::Encoder::new(48_000, opus::Channels::Mono, opus::Application::Voip).unwrap();
        let frames = (seconds * 50.0) as usize; // 20ms frames
        let mut packets = Vec::new();
        for frame in 0..frames {
            let pcm: Vec<f32> = (0..960)
                .map(|i| {
                    let t = (frame * 960 + i) as f32 / 48_000.0;
                    (t * 440.0 * std::f32::consts::TAU).sin() * 0.4
                })
                .collect();
            packets.push(encoder.encode_vec_float(&pcm, 4000).unwrap());
        }
        let packet_refs: Vec<&[u8]> = packets.iter().map(|p| p.as_slice()).collect();

        let serial = 0x7061_7368;
        let mut out = ogg_page(serial, 0, 0x02, 0, &[&head]);
        out.extend_from_slice(&ogg_page(serial, 1, 0x00, 0, &[&tags]));
        out.extend_from_slice(&ogg_page(
            serial,
            2,
            0x04,
            (frames * 960) as u64,
            &packet_refs,
        ));
        out
    }

    #[test]
    fn test_decode_ogg_opus_recording() {
        let bytes = ogg_opus_bytes(0.5);

        let audio = decode_to_canonical(&bytes, Some("recording.ogg")).unwrap();
        assert!((audio.duration_secs() - 0.5).abs() < 0.1);
        assert!(audio.rms() > 0.05);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let garbage = vec![0x13u8; 4096];
        assert!(decode_to_canonical(&garbage, Some("noise.mp3")).is_err());
        assert!(decode_to_canonical(&[], None).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_webm() {
        // EBML magic followed by junk, like a cut-off browser recording.
        let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3];
        bytes.extend_from_slice(&[0x42u8; 2048]);
        assert!(decode_to_canonical(&bytes, Some("recording.webm")).is_err());
    }

    #[test]
    fn test_downmix_averages_channels() {
        let interleaved = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let out = resample(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn test_normalize_peak_only_scales_overshoot() {
        let mut loud = vec![2.0, -4.0, 1.0];
        normalize_peak(&mut loud);
        assert_eq!(loud[1], -1.0);

        let mut quiet = vec![0.2, -0.1];
        normalize_peak(&mut quiet);
        assert_eq!(quiet, vec![0.2, -0.1]);
    }
}
