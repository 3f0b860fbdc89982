//! Decodes arbitrary audio containers to mono float32 PCM and resamples to a target rate.
//!
//! Adapted from the teacher's `audio_loader.rs` decode loop; the teacher's resampling path
//! was an unimplemented stub ("Resampling not yet implemented") — this module closes that
//! gap with `rubato`.

use std::fs::File;
use std::path::Path;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{CoreError, Result};

/// Decoded, mono, resampled PCM ready for the Signal Processor.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decodes `path` to mono float32 PCM at its native sample rate, then resamples to
/// `target_sample_rate` if they differ.
pub fn load_audio_file(path: &Path, target_sample_rate: u32) -> Result<DecodedAudio> {
    let mono = decode_to_mono(path)?;

    if mono.sample_rate == target_sample_rate || mono.samples.is_empty() {
        return Ok(mono);
    }

    debug!(
        from = mono.sample_rate,
        to = target_sample_rate,
        file = %path.display(),
        "resampling"
    );
    let resampled = resample_mono(&mono.samples, mono.sample_rate, target_sample_rate)
        .map_err(|e| CoreError::Decode { path: path.display().to_string(), source: e })?;

    Ok(DecodedAudio {
        samples: resampled,
        sample_rate: target_sample_rate,
    })
}

fn decode_to_mono(path: &Path) -> Result<DecodedAudio> {
    let to_decode_err = |e: anyhow::Error| CoreError::Decode { path: path.display().to_string(), source: e };

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| to_decode_err(anyhow::anyhow!("probing failed: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| to_decode_err(anyhow::anyhow!("no compatible audio track found")))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| to_decode_err(anyhow::anyhow!("track has no sample rate")))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| to_decode_err(anyhow::anyhow!("failed to create decoder: {e}")))?;

    let mut mono_samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                return Err(to_decode_err(anyhow::anyhow!("stream reset mid-decode, unsupported")));
            }
            Err(e) => return Err(to_decode_err(anyhow::anyhow!("error reading packet: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                downmix_interleaved(sample_buf.samples(), spec.channels.count(), &mut mono_samples);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(file = %path.display(), error = %e, "recoverable decode error, skipping packet");
            }
            Err(e) => return Err(to_decode_err(anyhow::anyhow!("fatal decode error: {e}"))),
        }
    }

    Ok(DecodedAudio { samples: mono_samples, sample_rate })
}

fn downmix_interleaved(interleaved: &[f32], num_channels: usize, out: &mut Vec<f32>) {
    if num_channels == 0 {
        return;
    }
    if num_channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(interleaved.chunks_exact(num_channels).map(|frame| frame.iter().sum::<f32>() / num_channels as f32));
}

/// High-quality mono resampling via `rubato`'s sinc interpolator, the same configuration
/// the pack uses for stereo resampling, adapted to a single channel.
fn resample_mono(samples: &[f32], source_rate: u32, target_rate: u32) -> anyhow::Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)?;

    let input = vec![samples.to_vec()];
    let output = resampler.process(&input, None)?;

    Ok(output.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_mono_preserves_duration_ratio() {
        let samples: Vec<f32> = (0..4410).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample_mono(&samples, 44100, 22050).unwrap();
        let expected = samples.len() / 2;
        assert!((out.len() as i64 - expected as i64).abs() < 50);
    }

    #[test]
    fn resample_mono_empty_input_is_empty_output() {
        let out = resample_mono(&[], 44100, 22050).unwrap();
        assert!(out.is_empty());
    }
}
