//! Stateless numerical transforms: STFT spectrogram, local-peak extraction, and the
//! logarithmic band aggregation used by the (out-of-scope) visualizer collaborator.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, OnceLock};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::model::Peak;

fn window_cache() -> &'static Mutex<HashMap<usize, Arc<Vec<f32>>>> {
    static CACHE: OnceLock<Mutex<HashMap<usize, Arc<Vec<f32>>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn fft_plan_cache() -> &'static Mutex<HashMap<usize, Arc<dyn Fft<f32>>>> {
    static CACHE: OnceLock<Mutex<HashMap<usize, Arc<dyn Fft<f32>>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns a cached Hann window of the given length, computing it on first use.
fn hann_window(window_size: usize) -> Arc<Vec<f32>> {
    let mut cache = window_cache().lock().expect("window cache poisoned");
    cache
        .entry(window_size)
        .or_insert_with(|| Arc::new(compute_hann_window(window_size)))
        .clone()
}

fn compute_hann_window(window_size: usize) -> Vec<f32> {
    if window_size == 0 {
        return Vec::new();
    }
    if window_size == 1 {
        return vec![1.0];
    }
    (0..window_size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (window_size - 1) as f32).cos()))
        .collect()
}

/// Returns a cached forward FFT plan for the given window size.
fn fft_plan(window_size: usize) -> Arc<dyn Fft<f32>> {
    let mut cache = fft_plan_cache().lock().expect("fft plan cache poisoned");
    cache
        .entry(window_size)
        .or_insert_with(|| {
            let mut planner = FftPlanner::<f32>::new();
            planner.plan_fft_forward(window_size)
        })
        .clone()
}

/// Computes a `frames x (window_size/2 + 1)` matrix of log-magnitude (dB) values.
///
/// `F = 1 + floor((len(samples) - window_size) / hop_size)`, or `0` if `samples` is shorter
/// than `window_size`. Silent input (max absolute sample below `silence_threshold`) short-
/// circuits to an all-zero matrix of the correctly-shaped dimensions.
pub fn compute_spectrogram(
    samples: &[f32],
    window_size: usize,
    hop_size: usize,
    silence_threshold: f32,
) -> Vec<Vec<f32>> {
    if samples.len() < window_size || window_size == 0 || hop_size == 0 {
        return Vec::new();
    }

    let num_frames = 1 + (samples.len() - window_size) / hop_size;
    let num_bins = window_size / 2 + 1;

    let peak_amplitude = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak_amplitude < silence_threshold {
        return vec![vec![0.0; num_bins]; num_frames];
    }

    let window = hann_window(window_size);
    let fft = fft_plan(window_size);

    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); window_size];
    let mut spectrogram = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_size;
        let chunk = &samples[start..start + window_size];

        for (i, sample) in chunk.iter().enumerate() {
            buffer[i] = Complex::new(sample * window[i], 0.0);
        }

        fft.process_with_scratch(&mut buffer, &mut scratch);

        let row: Vec<f32> = buffer[..num_bins]
            .iter()
            .map(|c| 20.0 * (c.norm() + 1e-10).log10())
            .collect();
        spectrogram.push(row);
    }

    spectrogram
}

/// A separable max filter over the time axis: `out[t][f] = max` of `spec[t'][f]` for
/// `t'` within `radius` of `t` (clipped at the edges, no wrap-around).
fn max_filter_time(spec: &[Vec<f32>], radius: usize) -> Vec<Vec<f32>> {
    let num_frames = spec.len();
    let num_bins = spec[0].len();
    let mut out = vec![vec![f32::NEG_INFINITY; num_bins]; num_frames];

    for f in 0..num_bins {
        for t in 0..num_frames {
            let t_start = t.saturating_sub(radius);
            let t_end = (t + radius + 1).min(num_frames);
            let mut m = f32::NEG_INFINITY;
            for row in spec.iter().take(t_end).skip(t_start) {
                m = m.max(row[f]);
            }
            out[t][f] = m;
        }
    }
    out
}

/// A separable max filter over the frequency axis, applied to the output of
/// [`max_filter_time`] to produce the full 2D square-neighborhood max.
fn max_filter_freq(spec: &[Vec<f32>], radius: usize) -> Vec<Vec<f32>> {
    let num_frames = spec.len();
    let num_bins = spec[0].len();
    let mut out = vec![vec![f32::NEG_INFINITY; num_bins]; num_frames];

    for (t, row) in spec.iter().enumerate() {
        for f in 0..num_bins {
            let f_start = f.saturating_sub(radius);
            let f_end = (f + radius + 1).min(num_bins);
            let mut m = f32::NEG_INFINITY;
            for &v in &row[f_start..f_end] {
                m = m.max(v);
            }
            out[t][f] = m;
        }
    }
    out
}

/// Exact check that `(t, f)` is the strict, untied maximum within the clipped square
/// neighborhood of the given radius. Only called on candidates that already matched the
/// separable-max value, so this runs on a small subset of cells.
fn is_strict_untied_peak(spec: &[Vec<f32>], t: usize, f: usize, radius: usize) -> bool {
    let num_frames = spec.len();
    let num_bins = spec[0].len();
    let value = spec[t][f];

    let t_start = t.saturating_sub(radius);
    let t_end = (t + radius + 1).min(num_frames);
    let f_start = f.saturating_sub(radius);
    let f_end = (f + radius + 1).min(num_bins);

    for nt in t_start..t_end {
        for nf in f_start..f_end {
            if nt == t && nf == f {
                continue;
            }
            if spec[nt][nf] >= value {
                return false;
            }
        }
    }
    true
}

/// Extracts strict local maxima above `peak_threshold_db` within a square neighborhood of
/// radius `neighborhood_size`. Implemented as a separable max filter followed by an exact
/// tie-breaking check on the (small) set of candidates, per the spec's Design Notes.
pub fn extract_peaks(
    spectrogram: &[Vec<f32>],
    neighborhood_size: usize,
    peak_threshold_db: f32,
) -> Vec<Peak> {
    if spectrogram.is_empty() || spectrogram[0].is_empty() {
        return Vec::new();
    }

    let time_max = max_filter_time(spectrogram, neighborhood_size);
    let sep_max = max_filter_freq(&time_max, neighborhood_size);

    let mut peaks = Vec::new();
    for (t, row) in spectrogram.iter().enumerate() {
        for (f, &value) in row.iter().enumerate() {
            if value <= peak_threshold_db {
                continue;
            }
            if value != sep_max[t][f] {
                continue;
            }
            if is_strict_untied_peak(spectrogram, t, f, neighborhood_size) {
                peaks.push(Peak {
                    frame: t,
                    bin: f,
                    magnitude_db: value,
                });
            }
        }
    }
    peaks
}

/// Groups a single spectrum's FFT bins into `num_bands` logarithmically-spaced bands.
/// Used only by the (out-of-scope) visualizer collaborator; included for completeness.
pub fn group_frequencies(
    spectrum: &[f32],
    num_bands: usize,
    sample_rate: u32,
    noise_floor_db: f32,
) -> Vec<f32> {
    if spectrum.is_empty() || num_bands == 0 {
        return vec![0.0; num_bands];
    }

    let num_bins = spectrum.len();
    let min_freq = 20.0f64;
    let max_freq = sample_rate as f64 / 2.0;

    let log_min = min_freq.log10();
    let log_max = max_freq.log10();

    let boundaries: Vec<usize> = (0..=num_bands)
        .map(|i| {
            let t = i as f64 / num_bands as f64;
            let freq = 10f64.powf(log_min + t * (log_max - log_min));
            let bin = (freq * num_bins as f64 * 2.0 / sample_rate as f64).floor() as i64;
            bin.clamp(0, num_bins as i64 - 1) as usize
        })
        .collect();

    let mut bands = vec![0.0f32; num_bands];
    for i in 0..num_bands {
        let start = boundaries[i];
        let end = boundaries[i + 1];
        if start < end {
            let slice = &spectrum[start..end];
            bands[i] = slice.iter().sum::<f32>() / slice.len() as f32;
        } else {
            bands[i] = spectrum[start];
        }
        if bands[i] < noise_floor_db {
            bands[i] = 0.0;
        }
    }
    bands
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI as PI32;

    fn sine_tone(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI32 * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn spectrogram_shape_matches_frame_formula() {
        let samples = vec![0.5f32; 5000];
        let spec = compute_spectrogram(&samples, 2048, 512, 0.001);
        let expected_frames = 1 + (5000 - 2048) / 512;
        assert_eq!(spec.len(), expected_frames);
        assert_eq!(spec[0].len(), 2048 / 2 + 1);
    }

    #[test]
    fn short_input_yields_no_frames() {
        let samples = vec![0.1f32; 100];
        let spec = compute_spectrogram(&samples, 2048, 512, 0.001);
        assert!(spec.is_empty());
    }

    #[test]
    fn silence_short_circuits_to_zero_matrix() {
        let samples = vec![0.0f32; 5000];
        let spec = compute_spectrogram(&samples, 2048, 512, 0.001);
        assert!(spec.iter().all(|row| row.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn pure_tone_peak_lands_near_expected_bin() {
        let sample_rate = 44100u32;
        let window_size = 2048usize;
        let samples = sine_tone(440.0, sample_rate, 2.0);
        let spec = compute_spectrogram(&samples, window_size, 512, 0.001);
        let peaks = extract_peaks(&spec, 20, -60.0);
        assert!(!peaks.is_empty());

        let expected_bin = (440.0 * window_size as f32 / sample_rate as f32).round() as usize;
        let closest = peaks
            .iter()
            .min_by_key(|p| (p.bin as i64 - expected_bin as i64).abs())
            .unwrap();
        assert!((closest.bin as i64 - expected_bin as i64).abs() <= 1);
    }

    #[test]
    fn tied_neighborhood_cells_are_rejected() {
        // A flat plateau: no cell is a *strict* maximum, so no peaks should be reported.
        let spec = vec![vec![-10.0f32; 10]; 10];
        let peaks = extract_peaks(&spec, 2, -60.0);
        assert!(peaks.is_empty());
    }

    #[test]
    fn group_frequencies_has_exact_band_count() {
        let spectrum = vec![1.0f32; 1025];
        let bands = group_frequencies(&spectrum, 32, 44100, -60.0);
        assert_eq!(bands.len(), 32);
    }
}
