//! Whisper log-mel front end.
//!
//! Reproduces the Whisper feature extractor so exported encoders see the
//! same input they were trained on:
//!
//! - centered STFT with reflect padding (n_fft 400, hop 160, periodic Hann),
//! - power spectrum through a Slaney-normalized mel filterbank,
//! - `log10(max(x, 1e-10))`, floored at `max - 8`, then `(x + 4) / 4`,
//! - the trailing frame dropped, giving 3000 frames for a 30 s clip.

use std::f32::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Deserialize;

use crate::error::{ClassifyError, Result};

/// Feature extractor settings, as found in `preprocessor_config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of mel bins (80, or 128 for large-v3 models).
    pub feature_size: usize,
    pub sampling_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_size: 80,
            sampling_rate: 16_000,
            n_fft: 400,
            hop_length: 160,
        }
    }
}

impl FeatureConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;

        if config.feature_size == 0 || config.n_fft < 2 || config.hop_length == 0 {
            return Err(ClassifyError::ModelUnavailable(format!(
                "invalid feature extractor settings in {:?}",
                path
            )));
        }

        log::debug!("Feature config from {:?}: {:?}", path, config);
        Ok(config)
    }
}

/// Precomputed DSP state for log-mel extraction.
pub struct LogMelExtractor {
    config: FeatureConfig,
    mel_filters: Array2<f32>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl LogMelExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let window: Vec<f32> = (0..config.n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / config.n_fft as f32).cos()))
            .collect();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        let mel_filters = slaney_mel_filterbank(
            config.feature_size,
            config.n_fft,
            config.sampling_rate as f32,
        );

        Self {
            config,
            mel_filters,
            window,
            fft,
        }
    }

    /// Log-mel spectrogram of shape `[n_mels, frames]`.
    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let freq_bins = n_fft / 2 + 1;

        let padded = reflect_pad(samples, n_fft / 2);
        let total_frames = if padded.len() >= n_fft {
            1 + (padded.len() - n_fft) / hop
        } else {
            0
        };
        // Whisper drops the last STFT frame.
        let n_frames = total_frames.saturating_sub(1);

        let mut power = Array2::<f32>::zeros((freq_bins, n_frames));
        let mut buf = vec![Complex::new(0.0f32, 0.0); n_fft];

        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buf);

            for (bin, val) in buf.iter().enumerate().take(freq_bins) {
                power[[bin, frame]] = val.norm_sqr();
            }
        }

        let mut log_mel = self.mel_filters.dot(&power).mapv(|v| v.max(1e-10).log10());

        let max = log_mel.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let floor = max - 8.0;
        log_mel.mapv_inplace(|v| (v.max(floor) + 4.0) / 4.0);

        log_mel
    }

    /// Log-mel features with a leading batch axis: `[1, n_mels, frames]`.
    pub fn compute_batch(&self, samples: &[f32]) -> Array3<f32> {
        self.compute(samples).insert_axis(Axis(0))
    }
}

/// Mirror `pad` samples on both ends, excluding the edge sample itself.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if samples.len() <= pad {
        // Too short to mirror; zero padding keeps frame geometry intact.
        let mut out = vec![0.0; pad];
        out.extend_from_slice(samples);
        out.resize(samples.len() + 2 * pad, 0.0);
        return out;
    }

    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| samples[i]));
    out.extend_from_slice(samples);
    out.extend((n - pad - 1..n - 1).rev().map(|i| samples[i]));
    out
}

fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = (6.4f32).ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = (6.4f32).ln() / 27.0;

    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-style mel filterbank `[n_mels, n_fft/2+1]` spanning 0 Hz to Nyquist.
fn slaney_mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f32) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sample_rate / n_fft as f32)
        .collect();

    let mel_max = hz_to_mel(sample_rate / 2.0);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = Array2::<f32>::zeros((n_mels, n_freqs));
    for m in 0..n_mels {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let norm = 2.0 / (right - left);

        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - left) / (center - left);
            let upper = (right - f) / (right - center);
            filters[[m, k]] = lower.min(upper).max(0.0) * norm;
        }
    }

    filters
}
