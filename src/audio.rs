//! Audio normalization.
//!
//! Every strategy consumes the same canonical waveform: mono `f32` samples at
//! 16 kHz, exactly 30 seconds long (480 000 samples). [`AudioNormalizer`]
//! produces it from any container Symphonia can decode (WAV, MP3, OGG/Vorbis,
//! FLAC), from an in-memory byte buffer, or from already decoded PCM.
//!
//! The pipeline is, in order:
//!
//! 1. decode and average all channels into mono,
//! 2. trim to the first 30 seconds at the *source* rate,
//! 3. resample to 16 kHz with a band-limited FFT resampler (skipped when the
//!    source already runs at 16 kHz),
//! 4. pad with trailing zeros or truncate to exactly 480 000 samples.
//!
//! Each step is a no-op on a buffer that already satisfies it, so normalizing
//! a normalized buffer returns it unchanged.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{ClassifyError, Result};

/// Sample rate of every [`NormalizedAudio`] buffer.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// Length of every normalized clip, in seconds.
pub const MAX_DURATION_SECS: u32 = 30;
/// Number of samples in every [`NormalizedAudio`] buffer.
pub const TARGET_SAMPLES: usize = (TARGET_SAMPLE_RATE * MAX_DURATION_SECS) as usize;

const RESAMPLER_CHUNK: usize = 1024;

/// A canonical waveform: mono, 16 kHz, exactly 30 seconds.
///
/// The only way to obtain one is through [`AudioNormalizer`], which is what
/// guarantees `samples().len() == duration_samples()`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    samples: Vec<f32>,
}

impl NormalizedAudio {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        TARGET_SAMPLE_RATE
    }

    pub fn duration_samples(&self) -> usize {
        TARGET_SAMPLES
    }
}

/// Optional preprocessing applied after the length is fixed.
#[derive(Debug, Clone, Default)]
pub struct NormalizerOptions {
    /// Scale the clip so its largest absolute sample is 1.0.
    ///
    /// Silent clips are left untouched.
    pub peak_normalize: bool,
}

/// Converts arbitrary input audio into [`NormalizedAudio`].
#[derive(Debug, Clone, Default)]
pub struct AudioNormalizer {
    options: NormalizerOptions,
}

impl AudioNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: NormalizerOptions) -> Self {
        Self { options }
    }

    /// Decode and normalize an audio file.
    ///
    /// Fails with [`ClassifyError::Io`] when the file cannot be opened and
    /// with [`ClassifyError::AudioDecode`] when its content is not audio.
    pub fn normalize(&self, path: &Path) -> Result<NormalizedAudio> {
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        log::debug!("Decoding audio file {:?}", path);
        let (samples, sample_rate) = decode_to_mono(Box::new(file), hint)?;
        self.normalize_samples(samples, sample_rate)
    }

    /// Decode and normalize an in-memory encoded audio buffer.
    pub fn normalize_bytes(&self, data: &[u8]) -> Result<NormalizedAudio> {
        let cursor = Cursor::new(data.to_vec());
        let (samples, sample_rate) = decode_to_mono(Box::new(cursor), Hint::new())?;
        self.normalize_samples(samples, sample_rate)
    }

    /// Normalize already decoded mono PCM.
    pub fn normalize_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<NormalizedAudio> {
        if sample_rate == 0 {
            return Err(ClassifyError::AudioDecode(
                "sample rate must be non-zero".to_string(),
            ));
        }

        let source_len = samples.len();
        let trimmed = trim_to_max_duration(samples, sample_rate);
        let resampled = if sample_rate == TARGET_SAMPLE_RATE {
            trimmed
        } else {
            resample(&trimmed, sample_rate, TARGET_SAMPLE_RATE)?
        };
        let mut fixed = fit_to_length(resampled, TARGET_SAMPLES);

        if self.options.peak_normalize {
            peak_normalize(&mut fixed);
        }

        log::debug!(
            "Normalized {} samples @ {} Hz ({:.2}s) to {} samples @ {} Hz",
            source_len,
            sample_rate,
            source_len as f32 / sample_rate as f32,
            fixed.len(),
            TARGET_SAMPLE_RATE,
        );

        Ok(NormalizedAudio { samples: fixed })
    }
}

/// Decode the default audio track of a media source into mono samples.
///
/// Returns the samples together with the source sample rate.
fn decode_to_mono(source: Box<dyn MediaSource>, hint: Hint) -> Result<(Vec<f32>, u32)> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ClassifyError::AudioDecode(format!("probe: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ClassifyError::AudioDecode("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ClassifyError::AudioDecode(format!("codec: {}", e)))?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(ClassifyError::AudioDecode(format!("packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping corrupt audio frame: {}", e);
                continue;
            }
            Err(e) => return Err(ClassifyError::AudioDecode(format!("decode: {}", e))),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        sample_rate.get_or_insert(spec.rate);

        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(frames as u64, spec);
        buf.copy_interleaved_ref(decoded);
        downmix_into(buf.samples(), channels, &mut mono);
    }

    let sample_rate = sample_rate
        .ok_or_else(|| ClassifyError::AudioDecode("unknown sample rate".to_string()))?;

    log::trace!("Decoded {} mono frames at {} Hz", mono.len(), sample_rate);
    Ok((mono, sample_rate))
}

/// Average interleaved frames into mono, appending to `out`.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

fn trim_to_max_duration(mut samples: Vec<f32>, sample_rate: u32) -> Vec<f32> {
    let max_frames = sample_rate as usize * MAX_DURATION_SECS as usize;
    if samples.len() > max_frames {
        samples.truncate(max_frames);
    }
    samples
}

fn fit_to_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

/// Band-limited resampling of a mono signal.
///
/// The output holds `floor(len * to / from)` samples aligned with the input:
/// the resampler's internal delay is flushed and dropped.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLER_CHUNK, 2, 1)?;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLER_CHUNK);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let frames: [&[f32]; 1] = [&samples[pos..pos + n]];
        let chunk = resampler.process(&frames[..], None)?;
        output.extend_from_slice(&chunk[0]);
        pos += n;
    }

    if pos < samples.len() {
        let tail: [&[f32]; 1] = [&samples[pos..]];
        let chunk = resampler.process_partial(Some(&tail[..]), None)?;
        output.extend_from_slice(&chunk[0]);
    }

    // Flush the tail still held inside the resampler.
    while output.len() < delay + expected {
        let chunk = resampler.process_partial::<&[f32]>(None, None)?;
        if chunk[0].is_empty() {
            break;
        }
        output.extend_from_slice(&chunk[0]);
    }

    let end = (delay + expected).min(output.len());
    let mut aligned = output[delay.min(end)..end].to_vec();
    aligned.resize(expected, 0.0);
    Ok(aligned)
}
