//! ONNX Runtime wrapper around a Whisper encoder/decoder export.
//!
//! The encoder maps `input_features [1, n_mels, 3000]` to
//! `last_hidden_state [1, frames, d_model]`. The decoder takes the full token
//! sequence plus the encoder states and returns `logits [1, seq, vocab]`;
//! generation re-runs it on the growing sequence without a KV cache.

use std::path::Path;

use ndarray::{s, Array2, Array3, Ix3};
use ort::inputs;
use ort::session::Session;
use ort::value::TensorRef;

use super::model_dir::{DECODER_MODEL, ENCODER_MODEL, PREPROCESSOR_CONFIG, TOKENIZER};
use super::session::{init_session, output_name};
use super::tokenizer::WhisperTokenizer;
use super::top_k_probabilities;
use crate::audio::NormalizedAudio;
use crate::config::{Device, GenerationParams};
use crate::error::{ClassifyError, Result};
use crate::features::{FeatureConfig, LogMelExtractor};

/// Output of one generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    /// Generated token IDs, prompt and end-of-text excluded.
    pub tokens: Vec<i64>,
    /// Softmax probability of each generated token, in `[0, 1]`.
    pub top1_probabilities: Vec<f32>,
}

/// The audio encoder and its log-mel front end.
pub struct WhisperEncoder {
    session: Session,
    extractor: LogMelExtractor,
    output: String,
}

impl Drop for WhisperEncoder {
    fn drop(&mut self) {
        log::debug!("Dropping WhisperEncoder");
    }
}

impl WhisperEncoder {
    pub fn new(model_dir: &Path, device: Device) -> Result<Self> {
        let feature_config = FeatureConfig::load(&model_dir.join(PREPROCESSOR_CONFIG))?;
        let session = init_session(&model_dir.join(ENCODER_MODEL), device)?;
        let output = output_name(&session, "last_hidden_state")?;

        Ok(Self {
            session,
            extractor: LogMelExtractor::new(feature_config),
            output,
        })
    }

    /// Encoder hidden states, `[1, frames, d_model]`.
    pub fn encode(&mut self, audio: &NormalizedAudio) -> Result<Array3<f32>> {
        let features = self.extractor.compute_batch(audio.samples()).into_dyn();
        log::trace!("Encoder input shape: {:?}", features.shape());

        let inputs = inputs![
            "input_features" => TensorRef::from_array_view(features.view())?,
        ];
        let outputs = self.session.run(inputs)?;

        let hidden = outputs
            .get(self.output.as_str())
            .ok_or_else(|| ClassifyError::OutputNotFound(self.output.clone()))?
            .try_extract_array::<f32>()?;
        let hidden = hidden.to_owned().into_dimensionality::<Ix3>()?;

        log::trace!("Encoder output shape: {:?}", hidden.shape());
        Ok(hidden)
    }
}

/// Encoder, decoder and tokenizer for text generation.
pub struct WhisperGenerator {
    encoder: WhisperEncoder,
    decoder: Session,
    tokenizer: WhisperTokenizer,
    params: GenerationParams,
    prompt: Vec<i64>,
    end_of_text: i64,
}

impl WhisperGenerator {
    pub fn new(model_dir: &Path, device: Device, params: GenerationParams) -> Result<Self> {
        let tokenizer = WhisperTokenizer::new(&model_dir.join(TOKENIZER))?;
        let prompt = tokenizer.prompt(params.language.as_deref(), params.translate)?;
        let end_of_text = tokenizer.end_of_text()?;

        let encoder = WhisperEncoder::new(model_dir, device)?;
        let decoder = init_session(&model_dir.join(DECODER_MODEL), device)?;

        log::debug!("Decoder prompt: {:?}", prompt);

        Ok(Self {
            encoder,
            decoder,
            tokenizer,
            params,
            prompt,
            end_of_text,
        })
    }

    /// Greedy generation over `audio`; see [`greedy_decode`].
    pub fn generate(&mut self, audio: &NormalizedAudio) -> Result<Generation> {
        let hidden = self.encoder.encode(audio)?.into_dyn();
        let decoder = &mut self.decoder;

        let generation = greedy_decode(
            &self.prompt,
            self.end_of_text,
            &self.params,
            |sequence| next_token_logits(decoder, sequence, &hidden),
        )?;

        log::debug!("Generated {} tokens", generation.tokens.len());
        Ok(generation)
    }

    pub fn decode(&self, tokens: &[i64]) -> String {
        self.tokenizer.decode(tokens)
    }
}

/// Greedy decoding driven by `next_logits`, which maps the sequence so far to
/// the logits of the following position.
///
/// At each step the top-1 token among the `top_k` most probable candidates is
/// appended together with its softmax probability. Decoding stops, without
/// recording a score, once end-of-text is the top-1 prediction or
/// `max_new_tokens` tokens have been produced.
pub fn greedy_decode<F>(
    prompt: &[i64],
    end_of_text: i64,
    params: &GenerationParams,
    mut next_logits: F,
) -> Result<Generation>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>>,
{
    let mut sequence = prompt.to_vec();
    let mut generation = Generation::default();

    for step in 0..params.max_new_tokens {
        let logits = next_logits(&sequence)?;
        let candidates = top_k_probabilities(&logits, params.top_k);
        let Some(&(token, probability)) = candidates.first() else {
            break;
        };
        let token = token as i64;

        if token == end_of_text {
            log::trace!("End of text reached at step {}", step);
            break;
        }

        log::trace!("Step {}: token {} p={:.4}", step, token, probability);
        sequence.push(token);
        generation.tokens.push(token);
        generation.top1_probabilities.push(probability);
    }

    Ok(generation)
}

/// Logits for the position after `sequence`.
fn next_token_logits(
    decoder: &mut Session,
    sequence: &[i64],
    hidden: &ndarray::ArrayD<f32>,
) -> Result<Vec<f32>> {
    let input_ids = Array2::from_shape_vec((1, sequence.len()), sequence.to_vec())?.into_dyn();

    let inputs = inputs![
        "input_ids" => TensorRef::from_array_view(input_ids.view())?,
        "encoder_hidden_states" => TensorRef::from_array_view(hidden.view())?,
    ];
    let outputs = decoder.run(inputs)?;

    let logits = outputs
        .get("logits")
        .ok_or_else(|| ClassifyError::OutputNotFound("logits".to_string()))?
        .try_extract_array::<f32>()?;

    let shape = logits.shape();
    if shape.len() != 3 || shape[1] == 0 {
        return Err(ClassifyError::OutputNotFound(format!(
            "logits with shape {:?}",
            shape
        )));
    }
    let last = shape[1] - 1;
    Ok(logits.slice(s![0, last, ..]).to_vec())
}
