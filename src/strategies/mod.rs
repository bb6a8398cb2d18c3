//! Classification strategies.
//!
//! Each strategy implements [`crate::ClassificationStrategy`] over a
//! Whisper-family model exported to ONNX. They share the log-mel front end
//! ([`crate::features`]), the session setup in [`session`] and, for the
//! generation-based ones, the encoder/decoder wrapper in [`whisper`].
//!
//! # Model Format
//!
//! Each strategy expects a directory holding:
//!
//! | Strategy        | Files |
//! |-----------------|-------|
//! | Transcription   | `preprocessor_config.json`, `encoder_model.onnx`, `decoder_model.onnx`, `tokenizer.json` |
//! | Token score     | same as transcription |
//! | Embedding       | `preprocessor_config.json`, `encoder_model.onnx`, `classifier_head.json` |
//! | Fine-tuned head | `preprocessor_config.json`, `classifier_model.onnx` |

pub mod embedding;
pub mod fine_tuned;
pub mod model_dir;
pub mod session;
pub mod token_score;
pub mod tokenizer;
pub mod transcription;
pub mod whisper;

pub use embedding::EmbeddingStrategy;
pub use fine_tuned::FineTunedHeadStrategy;
pub use token_score::TokenScoreStrategy;
pub use transcription::TranscriptionStrategy;

use std::path::Path;
use std::sync::Arc;

use crate::config::ClassifierConfig;
use crate::error::Result;
use crate::taxonomy::ClassTaxonomy;
use crate::{ClassificationStrategy, StrategyKind};

/// Construct the strategy selected by `config` from a resolved model directory.
pub fn build(
    config: &ClassifierConfig,
    model_dir: &Path,
    taxonomy: Arc<ClassTaxonomy>,
) -> Result<Box<dyn ClassificationStrategy>> {
    let strategy: Box<dyn ClassificationStrategy> = match config.strategy {
        StrategyKind::Transcription => Box::new(TranscriptionStrategy::new(
            model_dir,
            config.device,
            config.generation.clone(),
        )?),
        StrategyKind::TokenScore => Box::new(TokenScoreStrategy::new(
            model_dir,
            config.device,
            config.generation.clone(),
        )?),
        StrategyKind::Embedding => {
            Box::new(EmbeddingStrategy::new(model_dir, config.device, taxonomy)?)
        }
        StrategyKind::FineTunedHead => {
            Box::new(FineTunedHeadStrategy::new(model_dir, config.device, taxonomy)?)
        }
    };
    Ok(strategy)
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// The `k` most probable entries of `softmax(logits)`, most probable first.
///
/// Ties keep the lower index first.
pub fn top_k_probabilities(logits: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = softmax(logits).into_iter().enumerate().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(probs[3] > 0.999);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_softmax_uniform() {
        let probs = softmax(&[0.5; 4]);
        assert!(probs.iter().all(|&p| (p - 0.25).abs() < 1e-6));
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_top_k_orders_and_truncates() {
        let top = top_k_probabilities(&[0.1, 3.0, 2.0, 3.0, -1.0], 3);
        let ids: Vec<usize> = top.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert_eq!(top[0].1, top[1].1);
        assert!(top[1].1 > top[2].1);
    }
}
