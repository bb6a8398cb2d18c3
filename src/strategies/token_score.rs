use std::path::Path;

use super::whisper::{Generation, WhisperGenerator};
use crate::audio::NormalizedAudio;
use crate::config::{Device, GenerationParams};
use crate::error::Result;
use crate::{ClassificationStrategy, RawStrategyOutput, StrategyKind};

/// Generation that also reports how sure the decoder was of each token.
///
/// The per-token confidence is the top-1 softmax probability at that step,
/// expressed as a percentage. The end-of-text step is not scored, so a model
/// that stops immediately yields an empty score list.
pub struct TokenScoreStrategy {
    generator: WhisperGenerator,
}

impl TokenScoreStrategy {
    pub fn new(model_dir: &Path, device: Device, params: GenerationParams) -> Result<Self> {
        let generator = WhisperGenerator::new(model_dir, device, params)?;
        log::info!("Loaded token-score strategy from {:?}", model_dir);
        Ok(Self { generator })
    }
}

impl ClassificationStrategy for TokenScoreStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenScore
    }

    fn infer(&mut self, audio: &NormalizedAudio) -> Result<RawStrategyOutput> {
        let generation = self.generator.generate(audio)?;
        let text = self.generator.decode(&generation.tokens);
        let output = scored_output(text, &generation);
        log::debug!("Token-score output: {:?}", output);
        Ok(output)
    }
}

/// Pair decoded text with its per-token probabilities as percentages.
fn scored_output(text: String, generation: &Generation) -> RawStrategyOutput {
    let per_token_confidence = generation
        .top1_probabilities
        .iter()
        .map(|p| p * 100.0)
        .collect();

    RawStrategyOutput::TokenScore {
        text,
        per_token_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ResultAggregator;
    use crate::config::GenerationParams;
    use crate::error::ClassifyError;
    use crate::strategies::whisper::greedy_decode;
    use crate::taxonomy::ClassTaxonomy;

    #[test]
    fn test_probabilities_become_percentages() {
        let generation = Generation {
            tokens: vec![7, 8, 9],
            top1_probabilities: vec![0.8, 0.6, 0.4],
        };
        let RawStrategyOutput::TokenScore {
            text,
            per_token_confidence,
        } = scored_output("Siren wailing".to_string(), &generation)
        else {
            panic!("expected a token-score output");
        };

        assert_eq!(text, "Siren wailing");
        let expected = [80.0, 60.0, 40.0];
        for (got, want) in per_token_confidence.iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "{} != {}", got, want);
        }
    }

    #[test]
    fn test_immediate_end_of_text_is_empty_sequence() {
        let end_of_text = 3;
        let generation = greedy_decode(&[0], end_of_text, &GenerationParams::default(), |_| {
            Ok(vec![0.0, 0.0, 0.0, 5.0])
        })
        .unwrap();

        let output = scored_output(String::new(), &generation);
        let err = ResultAggregator::default()
            .aggregate(&output, &ClassTaxonomy::default())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::EmptySequence));
    }

    #[test]
    fn test_generated_tokens_average_to_confidence() {
        let mut steps = vec![vec![3.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]].into_iter();
        let generation = greedy_decode(&[0], 3, &GenerationParams::default(), |_| {
            Ok(steps.next().unwrap_or_else(|| vec![0.0, 0.0, 0.0, 9.0]))
        })
        .unwrap();
        assert_eq!(generation.tokens, vec![0, 1]);

        let output = scored_output("siren".to_string(), &generation);
        let result = ResultAggregator::default()
            .aggregate(&output, &ClassTaxonomy::default())
            .unwrap();

        let mean = generation.top1_probabilities.iter().sum::<f32>() / 2.0 * 100.0;
        assert!((result.confidence - mean).abs() < 1e-3);
        assert!(result.confidence > 0.0 && result.confidence <= 100.0);
    }
}
