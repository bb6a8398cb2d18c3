//! # nonvocal-rs
//!
//! Classification of short non-vocal sound events (sirens, horns, breaking
//! glass, engine noise, collisions, falling objects) with Whisper-family
//! models running on ONNX Runtime.
//!
//! ## Pipeline
//!
//! Every request goes through the same three steps:
//!
//! 1. [`audio::AudioNormalizer`] decodes the clip and turns it into
//!    [`audio::NormalizedAudio`]: mono, 16 kHz, exactly 30 seconds.
//! 2. A [`ClassificationStrategy`] runs a model over the waveform and returns
//!    a [`RawStrategyOutput`].
//! 3. [`aggregate::ResultAggregator`] converts that raw output into a
//!    [`ClassificationResult`].
//!
//! [`classifier::SoundClassifier`] wires the three together and owns the
//! loaded model.
//!
//! ## Strategies
//!
//! - **Transcription**: generates free text and maps it onto the taxonomy by
//!   name or keyword.
//! - **Embedding**: mean-pools the encoder output and applies a linear head.
//! - **Token score**: generates text and reports the mean top-1 token
//!   probability as confidence.
//! - **Fine-tuned head**: a single graph that emits per-class logits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use nonvocal_rs::classifier::SoundClassifier;
//! use nonvocal_rs::config::{ClassifierConfig, StrategyKind};
//!
//! let config = ClassifierConfig::new(StrategyKind::Embedding, "models/nonvocal-whisper-small");
//! let mut classifier = SoundClassifier::new(config)?;
//!
//! let result = classifier.classify(Path::new("siren.wav"))?;
//! println!("{} ({:.2})", result.class_name, result.confidence);
//! # Ok::<(), nonvocal_rs::ClassifyError>(())
//! ```

pub mod aggregate;
pub mod audio;
pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod strategies;
pub mod taxonomy;

pub use aggregate::{KeywordRule, KeywordTable, ResultAggregator};
pub use audio::{AudioNormalizer, NormalizedAudio};
pub use classifier::SoundClassifier;
pub use config::{ClassifierConfig, Device, StrategyKind};
pub use error::ClassifyError;
pub use taxonomy::ClassTaxonomy;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Model-specific output of a [`ClassificationStrategy`], before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawStrategyOutput {
    /// Free text produced by a generation model, control tokens removed.
    Text { text: String },
    /// Softmax probabilities aligned to taxonomy order.
    Embedding { scores: Vec<f32> },
    /// Generated text plus the top-1 probability of each generated token,
    /// as percentages in `[0, 100]`.
    TokenScore {
        text: String,
        per_token_confidence: Vec<f32>,
    },
}

/// Scale on which [`ClassificationResult::confidence`] is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceScale {
    /// `[0, 1]`
    Unit,
    /// `[0, 100]`, used by the token-score strategy.
    Percent,
}

/// Per-class probabilities in taxonomy order.
///
/// Serializes as a JSON object keyed by class name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassProbabilities(Vec<(String, f32)>);

impl ClassProbabilities {
    pub fn get(&self, class_name: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|(name, _)| name == class_name)
            .map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(name, p)| (name.as_str(), *p))
    }

    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.0.iter().map(|(_, p)| *p)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f32)> for ClassProbabilities {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, p) in &self.0 {
            map.serialize_entry(name, p)?;
        }
        map.end()
    }
}

/// The standardized output of a classification.
///
/// Serializes to `{"class": ..., "confidence": ..., "probabilities": {...}}`;
/// `probabilities` is omitted when the strategy defines no distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// A taxonomy class name, or open-vocabulary text for the token-score
    /// strategy.
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    #[serde(skip)]
    pub scale: ConfidenceScale,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<ClassProbabilities>,
}

impl ClassificationResult {
    /// Confidence on the canonical `[0, 1]` scale.
    pub fn confidence_unit(&self) -> f32 {
        match self.scale {
            ConfidenceScale::Unit => self.confidence,
            ConfidenceScale::Percent => self.confidence / 100.0,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Common interface for classification strategies.
///
/// A strategy is built once with its model loaded; construction fails with
/// [`ClassifyError::ModelUnavailable`] when artifacts are missing, so `infer`
/// only ever sees a usable model.
///
/// # Examples
///
/// ```rust
/// use nonvocal_rs::{ClassificationStrategy, NormalizedAudio, RawStrategyOutput, StrategyKind};
///
/// struct AlwaysSiren;
///
/// impl ClassificationStrategy for AlwaysSiren {
///     fn kind(&self) -> StrategyKind {
///         StrategyKind::Transcription
///     }
///
///     fn infer(&mut self, _audio: &NormalizedAudio) -> Result<RawStrategyOutput, nonvocal_rs::ClassifyError> {
///         Ok(RawStrategyOutput::Text { text: "a siren".to_string() })
///     }
/// }
/// ```
pub trait ClassificationStrategy: Send {
    /// Which variant this strategy implements.
    fn kind(&self) -> StrategyKind;

    /// Run the model over a normalized clip.
    fn infer(&mut self, audio: &NormalizedAudio) -> Result<RawStrategyOutput, ClassifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json_shape() {
        let result = ClassificationResult {
            class_name: "buzina".to_string(),
            confidence: 0.75,
            scale: ConfidenceScale::Unit,
            probabilities: Some(
                [("sirene".to_string(), 0.1), ("buzina".to_string(), 0.75)]
                    .into_iter()
                    .collect(),
            ),
        };
        assert_eq!(
            result.to_json().unwrap(),
            r#"{"class":"buzina","confidence":0.75,"probabilities":{"sirene":0.1,"buzina":0.75}}"#
        );
    }

    #[test]
    fn test_result_json_omits_missing_probabilities() {
        let result = ClassificationResult {
            class_name: "Siren.".to_string(),
            confidence: 60.0,
            scale: ConfidenceScale::Percent,
            probabilities: None,
        };
        assert_eq!(result.to_json().unwrap(), r#"{"class":"Siren.","confidence":60.0}"#);
        assert_eq!(result.confidence_unit(), 0.6);
    }
}
