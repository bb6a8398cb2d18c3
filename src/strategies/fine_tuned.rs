use std::path::Path;
use std::sync::Arc;

use ort::inputs;
use ort::session::Session;
use ort::value::TensorRef;

use super::model_dir::{CLASSIFIER_MODEL, PREPROCESSOR_CONFIG};
use super::session::{init_session, output_name};
use super::softmax;
use crate::audio::NormalizedAudio;
use crate::config::Device;
use crate::error::{ClassifyError, Result};
use crate::features::{FeatureConfig, LogMelExtractor};
use crate::taxonomy::ClassTaxonomy;
use crate::{ClassificationStrategy, RawStrategyOutput, StrategyKind};

/// An audio-classification model trained end to end on the taxonomy.
///
/// The exported graph takes `input_features [1, n_mels, 3000]` and returns
/// one logit per class, in taxonomy order.
pub struct FineTunedHeadStrategy {
    session: Session,
    extractor: LogMelExtractor,
    output: String,
    taxonomy: Arc<ClassTaxonomy>,
}

impl FineTunedHeadStrategy {
    pub fn new(model_dir: &Path, device: Device, taxonomy: Arc<ClassTaxonomy>) -> Result<Self> {
        let feature_config = FeatureConfig::load(&model_dir.join(PREPROCESSOR_CONFIG))?;
        let session = init_session(&model_dir.join(CLASSIFIER_MODEL), device)?;
        let output = output_name(&session, "logits")?;

        log::info!(
            "Loaded fine-tuned classifier from {:?} ({} classes)",
            model_dir,
            taxonomy.len()
        );

        Ok(Self {
            session,
            extractor: LogMelExtractor::new(feature_config),
            output,
            taxonomy,
        })
    }
}

impl ClassificationStrategy for FineTunedHeadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FineTunedHead
    }

    fn infer(&mut self, audio: &NormalizedAudio) -> Result<RawStrategyOutput> {
        let features = self.extractor.compute_batch(audio.samples()).into_dyn();

        let inputs = inputs![
            "input_features" => TensorRef::from_array_view(features.view())?,
        ];
        let outputs = self.session.run(inputs)?;

        let logits: Vec<f32> = outputs
            .get(self.output.as_str())
            .ok_or_else(|| ClassifyError::OutputNotFound(self.output.clone()))?
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();

        if logits.len() != self.taxonomy.len() {
            return Err(ClassifyError::ScoreMismatch {
                expected: self.taxonomy.len(),
                actual: logits.len(),
            });
        }

        log::trace!("Classifier logits: {:?}", logits);
        Ok(RawStrategyOutput::Embedding {
            scores: softmax(&logits),
        })
    }
}
