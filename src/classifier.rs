//! The classification facade.
//!
//! [`SoundClassifier`] owns a loaded strategy and runs every request through
//! normalize → infer → aggregate. Errors from any step are returned
//! unchanged and nothing is retried.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::aggregate::{KeywordTable, ResultAggregator};
use crate::audio::{AudioNormalizer, NormalizedAudio};
use crate::config::{ClassifierConfig, StrategyKind};
use crate::error::Result;
use crate::strategies::{self, model_dir};
use crate::taxonomy::ClassTaxonomy;
use crate::{ClassificationResult, ClassificationStrategy};

/// A loaded classifier.
///
/// `classify` takes `&mut self` because ONNX Runtime sessions run through a
/// mutable handle. To serve requests concurrently give each worker its own
/// classifier or wrap one in a `Mutex`.
pub struct SoundClassifier {
    normalizer: AudioNormalizer,
    strategy: Box<dyn ClassificationStrategy>,
    aggregator: ResultAggregator,
    taxonomy: Arc<ClassTaxonomy>,
}

impl SoundClassifier {
    /// Load the taxonomy, resolve the model directory and build the
    /// configured strategy.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;

        let taxonomy = Arc::new(load_taxonomy(&config)?);
        log::info!(
            "Building {} classifier over {} classes",
            config.strategy.as_str(),
            taxonomy.len()
        );

        let model_dir = model_dir::resolve(
            &config.model_location,
            &config.fallback_model,
            &config.models_root,
            config.strategy,
        )?;

        let load_start = Instant::now();
        let strategy = strategies::build(&config, &model_dir, Arc::clone(&taxonomy))?;
        log::info!("Model loaded from {:?} in {:.2?}", model_dir, load_start.elapsed());

        Ok(Self {
            normalizer: AudioNormalizer::with_options(config.normalizer_options()),
            strategy,
            aggregator: ResultAggregator::new(config.keywords),
            taxonomy,
        })
    }

    /// Wrap an already constructed strategy, using the default keyword table.
    pub fn with_strategy(
        strategy: Box<dyn ClassificationStrategy>,
        taxonomy: Arc<ClassTaxonomy>,
    ) -> Self {
        Self {
            normalizer: AudioNormalizer::new(),
            strategy,
            aggregator: ResultAggregator::new(KeywordTable::default()),
            taxonomy,
        }
    }

    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.aggregator = ResultAggregator::new(keywords);
        self
    }

    pub fn with_normalizer(mut self, normalizer: AudioNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Classify an audio file.
    pub fn classify(&mut self, path: &Path) -> Result<ClassificationResult> {
        log::debug!("Classifying {:?}", path);
        let audio = self.normalizer.normalize(path)?;
        self.classify_normalized(&audio)
    }

    /// Classify an encoded audio file held in memory.
    pub fn classify_bytes(&mut self, data: &[u8]) -> Result<ClassificationResult> {
        let audio = self.normalizer.normalize_bytes(data)?;
        self.classify_normalized(&audio)
    }

    /// Classify decoded mono PCM at `sample_rate`.
    pub fn classify_samples(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<ClassificationResult> {
        let audio = self.normalizer.normalize_samples(samples, sample_rate)?;
        self.classify_normalized(&audio)
    }

    /// Run the strategy and aggregator over a clip that is already normalized.
    pub fn classify_normalized(&mut self, audio: &NormalizedAudio) -> Result<ClassificationResult> {
        let start = Instant::now();
        let raw = self.strategy.infer(audio)?;
        log::debug!(
            "{} inference took {:.2?}",
            self.strategy.kind().as_str(),
            start.elapsed()
        );

        let result = self.aggregator.aggregate(&raw, &self.taxonomy)?;
        log::info!(
            "Classified as '{}' (confidence {:.3})",
            result.class_name,
            result.confidence
        );
        Ok(result)
    }

    pub fn taxonomy(&self) -> &ClassTaxonomy {
        &self.taxonomy
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }
}

impl Drop for SoundClassifier {
    fn drop(&mut self) {
        log::debug!("Releasing {} classifier", self.strategy.kind().as_str());
    }
}

fn load_taxonomy(config: &ClassifierConfig) -> Result<ClassTaxonomy> {
    match (&config.taxonomy, &config.taxonomy_path) {
        (Some(names), _) => ClassTaxonomy::new(names.iter().cloned()),
        (None, Some(path)) if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) => {
            ClassTaxonomy::from_annotations_csv(path)
        }
        (None, Some(path)) => ClassTaxonomy::from_json_file(path),
        (None, None) => Ok(ClassTaxonomy::default()),
    }
}
