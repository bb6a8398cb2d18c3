//! Classifier configuration.
//!
//! [`ClassifierConfig`] selects the strategy, says where the model lives and
//! carries the taxonomy and keyword table. It can be built in code or loaded
//! from a JSON file:
//!
//! ```json
//! {
//!   "strategy": "transcription",
//!   "model_location": "./models/modelo_sirenes",
//!   "device": { "cuda": { "device_id": 0 } },
//!   "taxonomy": ["sirene", "queda_de_objeto", "colisao_de_objetos"],
//!   "generation": { "max_new_tokens": 32 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::KeywordTable;
use crate::audio::NormalizerOptions;
use crate::error::{ClassifyError, Result};

/// Pretrained model used when the configured location lacks model files.
pub const DEFAULT_FALLBACK_MODEL: &str = "openai/whisper-small";
/// Environment variable overriding the directory named models resolve under.
pub const MODELS_DIR_ENV: &str = "NONVOCAL_MODELS_DIR";
const DEFAULT_MODELS_DIR: &str = "models";

/// The available classification strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Free-text generation mapped onto the taxonomy.
    Transcription,
    /// Mean-pooled encoder states through a linear head.
    Embedding,
    /// Generation with per-token top-1 probabilities.
    TokenScore,
    /// A model with a trained classification head.
    FineTunedHead,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Transcription => "transcription",
            StrategyKind::Embedding => "embedding",
            StrategyKind::TokenScore => "token_score",
            StrategyKind::FineTunedHead => "fine_tuned_head",
        }
    }
}

/// Where ONNX Runtime should place the model.
///
/// This is a hint: when the CUDA provider cannot be registered the session
/// runs on the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda {
        device_id: i32,
    },
}

/// Parameters for the generation-based strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Language token inserted in the decoder prompt (e.g. "en").
    pub language: Option<String>,
    /// Translate instead of transcribe.
    pub translate: bool,
    /// Upper bound on generated tokens, prompt excluded.
    pub max_new_tokens: usize,
    /// Number of candidates inspected per step by the token-score strategy.
    pub top_k: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            language: Some("en".to_string()),
            translate: false,
            max_new_tokens: 64,
            top_k: 5,
        }
    }
}

/// Everything needed to build a [`crate::classifier::SoundClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub strategy: StrategyKind,
    /// A model directory, or a named identifier resolved under `models_root`.
    pub model_location: String,
    /// Named model tried when `model_location` lacks the required files.
    pub fallback_model: String,
    /// Directory named identifiers are resolved under.
    pub models_root: PathBuf,
    pub device: Device,
    /// Class names in index order; the built-in taxonomy when absent.
    pub taxonomy: Option<Vec<String>>,
    /// Taxonomy file, used when `taxonomy` is absent: a training
    /// annotations `.csv`, otherwise JSON.
    pub taxonomy_path: Option<PathBuf>,
    /// Keyword heuristics for the transcription strategy.
    pub keywords: KeywordTable,
    pub generation: GenerationParams,
    pub peak_normalize: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Transcription,
            model_location: DEFAULT_FALLBACK_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            models_root: default_models_root(),
            device: Device::Cpu,
            taxonomy: None,
            taxonomy_path: None,
            keywords: KeywordTable::default(),
            generation: GenerationParams::default(),
            peak_normalize: false,
        }
    }
}

impl ClassifierConfig {
    pub fn new(strategy: StrategyKind, model_location: impl Into<String>) -> Self {
        Self {
            strategy,
            model_location: model_location.into(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_models_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.models_root = root.into();
        self
    }

    pub fn with_taxonomy<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taxonomy = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_generation(mut self, generation: GenerationParams) -> Self {
        self.generation = generation;
        self
    }

    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!(
            "Loaded {} classifier config from {:?}",
            config.strategy.as_str(),
            path
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_location.trim().is_empty() {
            return Err(ClassifyError::Config("model_location is empty".to_string()));
        }
        if self.generation.max_new_tokens == 0 {
            return Err(ClassifyError::Config(
                "generation.max_new_tokens must be at least 1".to_string(),
            ));
        }
        if self.generation.top_k == 0 {
            return Err(ClassifyError::Config(
                "generation.top_k must be at least 1".to_string(),
            ));
        }
        if self.taxonomy.is_some() && self.taxonomy_path.is_some() {
            return Err(ClassifyError::Config(
                "set either taxonomy or taxonomy_path, not both".to_string(),
            ));
        }
        Ok(())
    }

    pub fn normalizer_options(&self) -> NormalizerOptions {
        NormalizerOptions {
            peak_normalize: self.peak_normalize,
        }
    }
}

fn default_models_root() -> PathBuf {
    std::env::var_os(MODELS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.strategy, StrategyKind::Transcription);
        assert_eq!(config.fallback_model, "openai/whisper-small");
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.generation.language.as_deref(), Some("en"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: ClassifierConfig = serde_json::from_str(
            r#"{
                "strategy": "token_score",
                "model_location": "./src/ml/modelo_sirenes",
                "device": { "cuda": { "device_id": 1 } },
                "generation": { "top_k": 3 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::TokenScore);
        assert_eq!(config.device, Device::Cuda { device_id: 1 });
        assert_eq!(config.generation.top_k, 3);
        assert_eq!(config.generation.max_new_tokens, 64);
        assert_eq!(config.keywords, KeywordTable::default());
    }

    #[test]
    fn test_custom_keyword_table_from_json() {
        let config: ClassifierConfig = serde_json::from_str(
            r#"{ "keywords": [ { "keywords": ["beep"], "class_name": "buzina" } ] }"#,
        )
        .unwrap();
        assert_eq!(config.keywords.rules().len(), 1);
        assert_eq!(config.keywords.rules()[0].class_name, "buzina");
    }

    #[test]
    fn test_builder_overrides() {
        let generation = GenerationParams {
            language: None,
            max_new_tokens: 16,
            ..Default::default()
        };
        let config = ClassifierConfig::new(StrategyKind::TokenScore, "models/x")
            .with_device(Device::Cuda { device_id: 2 })
            .with_generation(generation.clone());

        assert_eq!(config.device, Device::Cuda { device_id: 2 });
        assert_eq!(config.generation, generation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ClassifierConfig::new(StrategyKind::Embedding, "");
        assert!(matches!(config.validate(), Err(ClassifyError::Config(_))));

        config.model_location = "models/x".to_string();
        config.generation.top_k = 0;
        assert!(matches!(config.validate(), Err(ClassifyError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        fs::write(&path, r#"{ "strategy": "fine_tuned_head", "peak_normalize": true }"#).unwrap();

        let config = ClassifierConfig::from_file(&path).unwrap();
        assert_eq!(config.strategy, StrategyKind::FineTunedHead);
        assert!(config.normalizer_options().peak_normalize);
    }
}
