//! Model location resolution.
//!
//! A model location is either a directory on disk or a named identifier
//! such as `openai/whisper-small`, which resolves to the same relative path
//! under the models root. When the configured location does not hold the
//! files a strategy needs, the fallback identifier is tried instead and a
//! warning is logged.

use std::path::{Path, PathBuf};

use crate::error::{ClassifyError, Result};
use crate::StrategyKind;

pub const PREPROCESSOR_CONFIG: &str = "preprocessor_config.json";
pub const ENCODER_MODEL: &str = "encoder_model.onnx";
pub const DECODER_MODEL: &str = "decoder_model.onnx";
pub const TOKENIZER: &str = "tokenizer.json";
pub const CLASSIFIER_HEAD: &str = "classifier_head.json";
pub const CLASSIFIER_MODEL: &str = "classifier_model.onnx";

/// Files that must be present in a model directory for `kind`.
pub fn required_artifacts(kind: StrategyKind) -> &'static [&'static str] {
    match kind {
        StrategyKind::Transcription | StrategyKind::TokenScore => {
            &[PREPROCESSOR_CONFIG, ENCODER_MODEL, DECODER_MODEL, TOKENIZER]
        }
        StrategyKind::Embedding => &[PREPROCESSOR_CONFIG, ENCODER_MODEL, CLASSIFIER_HEAD],
        StrategyKind::FineTunedHead => &[PREPROCESSOR_CONFIG, CLASSIFIER_MODEL],
    }
}

/// Map a location to a directory: existing directories are used as is,
/// anything else is treated as a name under `models_root`.
pub fn locate(location: &str, models_root: &Path) -> PathBuf {
    let direct = PathBuf::from(location);
    if direct.is_dir() {
        direct
    } else {
        models_root.join(location)
    }
}

/// Required files missing from `dir`.
pub fn missing_artifacts(dir: &Path, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

/// Resolve the directory to load `kind` from, falling back to `fallback`
/// when `location` lacks required files.
pub fn resolve(
    location: &str,
    fallback: &str,
    models_root: &Path,
    kind: StrategyKind,
) -> Result<PathBuf> {
    let required = required_artifacts(kind);

    let primary = locate(location, models_root);
    let missing = missing_artifacts(&primary, required);
    if missing.is_empty() {
        log::debug!("Using model directory {:?}", primary);
        return Ok(primary);
    }

    if location == fallback {
        return Err(ClassifyError::ModelUnavailable(format!(
            "{} is missing {}",
            primary.display(),
            missing.join(", ")
        )));
    }

    log::warn!(
        "{} does not contain required model files ({}), using default model {}",
        primary.display(),
        missing.join(", "),
        fallback
    );

    let secondary = locate(fallback, models_root);
    let missing_fallback = missing_artifacts(&secondary, required);
    if missing_fallback.is_empty() {
        return Ok(secondary);
    }

    Err(ClassifyError::ModelUnavailable(format!(
        "{} is missing {} and fallback {} is missing {}",
        primary.display(),
        missing.join(", "),
        secondary.display(),
        missing_fallback.join(", ")
    )))
}
