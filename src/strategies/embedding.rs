use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis};
use serde::Deserialize;

use super::model_dir::CLASSIFIER_HEAD;
use super::softmax;
use super::whisper::WhisperEncoder;
use crate::audio::NormalizedAudio;
use crate::config::Device;
use crate::error::{ClassifyError, Result};
use crate::taxonomy::ClassTaxonomy;
use crate::{ClassificationStrategy, RawStrategyOutput, StrategyKind};

#[derive(Deserialize)]
struct HeadFile {
    weight: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// Linear map from a pooled encoder state to one score per class.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    /// `[n_classes, d_model]`
    weight: Array2<f32>,
    /// `[n_classes]`
    bias: Array1<f32>,
}

impl ClassifierHead {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(ClassifyError::ModelUnavailable(format!(
                "classifier head has {} weight rows but {} biases",
                weight.nrows(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias })
    }

    /// Load `{"weight": [[...], ...], "bias": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ClassifyError::ModelUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let head: HeadFile = serde_json::from_reader(BufReader::new(file))?;

        let rows = head.weight.len();
        let cols = head.weight.first().map(|r| r.len()).unwrap_or(0);
        if rows == 0 || cols == 0 || head.weight.iter().any(|r| r.len() != cols) {
            return Err(ClassifyError::ModelUnavailable(format!(
                "classifier head in {} must be a non-empty rectangular matrix",
                path.display()
            )));
        }

        let flat: Vec<f32> = head.weight.into_iter().flatten().collect();
        let weight = Array2::from_shape_vec((rows, cols), flat)?;
        Self::new(weight, Array1::from(head.bias))
    }

    pub fn num_classes(&self) -> usize {
        self.weight.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Raw scores `W·x + b`.
    pub fn project(&self, pooled: &Array1<f32>) -> Result<Array1<f32>> {
        if pooled.len() != self.input_dim() {
            return Err(ClassifyError::ModelUnavailable(format!(
                "encoder width {} does not match classifier head width {}",
                pooled.len(),
                self.input_dim()
            )));
        }
        Ok(self.weight.dot(pooled) + &self.bias)
    }
}

/// Average encoder states over time: `[1, frames, d]` → `[d]`.
pub fn mean_pool(hidden: &Array3<f32>) -> Result<Array1<f32>> {
    let batch = hidden.index_axis(Axis(0), 0);
    batch
        .mean_axis(Axis(0))
        .ok_or_else(|| ClassifyError::OutputNotFound("empty encoder output".to_string()))
}

/// Encoder embedding followed by a linear head and softmax.
pub struct EmbeddingStrategy {
    encoder: WhisperEncoder,
    head: ClassifierHead,
}

impl EmbeddingStrategy {
    pub fn new(model_dir: &Path, device: Device, taxonomy: Arc<ClassTaxonomy>) -> Result<Self> {
        let head = ClassifierHead::load(&model_dir.join(CLASSIFIER_HEAD))?;
        if head.num_classes() != taxonomy.len() {
            return Err(ClassifyError::ModelUnavailable(format!(
                "classifier head scores {} classes, taxonomy has {}",
                head.num_classes(),
                taxonomy.len()
            )));
        }

        let encoder = WhisperEncoder::new(model_dir, device)?;
        log::info!(
            "Loaded embedding strategy from {:?} ({} classes, width {})",
            model_dir,
            head.num_classes(),
            head.input_dim()
        );

        Ok(Self { encoder, head })
    }
}

impl ClassificationStrategy for EmbeddingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Embedding
    }

    fn infer(&mut self, audio: &NormalizedAudio) -> Result<RawStrategyOutput> {
        let hidden = self.encoder.encode(audio)?;
        let pooled = mean_pool(&hidden)?;
        let logits = self.head.project(&pooled)?;
        let scores = softmax(&logits.to_vec());
        Ok(RawStrategyOutput::Embedding { scores })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_pool_over_time() {
        let hidden = Array3::from_shape_vec((1, 2, 3), vec![1.0, 2.0, 3.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(mean_pool(&hidden).unwrap(), array![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_head_projection() {
        let head = ClassifierHead::new(
            array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            array![0.0, 0.5, -1.0],
        )
        .unwrap();
        let scores = head.project(&array![2.0, 1.0]).unwrap();
        assert_eq!(scores, array![2.0, 1.5, 2.0]);
        assert!(head.project(&array![1.0]).is_err());
    }

    #[test]
    fn test_load_head_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLASSIFIER_HEAD);
        std::fs::write(&path, r#"{"weight": [[0.1, 0.2], [0.3, 0.4]], "bias": [0.0, 1.0]}"#).unwrap();

        let head = ClassifierHead::load(&path).unwrap();
        assert_eq!(head.num_classes(), 2);
        assert_eq!(head.input_dim(), 2);
    }

    #[test]
    fn test_ragged_head_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLASSIFIER_HEAD);
        std::fs::write(&path, r#"{"weight": [[0.1, 0.2], [0.3]], "bias": [0.0, 1.0]}"#).unwrap();
        assert!(matches!(
            ClassifierHead::load(&path),
            Err(ClassifyError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_head_must_match_taxonomy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CLASSIFIER_HEAD),
            r#"{"weight": [[0.1], [0.3]], "bias": [0.0, 1.0]}"#,
        )
        .unwrap();

        let err = EmbeddingStrategy::new(dir.path(), Device::Cpu, Arc::new(ClassTaxonomy::default()))
            .err()
            .unwrap();
        assert!(matches!(err, ClassifyError::ModelUnavailable(_)));
    }
}
