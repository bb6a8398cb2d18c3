/// Errors produced while normalizing audio, loading models or classifying.
#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audio decode error: {0}")]
    AudioDecode(String),
    #[error("Resampling failed: {0}")]
    Resample(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Generation produced no scored tokens")]
    EmptySequence,
    #[error("Score vector has {actual} entries, taxonomy has {expected}")]
    ScoreMismatch { expected: usize, actual: usize },
    #[error("Score at index {index} is not finite")]
    NonFiniteScore { index: usize },
    #[error("Invalid taxonomy: {0}")]
    InvalidTaxonomy(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Model output not found: {0}")]
    OutputNotFound(String),
}

impl ClassifyError {
    /// Whether the failure is attributable to the caller's input rather than
    /// to the classifier or its models.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ClassifyError::Io(_) | ClassifyError::AudioDecode(_))
    }
}

impl From<rubato::ResamplerConstructionError> for ClassifyError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        ClassifyError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for ClassifyError {
    fn from(e: rubato::ResampleError) -> Self {
        ClassifyError::Resample(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClassifyError>;
