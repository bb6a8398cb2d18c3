use std::path::Path;

use super::whisper::WhisperGenerator;
use crate::audio::NormalizedAudio;
use crate::config::{Device, GenerationParams};
use crate::error::Result;
use crate::{ClassificationStrategy, RawStrategyOutput, StrategyKind};

/// Free-text transcription of the clip.
///
/// A general Whisper model describes non-vocal sounds in words ("Siren
/// wailing", "Car horn honking"); the aggregator maps that text onto the
/// taxonomy.
pub struct TranscriptionStrategy {
    generator: WhisperGenerator,
}

impl TranscriptionStrategy {
    pub fn new(model_dir: &Path, device: Device, params: GenerationParams) -> Result<Self> {
        let generator = WhisperGenerator::new(model_dir, device, params)?;
        log::info!("Loaded transcription strategy from {:?}", model_dir);
        Ok(Self { generator })
    }
}

impl ClassificationStrategy for TranscriptionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Transcription
    }

    fn infer(&mut self, audio: &NormalizedAudio) -> Result<RawStrategyOutput> {
        let generation = self.generator.generate(audio)?;
        let text = self.generator.decode(&generation.tokens);
        log::debug!("Raw transcription: {}", text);
        Ok(RawStrategyOutput::Text { text })
    }
}
