use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ClassifyError, Result};

pub const START_OF_TRANSCRIPT: &str = "<|startoftranscript|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";
pub const TRANSCRIBE: &str = "<|transcribe|>";
pub const TRANSLATE: &str = "<|translate|>";
pub const NO_TIMESTAMPS: &str = "<|notimestamps|>";

/// Matches `<|...|>` control tokens: start-of-sequence, language, task,
/// timestamps and end-of-text markers.
static CONTROL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|[^|<>]*\|>").expect("valid control token pattern"));

/// Remove every control token from decoded text and trim the result.
pub fn strip_control_tokens(text: &str) -> String {
    CONTROL_TOKEN.replace_all(text, "").trim().to_string()
}

/// A decode-only reader for Whisper's byte-level BPE `tokenizer.json`.
pub struct WhisperTokenizer {
    /// Maps token ID to token string
    vocab: HashMap<u32, String>,
    /// Added token content → ID, used to build prompts
    added: HashMap<String, u32>,
    /// IDs skipped during decoding
    special_token_ids: HashSet<u32>,
    /// Byte-level BPE alphabet back to raw bytes
    byte_decoder: HashMap<char, u8>,
}

impl WhisperTokenizer {
    pub fn new(tokenizer_path: &Path) -> Result<Self> {
        if !tokenizer_path.exists() {
            return Err(ClassifyError::ModelUnavailable(format!(
                "tokenizer not found: {}",
                tokenizer_path.display()
            )));
        }

        log::info!("Loading tokenizer from {:?}...", tokenizer_path);

        let file = File::open(tokenizer_path)?;
        let json: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
        let tokenizer = Self::from_json(&json)?;

        log::info!("Loaded {} tokens from vocabulary", tokenizer.vocab.len());
        log::debug!("Found {} special tokens", tokenizer.special_token_ids.len());
        Ok(tokenizer)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let mut vocab = HashMap::new();
        if let Some(v) = json
            .get("model")
            .and_then(|m| m.get("vocab"))
            .and_then(|v| v.as_object())
        {
            for (token, id) in v {
                if let Some(id) = id.as_u64() {
                    vocab.insert(id as u32, token.clone());
                }
            }
        }

        if vocab.is_empty() {
            return Err(ClassifyError::ModelUnavailable(
                "no vocabulary found in tokenizer.json".to_string(),
            ));
        }

        let mut added = HashMap::new();
        let mut special_token_ids = HashSet::new();
        if let Some(added_tokens) = json.get("added_tokens").and_then(|v| v.as_array()) {
            for token in added_tokens {
                let id = token.get("id").and_then(|v| v.as_u64());
                let content = token.get("content").and_then(|v| v.as_str());
                if let (Some(id), Some(content)) = (id, content) {
                    let id = id as u32;
                    added.insert(content.to_string(), id);
                    vocab.entry(id).or_insert_with(|| content.to_string());

                    let is_special = token
                        .get("special")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if is_special || CONTROL_TOKEN.is_match(content) {
                        special_token_ids.insert(id);
                    }
                }
            }
        }

        let tokenizer = Self {
            vocab,
            added,
            special_token_ids,
            byte_decoder: byte_decoder(),
        };

        for required in [START_OF_TRANSCRIPT, END_OF_TEXT] {
            tokenizer.token_id(required)?;
        }

        Ok(tokenizer)
    }

    /// ID of an added token such as `<|en|>`.
    pub fn token_id(&self, content: &str) -> Result<i64> {
        self.added
            .get(content)
            .map(|&id| id as i64)
            .ok_or_else(|| {
                ClassifyError::ModelUnavailable(format!("tokenizer has no {} token", content))
            })
    }

    pub fn end_of_text(&self) -> Result<i64> {
        self.token_id(END_OF_TEXT)
    }

    /// Decoder prompt: start-of-transcript, optional language, task, and
    /// no-timestamps markers.
    pub fn prompt(&self, language: Option<&str>, translate: bool) -> Result<Vec<i64>> {
        let mut prompt = vec![self.token_id(START_OF_TRANSCRIPT)?];

        if let Some(lang) = language {
            match self.token_id(&format!("<|{}|>", lang)) {
                Ok(id) => prompt.push(id),
                Err(_) => log::warn!("Unknown language '{}', letting the model detect it", lang),
            }
        }

        // Task and timestamp markers are optional in older exports.
        let task = if translate { TRANSLATE } else { TRANSCRIBE };
        for marker in [task, NO_TIMESTAMPS] {
            if let Ok(id) = self.token_id(marker) {
                prompt.push(id);
            }
        }

        Ok(prompt)
    }

    /// Decode token IDs to text with all control tokens removed.
    pub fn decode(&self, token_ids: &[i64]) -> String {
        let mut bytes: Vec<u8> = Vec::new();

        for &id in token_ids {
            let id = id as u32;
            if self.special_token_ids.contains(&id) {
                continue;
            }
            if let Some(token) = self.vocab.get(&id) {
                for c in token.chars() {
                    match self.byte_decoder.get(&c) {
                        Some(&b) => bytes.push(b),
                        None => {
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
            }
            // Unknown IDs are skipped
        }

        let text = String::from_utf8_lossy(&bytes);
        strip_control_tokens(&text)
    }
}

/// Inverse of the GPT-2 `bytes_to_unicode` table.
///
/// Printable bytes map to themselves; the remaining 68 bytes are shifted
/// into the range starting at U+0100.
fn byte_decoder() -> HashMap<char, u8> {
    let printable = |b: u8| (b'!'..=b'~').contains(&b) || (0xA1..=0xAC).contains(&b) || b >= 0xAE;

    let mut decoder = HashMap::with_capacity(256);
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        let c = if printable(b) {
            b as u32
        } else {
            shifted += 1;
            255 + shifted
        };
        if let Some(c) = char::from_u32(c) {
            decoder.insert(c, b);
        }
    }
    decoder
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> WhisperTokenizer {
        let json = serde_json::json!({
            "model": {
                "type": "BPE",
                "vocab": {
                    "Siren": 0,
                    "Ġwail": 1,
                    "ing": 2,
                    "Ã©": 3,
                    ".": 4
                }
            },
            "added_tokens": [
                { "id": 50257, "content": "<|endoftext|>", "special": true },
                { "id": 50258, "content": "<|startoftranscript|>", "special": true },
                { "id": 50259, "content": "<|en|>", "special": true },
                { "id": 50359, "content": "<|transcribe|>", "special": true },
                { "id": 50363, "content": "<|notimestamps|>", "special": true },
                { "id": 50364, "content": "<|0.00|>", "special": false }
            ]
        });
        WhisperTokenizer::from_json(&json).unwrap()
    }

    #[test]
    fn test_decode_skips_control_tokens() {
        let tok = tokenizer();
        let text = tok.decode(&[50258, 50259, 50359, 50363, 50364, 0, 1, 2, 4, 50257]);
        assert_eq!(text, "Siren wailing.");
    }

    #[test]
    fn test_decode_byte_level_utf8() {
        assert_eq!(tokenizer().decode(&[3]), "é");
    }

    #[test]
    fn test_prompt_tokens() {
        let tok = tokenizer();
        assert_eq!(tok.prompt(Some("en"), false).unwrap(), vec![50258, 50259, 50359, 50363]);
        // Unknown language and missing translate marker are skipped.
        assert_eq!(tok.prompt(Some("xx"), true).unwrap(), vec![50258, 50363]);
        assert_eq!(tok.end_of_text().unwrap(), 50257);
    }

    #[test]
    fn test_missing_vocab_is_model_unavailable() {
        let json = serde_json::json!({ "added_tokens": [] });
        assert!(matches!(
            WhisperTokenizer::from_json(&json),
            Err(ClassifyError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_strip_control_tokens() {
        assert_eq!(
            strip_control_tokens("<|startoftranscript|><|en|><|transcribe|><|notimestamps|> Car horn honking.<|endoftext|>"),
            "Car horn honking."
        );
        assert_eq!(strip_control_tokens("<|0.00|> glass <|2.40|>"), "glass");
    }

    #[test]
    fn test_byte_decoder_is_complete() {
        let decoder = byte_decoder();
        assert_eq!(decoder.len(), 256);
        assert_eq!(decoder[&'Ġ'], b' ');
        assert_eq!(decoder[&'A'], b'A');
    }
}
