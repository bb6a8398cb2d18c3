//! Conversion of raw strategy output into [`ClassificationResult`]s.
//!
//! The aggregator is the only place where confidence is computed, so the
//! rules for each output shape live side by side here:
//!
//! | Raw output   | `class_name`                    | `confidence`          | `probabilities`      |
//! |--------------|---------------------------------|-----------------------|----------------------|
//! | `Embedding`  | argmax, ties to lowest index    | max score (0–1)       | full score map       |
//! | `Text`       | name match, keyword, or index 0 | fixed 0.75 (0–1)      | 0.10 / 0.75 baseline |
//! | `TokenScore` | decoded text verbatim           | mean of token % (0–100) | none               |

use serde::{Deserialize, Serialize};

use crate::error::{ClassifyError, Result};
use crate::taxonomy::ClassTaxonomy;
use crate::{ClassProbabilities, ClassificationResult, ConfidenceScale, RawStrategyOutput};

/// Confidence assigned to any class picked from free text.
pub const TEXT_MATCH_CONFIDENCE: f32 = 0.75;
/// Probability shown for every class that free text did not pick.
pub const TEXT_BASELINE_PROBABILITY: f32 = 0.10;

/// A keyword heuristic: any of `keywords` found in the text selects `class_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub class_name: String,
}

impl KeywordRule {
    pub fn new(keywords: &[&str], class_name: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            class_name: class_name.to_string(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Ordered keyword heuristics; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordTable {
    rules: Vec<KeywordRule>,
}

impl KeywordTable {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// First rule, in table order, that matches `text` and whose class
    /// exists in `taxonomy`.
    fn lookup<'t>(&self, text: &str, taxonomy: &'t ClassTaxonomy) -> Option<&'t str> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(text))
            .find_map(|rule| {
                let index = taxonomy.index_of(&rule.class_name);
                if index.is_none() {
                    log::debug!(
                        "Keyword rule for '{}' matched but the class is not in the taxonomy",
                        rule.class_name
                    );
                }
                index.and_then(|i| taxonomy.name(i))
            })
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(&["siren"], "sirene"),
            KeywordRule::new(&["crash", "collision"], "colisao_de_objetos"),
            KeywordRule::new(&["fall", "dropping"], "queda_de_objeto"),
            KeywordRule::new(&["engine", "car", "vehicle"], "motor_de_veiculo"),
            KeywordRule::new(&["horn", "honk"], "buzina"),
            KeywordRule::new(&["glass", "breaking", "shatter"], "vidro_quebrando"),
        ])
    }
}

/// Turns [`RawStrategyOutput`] into the standardized result shape.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    keywords: KeywordTable,
}

impl ResultAggregator {
    pub fn new(keywords: KeywordTable) -> Self {
        Self { keywords }
    }

    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    pub fn aggregate(
        &self,
        raw: &RawStrategyOutput,
        taxonomy: &ClassTaxonomy,
    ) -> Result<ClassificationResult> {
        match raw {
            RawStrategyOutput::Embedding { scores } => aggregate_scores(scores, taxonomy),
            RawStrategyOutput::Text { text } => Ok(self.aggregate_text(text, taxonomy)),
            RawStrategyOutput::TokenScore {
                text,
                per_token_confidence,
            } => aggregate_token_scores(text, per_token_confidence),
        }
    }

    fn aggregate_text(&self, text: &str, taxonomy: &ClassTaxonomy) -> ClassificationResult {
        let normalized = text.trim().to_lowercase();

        let class_name = taxonomy
            .iter()
            .find(|(_, name)| normalized.contains(*name))
            .map(|(_, name)| name)
            .or_else(|| self.keywords.lookup(&normalized, taxonomy))
            .unwrap_or_else(|| taxonomy.first())
            .to_string();

        log::debug!("Matched text {:?} to class '{}'", normalized, class_name);

        let probabilities = taxonomy
            .iter()
            .map(|(_, name)| {
                let p = if name == class_name {
                    TEXT_MATCH_CONFIDENCE
                } else {
                    TEXT_BASELINE_PROBABILITY
                };
                (name.to_string(), p)
            })
            .collect();

        ClassificationResult {
            class_name,
            confidence: TEXT_MATCH_CONFIDENCE,
            scale: ConfidenceScale::Unit,
            probabilities: Some(probabilities),
        }
    }
}

fn aggregate_scores(scores: &[f32], taxonomy: &ClassTaxonomy) -> Result<ClassificationResult> {
    if scores.len() != taxonomy.len() {
        return Err(ClassifyError::ScoreMismatch {
            expected: taxonomy.len(),
            actual: scores.len(),
        });
    }

    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(ClassifyError::NonFiniteScore { index });
    }

    // Strictly-greater comparison keeps the lowest index on ties.
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }

    let probabilities: ClassProbabilities = taxonomy
        .iter()
        .zip(scores.iter())
        .map(|((_, name), &p)| (name.to_string(), p))
        .collect();

    Ok(ClassificationResult {
        class_name: taxonomy.names()[best].clone(),
        confidence: scores[best],
        scale: ConfidenceScale::Unit,
        probabilities: Some(probabilities),
    })
}

fn aggregate_token_scores(text: &str, per_token_confidence: &[f32]) -> Result<ClassificationResult> {
    if per_token_confidence.is_empty() {
        return Err(ClassifyError::EmptySequence);
    }

    let mean = per_token_confidence.iter().sum::<f32>() / per_token_confidence.len() as f32;

    Ok(ClassificationResult {
        class_name: text.to_string(),
        confidence: mean,
        scale: ConfidenceScale::Percent,
        probabilities: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn english_taxonomy() -> ClassTaxonomy {
        ClassTaxonomy::new(["siren", "falling_object", "collision", "vehicle_engine", "horn", "glass_breaking"])
            .unwrap()
    }

    fn english_keywords() -> KeywordTable {
        KeywordTable::new(vec![
            KeywordRule::new(&["siren"], "siren"),
            KeywordRule::new(&["crash", "collision"], "collision"),
            KeywordRule::new(&["fall", "dropping"], "falling_object"),
            KeywordRule::new(&["engine", "car", "vehicle"], "vehicle_engine"),
            KeywordRule::new(&["horn", "honk"], "horn"),
            KeywordRule::new(&["glass", "breaking", "shatter"], "glass_breaking"),
        ])
    }

    fn text(s: &str) -> RawStrategyOutput {
        RawStrategyOutput::Text { text: s.to_string() }
    }

    #[test]
    fn test_embedding_picks_argmax() {
        let taxonomy = ClassTaxonomy::default();
        let raw = RawStrategyOutput::Embedding {
            scores: vec![0.05, 0.1, 0.6, 0.1, 0.1, 0.05],
        };
        let result = ResultAggregator::default().aggregate(&raw, &taxonomy).unwrap();

        assert_eq!(result.class_name, "colisao_de_objetos");
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.scale, ConfidenceScale::Unit);

        let probabilities = result.probabilities.unwrap();
        let total: f32 = probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(probabilities.get("buzina"), Some(0.1));
        let max = probabilities.values().fold(f32::MIN, f32::max);
        assert_eq!(max, result.confidence);
    }

    #[test]
    fn test_embedding_ties_go_to_lowest_index() {
        let taxonomy = ClassTaxonomy::default();
        let raw = RawStrategyOutput::Embedding {
            scores: vec![0.1, 0.3, 0.1, 0.3, 0.1, 0.1],
        };
        let result = ResultAggregator::default().aggregate(&raw, &taxonomy).unwrap();
        assert_eq!(result.class_name, "queda_de_objeto");
    }

    #[test]
    fn test_embedding_length_must_match_taxonomy() {
        let taxonomy = ClassTaxonomy::default();
        let raw = RawStrategyOutput::Embedding {
            scores: vec![0.5, 0.5],
        };
        let err = ResultAggregator::default().aggregate(&raw, &taxonomy).unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::ScoreMismatch {
                expected: 6,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_embedding_rejects_non_finite_scores() {
        let taxonomy = ClassTaxonomy::default();
        for scores in [
            vec![f32::NAN, 0.2, 0.9, 0.0, 0.0, 0.0],
            vec![0.1, 0.2, 0.3, f32::INFINITY, 0.0, 0.0],
        ] {
            let bad = scores.iter().position(|s| !s.is_finite()).unwrap();
            let err = ResultAggregator::default()
                .aggregate(&RawStrategyOutput::Embedding { scores }, &taxonomy)
                .unwrap_err();
            assert!(matches!(err, ClassifyError::NonFiniteScore { index } if index == bad));
        }
    }

    #[test]
    fn test_text_exact_taxonomy_name_wins() {
        let aggregator = ResultAggregator::new(english_keywords());
        let result = aggregator
            .aggregate(&text("  A loud HORN in traffic "), &english_taxonomy())
            .unwrap();

        assert_eq!(result.class_name, "horn");
        assert_eq!(result.confidence, 0.75);
        let probabilities = result.probabilities.unwrap();
        assert_eq!(probabilities.get("horn"), Some(0.75));
        assert_eq!(probabilities.get("siren"), Some(0.10));
        assert_eq!(probabilities.len(), 6);
    }

    #[test]
    fn test_text_name_match_is_case_sensitive() {
        // The text is lowercased; class names are matched as written.
        let taxonomy = ClassTaxonomy::new(["siren", "Horn"]).unwrap();
        let result = ResultAggregator::default()
            .aggregate(&text("a horn"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "siren");

        let result = ResultAggregator::default()
            .aggregate(&text("A SIREN"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "siren");
    }

    #[test]
    fn test_text_taxonomy_match_precedes_keywords() {
        // "car" would select vehicle_engine, but "horn" is a verbatim class name.
        let aggregator = ResultAggregator::new(english_keywords());
        let result = aggregator
            .aggregate(&text("a car horn"), &english_taxonomy())
            .unwrap();
        assert_eq!(result.class_name, "horn");
    }

    #[test]
    fn test_text_keyword_precedence_is_pinned() {
        let aggregator = ResultAggregator::default();
        let taxonomy = ClassTaxonomy::default();

        // Only the vehicle rule matches: "collided" is neither "crash" nor "collision".
        let result = aggregator.aggregate(&text("the vehicle collided"), &taxonomy).unwrap();
        assert_eq!(result.class_name, "motor_de_veiculo");

        // Both rules match; collision is checked before the vehicle rule.
        let result = aggregator
            .aggregate(&text("the vehicle collision"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "colisao_de_objetos");

        // Siren is the first rule of all.
        let result = aggregator
            .aggregate(&text("a siren and breaking glass"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "sirene");

        let order: Vec<&str> = aggregator
            .keywords()
            .rules()
            .iter()
            .map(|r| r.class_name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "sirene",
                "colisao_de_objetos",
                "queda_de_objeto",
                "motor_de_veiculo",
                "buzina",
                "vidro_quebrando"
            ]
        );
    }

    #[test]
    fn test_text_without_keywords_defaults_to_first_class() {
        let taxonomy = ClassTaxonomy::default();
        let result = ResultAggregator::default()
            .aggregate(&text("[Music]"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "sirene");
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn test_keyword_rules_for_missing_classes_are_skipped() {
        let taxonomy = ClassTaxonomy::new(["silence", "buzina"]).unwrap();
        let result = ResultAggregator::default()
            .aggregate(&text("engine then honk"), &taxonomy)
            .unwrap();
        assert_eq!(result.class_name, "buzina");
    }

    #[test]
    fn test_text_probabilities_are_not_normalized() {
        let taxonomy = ClassTaxonomy::default();
        let result = ResultAggregator::default()
            .aggregate(&text("glass"), &taxonomy)
            .unwrap();
        let total: f32 = result.probabilities.unwrap().values().sum();
        assert!((total - 1.25).abs() < 1e-5);
    }

    #[test]
    fn test_token_scores_average() {
        let raw = RawStrategyOutput::TokenScore {
            text: "Siren wailing".to_string(),
            per_token_confidence: vec![80.0, 60.0, 40.0],
        };
        let result = ResultAggregator::default()
            .aggregate(&raw, &ClassTaxonomy::default())
            .unwrap();

        assert_eq!(result.class_name, "Siren wailing");
        assert_eq!(result.confidence, 60.0);
        assert_eq!(result.scale, ConfidenceScale::Percent);
        assert!((result.confidence_unit() - 0.6).abs() < 1e-6);
        assert!(result.probabilities.is_none());
    }

    #[test]
    fn test_empty_token_scores_fail() {
        let raw = RawStrategyOutput::TokenScore {
            text: String::new(),
            per_token_confidence: Vec::new(),
        };
        let err = ResultAggregator::default()
            .aggregate(&raw, &ClassTaxonomy::default())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::EmptySequence));
    }
}
