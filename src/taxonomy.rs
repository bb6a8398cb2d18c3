use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ClassifyError, Result};

/// Classes of the reference dataset, in training label order.
const DEFAULT_CLASSES: &[&str] = &[
    "sirene",
    "queda_de_objeto",
    "colisao_de_objetos",
    "motor_de_veiculo",
    "buzina",
    "vidro_quebrando",
];

/// Ordered, immutable mapping from class index to class name.
///
/// Indices are contiguous from 0 and names are unique. Index `i` of every
/// score vector produced by a strategy refers to `name(i)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTaxonomy {
    names: Vec<String>,
}

/// On-disk taxonomy: either a plain list of names or an `{"0": "name", ...}`
/// object.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaxonomyFile {
    List(Vec<String>),
    Indexed(BTreeMap<String, String>),
}

impl ClassTaxonomy {
    /// Build a taxonomy from names in index order.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if names.is_empty() {
            return Err(ClassifyError::InvalidTaxonomy(
                "taxonomy must contain at least one class".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err(ClassifyError::InvalidTaxonomy(
                    "class names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(ClassifyError::InvalidTaxonomy(format!(
                    "duplicate class name: {}",
                    name
                )));
            }
        }

        Ok(Self { names })
    }

    /// Load a taxonomy from a JSON file.
    ///
    /// Accepts `["sirene", "buzina"]` or `{"0": "sirene", "1": "buzina"}`.
    /// Indexed objects must cover `0..n` without gaps.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let taxonomy = Self::from_json_str(&contents)?;
        log::info!("Loaded {} classes from {:?}", taxonomy.len(), path);
        Ok(taxonomy)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        match serde_json::from_str::<TaxonomyFile>(json)? {
            TaxonomyFile::List(names) => Self::new(names),
            TaxonomyFile::Indexed(map) => {
                let mut indexed: Vec<(usize, String)> = Vec::with_capacity(map.len());
                for (key, name) in map {
                    let index = key.trim().parse::<usize>().map_err(|_| {
                        ClassifyError::InvalidTaxonomy(format!("invalid class index: {}", key))
                    })?;
                    indexed.push((index, name));
                }
                indexed.sort_by_key(|(index, _)| *index);

                for (expected, (index, _)) in indexed.iter().enumerate() {
                    if *index != expected {
                        return Err(ClassifyError::InvalidTaxonomy(format!(
                            "class indices must be contiguous from 0, missing {}",
                            expected
                        )));
                    }
                }

                Self::new(indexed.into_iter().map(|(_, name)| name))
            }
        }
    }

    /// Derive a taxonomy from a training annotations CSV.
    ///
    /// The first row is a header; the label is the second field. Classes are
    /// indexed in order of first appearance, which is the index order a head
    /// trained on the same annotations uses.
    pub fn from_annotations_csv(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let taxonomy = Self::from_annotations_str(&contents)?;
        log::info!("Derived {} classes from {:?}", taxonomy.len(), path);
        Ok(taxonomy)
    }

    pub fn from_annotations_str(csv: &str) -> Result<Self> {
        let mut labels: Vec<String> = Vec::new();
        for (line_no, line) in csv.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let label = csv_field(line, 1).ok_or_else(|| {
                ClassifyError::InvalidTaxonomy(format!(
                    "annotation row {} has no label column",
                    line_no + 1
                ))
            })?;
            if !labels.iter().any(|l| *l == label) {
                labels.push(label);
            }
        }
        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// The index-0 class, used as the last-resort prediction.
    pub fn first(&self) -> &str {
        &self.names[0]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate `(index, name)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }
}

impl Default for ClassTaxonomy {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Field `index` of one CSV row, with double-quoted fields unquoted.
fn csv_field(line: &str, index: usize) -> Option<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
        .into_iter()
        .nth(index)
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}
