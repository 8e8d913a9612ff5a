//! The effect catalog: immutable per-marker reference data (alleles, direction, weight,
//! category tags) loaded once from TOML and validated before any scoring starts.

use crate::resolve::{join_tokens, tokenize};
use crate::types::{AlleleSet, Category};
use ahash::AHashSet;
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Axis names used when a catalog does not label its composite ends.
pub const DEFAULT_FIRST_LABEL: &str = "first";
pub const DEFAULT_SECOND_LABEL: &str = "second";

/// The endurance/power marker catalog compiled into the binary.
pub const ATHLETIC_CATALOG_TOML: &str = include_str!("../data/athletic.toml");

/// How resolved allele counts turn into a signed contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringPolicy {
    /// `+w` homozygous first, `-w` homozygous second, heterozygotes neutral.
    #[default]
    Additive,
    /// `w × (copies of the first allele)`.
    PerAllele,
}

/// The unit in which a TOML catalog writes its weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightScale {
    #[default]
    Linear,
    /// Weights are odds ratios; the stored weight becomes `ln(OR)`.
    OddsRatio,
}

/// Errors raised while loading or validating reference data.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read reference data file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML reference data: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Marker '{0}' is declared more than once.")]
    DuplicateMarker(String),
    #[error("Marker '{marker}' lists allele '{allele}' as both first and second allele.")]
    OverlappingAlleles { marker: String, allele: String },
    #[error("Marker '{0}' must declare at least one first and one second allele.")]
    EmptyAlleles(String),
    #[error("Marker '{marker}' has malformed allele token '{token}'.")]
    InvalidAlleleToken { marker: String, token: String },
    #[error("Marker '{marker}' uses category '{category}', which the catalog header does not declare.")]
    UndeclaredCategory { marker: String, category: String },
    #[error("{0} declares no categories.")]
    NoCategories(String),
    #[error("Marker '{marker}' has negative weight {weight}; additive weights are magnitudes.")]
    NegativeWeight { marker: String, weight: f64 },
    #[error("Marker '{0}' has a weight that is not a finite number.")]
    NonFiniteWeight(String),
    #[error(
        "Marker '{marker}' has odds ratio {odds_ratio}; additive catalogs need an odds ratio of at least 1."
    )]
    InvalidOddsRatio { marker: String, odds_ratio: f64 },
    #[error("Marker '{marker}' has allele frequency {frequency}, outside [0, 1].")]
    InvalidFrequency { marker: String, frequency: f64 },
    #[error("Reference data is invalid: {0}")]
    Invalid(String),
}

/// One marker of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRecord {
    pub id: String,
    pub gene: String,
    pub name: Option<String>,
    pub first: AlleleSet,
    pub second: AlleleSet,
    pub categories: Vec<Category>,
    /// Additive: non-negative magnitude. Per-allele: signed per-copy coefficient.
    pub weight: f64,
    /// Reference frequency of the first allele, when known.
    pub frequency: Option<f64>,
    pub effect: Option<String>,
    pub evidence: Option<String>,
    pub notes: Option<String>,
    /// Genotype literal (`CC`, `CT`, ...) to interpretation text.
    pub interpretations: BTreeMap<String, String>,
}

impl EffectRecord {
    /// A bare record with a single category; the remaining fields can be set directly.
    pub fn new(
        id: impl Into<String>,
        first: AlleleSet,
        second: AlleleSet,
        category: Category,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            gene: String::new(),
            name: None,
            first,
            second,
            categories: vec![category],
            weight,
            frequency: None,
            effect: None,
            evidence: None,
            notes: None,
            interpretations: BTreeMap::new(),
        }
    }
}

/// Catalog-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogHeader {
    pub name: String,
    pub policy: ScoringPolicy,
    /// Categories are facets of one axis and may be summed.
    pub composite: bool,
    pub first_label: String,
    pub second_label: String,
    pub categories: Vec<Category>,
}

impl CatalogHeader {
    pub fn new(name: impl Into<String>, policy: ScoringPolicy, categories: Vec<Category>) -> Self {
        Self {
            name: name.into(),
            policy,
            composite: false,
            first_label: default_first_label(),
            second_label: default_second_label(),
            categories,
        }
    }
}

/// A validated, immutable catalog.
#[derive(Debug, Clone)]
pub struct EffectCatalog {
    header: CatalogHeader,
    records: Vec<EffectRecord>,
}

impl EffectCatalog {
    /// Builds a catalog from parts, enforcing every integrity rule.
    pub fn new(header: CatalogHeader, records: Vec<EffectRecord>) -> Result<Self, CatalogError> {
        if header.categories.is_empty() {
            return Err(CatalogError::NoCategories(format!("catalog '{}'", header.name)));
        }
        let declared: AHashSet<&Category> = header.categories.iter().collect();
        let mut seen: AHashSet<&str> = AHashSet::with_capacity(records.len());

        for record in &records {
            if !seen.insert(record.id.as_str()) {
                return Err(CatalogError::DuplicateMarker(record.id.clone()));
            }
            validate_record(record, header.policy, &declared)?;
        }

        info!(
            "Loaded catalog '{}' with {} markers across {} categories.",
            header.name,
            records.len(),
            header.categories.len()
        );
        Ok(Self { header, records })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = toml::from_str(text)?;
        raw.into_catalog()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        debug!("Reading effect catalog from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The bundled athletic-performance catalog.
    pub fn athletic() -> Result<Self, CatalogError> {
        Self::from_toml_str(ATHLETIC_CATALOG_TOML)
    }

    pub fn header(&self) -> &CatalogHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn policy(&self) -> ScoringPolicy {
        self.header.policy
    }

    pub fn categories(&self) -> &[Category] {
        &self.header.categories
    }

    pub fn records(&self) -> &[EffectRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&EffectRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

fn validate_record(
    record: &EffectRecord,
    policy: ScoringPolicy,
    declared: &AHashSet<&Category>,
) -> Result<(), CatalogError> {
    if record.first.is_empty() || record.second.is_empty() {
        return Err(CatalogError::EmptyAlleles(record.id.clone()));
    }
    for token in record.first.iter().chain(record.second.iter()) {
        if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::InvalidAlleleToken {
                marker: record.id.clone(),
                token: token.to_string(),
            });
        }
    }
    if let Some(allele) = record.first.intersection_with(&record.second) {
        return Err(CatalogError::OverlappingAlleles {
            marker: record.id.clone(),
            allele: allele.to_string(),
        });
    }
    if record.categories.is_empty() {
        return Err(CatalogError::NoCategories(format!("marker '{}'", record.id)));
    }
    if let Some(category) = record.categories.iter().find(|c| !declared.contains(c)) {
        return Err(CatalogError::UndeclaredCategory {
            marker: record.id.clone(),
            category: category.to_string(),
        });
    }
    if !record.weight.is_finite() {
        return Err(CatalogError::NonFiniteWeight(record.id.clone()));
    }
    if policy == ScoringPolicy::Additive && record.weight < 0.0 {
        return Err(CatalogError::NegativeWeight {
            marker: record.id.clone(),
            weight: record.weight,
        });
    }
    if let Some(frequency) = record.frequency {
        if !(0.0..=1.0).contains(&frequency) {
            return Err(CatalogError::InvalidFrequency {
                marker: record.id.clone(),
                frequency,
            });
        }
    }
    Ok(())
}

fn default_first_label() -> String {
    DEFAULT_FIRST_LABEL.to_string()
}

fn default_second_label() -> String {
    DEFAULT_SECOND_LABEL.to_string()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    name: String,
    #[serde(default)]
    policy: ScoringPolicy,
    #[serde(default)]
    weight_scale: WeightScale,
    #[serde(default)]
    composite: bool,
    #[serde(default = "default_first_label")]
    first_label: String,
    #[serde(default = "default_second_label")]
    second_label: String,
    categories: Vec<String>,
    #[serde(default)]
    markers: Vec<RawMarker>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMarker {
    id: String,
    #[serde(default)]
    gene: String,
    name: Option<String>,
    first: Vec<String>,
    second: Vec<String>,
    categories: Vec<String>,
    weight: f64,
    frequency: Option<f64>,
    effect: Option<String>,
    evidence: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    interpretations: BTreeMap<String, String>,
}

impl RawCatalog {
    fn into_catalog(self) -> Result<EffectCatalog, CatalogError> {
        let header = CatalogHeader {
            name: self.name,
            policy: self.policy,
            composite: self.composite,
            first_label: self.first_label,
            second_label: self.second_label,
            categories: self.categories.into_iter().map(Category::new).collect(),
        };
        let records = self
            .markers
            .into_iter()
            .map(|m| m.into_record(self.weight_scale, self.policy))
            .collect::<Result<Vec<_>, _>>()?;
        EffectCatalog::new(header, records)
    }
}

impl RawMarker {
    fn into_record(
        self,
        scale: WeightScale,
        policy: ScoringPolicy,
    ) -> Result<EffectRecord, CatalogError> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(CatalogError::Invalid("a marker has an empty id".to_string()));
        }

        let weight = match scale {
            WeightScale::Linear => self.weight,
            WeightScale::OddsRatio => {
                let odds_ratio = self.weight;
                let floor = match policy {
                    ScoringPolicy::Additive => 1.0,
                    ScoringPolicy::PerAllele => f64::MIN_POSITIVE,
                };
                if !odds_ratio.is_finite() || odds_ratio < floor {
                    return Err(CatalogError::InvalidOddsRatio {
                        marker: id,
                        odds_ratio,
                    });
                }
                odds_ratio.ln()
            }
        };

        let interpretations = self
            .interpretations
            .into_iter()
            .map(|(literal, text)| (join_tokens(&tokenize(&literal)), text))
            .collect();

        Ok(EffectRecord {
            id,
            gene: self.gene,
            name: self.name,
            first: AlleleSet::new(&self.first),
            second: AlleleSet::new(&self.second),
            categories: self.categories.into_iter().map(Category::new).collect(),
            weight,
            frequency: self.frequency,
            effect: self.effect,
            evidence: self.evidence,
            notes: self.notes,
            interpretations,
        })
    }
}
