// ========================================================================================
//
//                      Sparse marker-vote lineage classification
//
// ========================================================================================

use crate::catalog::CatalogError;
use crate::resolve::{complement_token, tokenize};
use crate::store::{ChromosomeSummary, GenotypeCall, GenotypeStore};
use crate::types::{BiologicalSex, normalize_chromosome_label};
use ahash::AHashSet;
use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// The Y-chromosome diagnostic panel compiled into the binary.
pub const Y_PANEL_TOML: &str = include_str!("../data/haplogroups_y.toml");

/// Labels with this prefix exclude a lineage and are never counted as support.
pub const EXCLUSION_PREFIX: &str = "not-";

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticMarker {
    pub id: String,
    /// Observed allele to the labels it supports (or excludes), in panel order.
    pub alleles: IndexMap<String, Vec<String>>,
}

/// A validated set of diagnostic markers for one chromosome.
#[derive(Debug, Clone)]
pub struct DiagnosticPanel {
    name: String,
    chromosome: String,
    markers: Vec<DiagnosticMarker>,
    descriptions: BTreeMap<String, String>,
    /// Positive labels in declaration order; decides ties.
    label_order: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPanel {
    name: String,
    chromosome: String,
    markers: Vec<RawDiagnostic>,
    #[serde(default)]
    descriptions: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDiagnostic {
    id: String,
    alleles: IndexMap<String, Vec<String>>,
}

impl DiagnosticPanel {
    pub fn new(
        name: impl Into<String>,
        chromosome: &str,
        markers: Vec<DiagnosticMarker>,
        descriptions: BTreeMap<String, String>,
    ) -> Result<Self, CatalogError> {
        let mut seen = AHashSet::with_capacity(markers.len());
        let mut label_order: Vec<String> = Vec::new();

        for marker in &markers {
            if !seen.insert(marker.id.as_str()) {
                return Err(CatalogError::DuplicateMarker(marker.id.clone()));
            }
            if marker.alleles.is_empty() {
                return Err(CatalogError::EmptyAlleles(marker.id.clone()));
            }
            for (allele, labels) in &marker.alleles {
                if allele.is_empty() || !allele.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(CatalogError::InvalidAlleleToken {
                        marker: marker.id.clone(),
                        token: allele.clone(),
                    });
                }
                for label in labels {
                    if label.trim().is_empty() {
                        return Err(CatalogError::Invalid(format!(
                            "marker '{}' maps allele '{allele}' to an empty label",
                            marker.id
                        )));
                    }
                    if !is_exclusion(label) && !label_order.contains(label) {
                        label_order.push(label.clone());
                    }
                }
            }
        }

        Ok(Self {
            name: name.into(),
            chromosome: normalize_chromosome_label(chromosome),
            markers,
            descriptions,
            label_order,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let raw: RawPanel = toml::from_str(text)?;
        let markers = raw
            .markers
            .into_iter()
            .map(|m| DiagnosticMarker {
                id: m.id.trim().to_string(),
                alleles: m
                    .alleles
                    .into_iter()
                    .map(|(allele, labels)| (allele.trim().to_ascii_uppercase(), labels))
                    .collect(),
            })
            .collect();
        let panel = Self::new(raw.name, &raw.chromosome, markers, raw.descriptions)?;
        info!(
            "Loaded diagnostic panel '{}' with {} markers on chromosome {}.",
            panel.name,
            panel.markers.len(),
            panel.chromosome
        );
        Ok(panel)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn y_chromosome() -> Result<Self, CatalogError> {
        Self::from_toml_str(Y_PANEL_TOML)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    pub fn markers(&self) -> &[DiagnosticMarker] {
        &self.markers
    }

    pub fn description(&self, label: &str) -> Option<&str> {
        self.descriptions.get(label).map(String::as_str)
    }

    fn declaration_rank(&self, label: &str) -> usize {
        self.label_order
            .iter()
            .position(|l| l == label)
            .unwrap_or(usize::MAX)
    }
}

pub fn is_exclusion(label: &str) -> bool {
    label.starts_with(EXCLUSION_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteOptions {
    /// Also look up the complement of the observed allele when it is not a key.
    pub allow_complement: bool,
}

/// One marker's support for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub marker_id: String,
    pub allele: String,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.marker_id, self.allele)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub label: String,
    pub support: Vec<Vote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_support(markers: usize) -> Option<Self> {
        match markers {
            0 => None,
            1 => Some(ConfidenceTier::Low),
            2 => Some(ConfidenceTier::Medium),
            _ => Some(ConfidenceTier::High),
        }
    }

    /// The nominal probability quoted alongside each tier.
    pub fn nominal_confidence(self) -> f64 {
        match self {
            ConfidenceTier::High => 0.65,
            ConfidenceTier::Medium => 0.40,
            ConfidenceTier::Low => 0.20,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Called {
        label: String,
        tier: ConfidenceTier,
        description: Option<String>,
        /// Every supported label, best first.
        tallies: Vec<Tally>,
    },
    InsufficientEvidence,
}

impl Classification {
    pub fn label(&self) -> Option<&str> {
        match self {
            Classification::Called { label, .. } => Some(label.as_str()),
            Classification::InsufficientEvidence => None,
        }
    }

    pub fn tallies(&self) -> &[Tally] {
        match self {
            Classification::Called { tallies, .. } => tallies.as_slice(),
            Classification::InsufficientEvidence => &[],
        }
    }
}

/// Collapses a haploid call (`G` or `GG`) to its single allele. Mixed calls are `None`.
fn haploid_allele(genotype: &str) -> Option<String> {
    let tokens = tokenize(genotype);
    let first = tokens.first()?;
    tokens.iter().all(|t| t == first).then(|| first.clone())
}

/// Tallies votes from every diagnostic marker and picks the best-supported label.
///
/// Ties go to the label declared earliest in the panel.
pub fn classify<S: GenotypeStore + ?Sized>(
    panel: &DiagnosticPanel,
    store: &S,
    options: VoteOptions,
) -> Classification {
    let mut votes: BTreeMap<&str, Vec<Vote>> = BTreeMap::new();

    for marker in panel.markers() {
        let GenotypeCall::Called(genotype) = store.lookup(&marker.id) else {
            continue;
        };
        let Some(allele) = haploid_allele(genotype) else {
            debug!("{}: call '{}' is not haploid; skipped", marker.id, genotype);
            continue;
        };

        let matched = marker.alleles.get_key_value(&allele).or_else(|| {
            if options.allow_complement {
                marker.alleles.get_key_value(&complement_token(&allele))
            } else {
                None
            }
        });
        let Some((key, labels)) = matched else {
            continue;
        };

        for label in labels.iter().filter(|l| !is_exclusion(l)) {
            votes.entry(label.as_str()).or_default().push(Vote {
                marker_id: marker.id.clone(),
                allele: key.clone(),
            });
        }
    }

    let mut tallies: Vec<Tally> = votes
        .into_iter()
        .map(|(label, support)| Tally {
            label: label.to_string(),
            support,
        })
        .collect();
    tallies.sort_by(|a, b| {
        b.support
            .len()
            .cmp(&a.support.len())
            .then_with(|| panel.declaration_rank(&a.label).cmp(&panel.declaration_rank(&b.label)))
    });

    let Some(best) = tallies.first() else {
        return Classification::InsufficientEvidence;
    };
    let Some(tier) = ConfidenceTier::from_support(best.support.len()) else {
        return Classification::InsufficientEvidence;
    };
    let label = best.label.clone();
    let description = panel.description(&label).map(str::to_string);

    Classification::Called {
        label,
        tier,
        description,
        tallies,
    }
}

/// The result of the paternal-lineage step, including why it did not run.
#[derive(Debug, Clone, PartialEq)]
pub enum LineagePrediction {
    NotMale,
    NoChromosomeData,
    Classified(Classification),
}

/// Runs the panel only for male stores that carry data on the panel's chromosome.
pub fn predict_y_lineage<S: GenotypeStore + ?Sized>(
    panel: &DiagnosticPanel,
    store: &S,
    options: VoteOptions,
) -> LineagePrediction {
    if store.sex() != BiologicalSex::Male {
        return LineagePrediction::NotMale;
    }
    if store.chromosome_summary(panel.chromosome()).total == 0 {
        return LineagePrediction::NoChromosomeData;
    }
    LineagePrediction::Classified(classify(panel, store, options))
}

/// Total and called mitochondrial markers.
pub fn mitochondrial_summary<S: GenotypeStore + ?Sized>(store: &S) -> ChromosomeSummary {
    store.chromosome_summary("MT")
}
