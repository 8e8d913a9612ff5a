//! Genotype interpretation panels: per-marker lookup tables from a genotype literal to a
//! human-readable statement, grouped into titled sections.

use crate::catalog::CatalogError;
use crate::resolve::{Orientation, join_tokens, lookup_literal, tokenize};
use crate::store::{GenotypeCall, GenotypeStore};
use ahash::AHashSet;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// The trait and risk panel compiled into the binary.
pub const INTERPRETATIONS_TOML: &str = include_str!("../data/interpretations.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct PanelMarker {
    pub id: String,
    pub gene: String,
    /// What the marker informs on: a drug, condition, trait or system.
    pub subject: Option<String>,
    /// Mechanism note shown with every finding.
    pub effect: Option<String>,
    pub evidence: Option<String>,
    pub genotypes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelSection {
    pub title: String,
    pub show_evidence: bool,
    pub markers: Vec<PanelMarker>,
}

#[derive(Debug, Clone)]
pub struct InterpretationPanel {
    name: String,
    sections: Vec<PanelSection>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPanel {
    name: String,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    title: String,
    #[serde(default)]
    show_evidence: bool,
    #[serde(default)]
    markers: Vec<RawPanelMarker>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPanelMarker {
    id: String,
    #[serde(default)]
    gene: String,
    subject: Option<String>,
    effect: Option<String>,
    evidence: Option<String>,
    #[serde(default)]
    genotypes: BTreeMap<String, String>,
}

impl InterpretationPanel {
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let raw: RawPanel = toml::from_str(text)?;
        let mut sections = Vec::with_capacity(raw.sections.len());

        for section in raw.sections {
            let mut seen = AHashSet::new();
            let mut markers = Vec::with_capacity(section.markers.len());
            for marker in section.markers {
                let id = marker.id.trim().to_string();
                if !seen.insert(id.clone()) {
                    return Err(CatalogError::DuplicateMarker(id));
                }
                let genotypes = marker
                    .genotypes
                    .into_iter()
                    .map(|(literal, text)| (join_tokens(&tokenize(&literal)), text))
                    .collect();
                markers.push(PanelMarker {
                    id,
                    gene: marker.gene,
                    subject: marker.subject,
                    effect: marker.effect,
                    evidence: marker.evidence,
                    genotypes,
                });
            }
            sections.push(PanelSection {
                title: section.title,
                show_evidence: section.show_evidence,
                markers,
            });
        }

        info!(
            "Loaded interpretation panel '{}' with {} sections.",
            raw.name,
            sections.len()
        );
        Ok(Self {
            name: raw.name,
            sections,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_toml_str(INTERPRETATIONS_TOML)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sections(&self) -> &[PanelSection] {
        &self.sections
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub marker_id: String,
    pub gene: String,
    pub subject: Option<String>,
    pub effect: Option<String>,
    pub evidence: Option<String>,
    pub genotype: String,
    /// `None` when the call matches none of the panel's literals on either strand.
    pub interpretation: Option<String>,
    pub orientation: Option<Orientation>,
}

impl Finding {
    pub fn text(&self) -> String {
        match &self.interpretation {
            Some(text) => text.clone(),
            None => format!("Unknown genotype: {}", self.genotype),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionFindings {
    pub title: String,
    pub show_evidence: bool,
    pub findings: Vec<Finding>,
    /// Markers with no usable call.
    pub absent: Vec<String>,
}

/// Looks up every panel marker in the store.
pub fn annotate<S: GenotypeStore + ?Sized>(
    panel: &InterpretationPanel,
    store: &S,
) -> Vec<SectionFindings> {
    panel
        .sections()
        .iter()
        .map(|section| {
            let mut findings = Vec::new();
            let mut absent = Vec::new();
            for marker in &section.markers {
                let GenotypeCall::Called(genotype) = store.lookup(&marker.id) else {
                    absent.push(marker.id.clone());
                    continue;
                };
                let matched = lookup_literal(genotype, &marker.genotypes);
                findings.push(Finding {
                    marker_id: marker.id.clone(),
                    gene: marker.gene.clone(),
                    subject: marker.subject.clone(),
                    effect: marker.effect.clone(),
                    evidence: marker.evidence.clone(),
                    genotype: genotype.to_string(),
                    interpretation: matched.map(|(_, text, _)| text.clone()),
                    orientation: matched.map(|(_, _, orientation)| orientation),
                });
            }
            SectionFindings {
                title: section.title.clone(),
                show_evidence: section.show_evidence,
                findings,
                absent,
            }
        })
        .collect()
}
