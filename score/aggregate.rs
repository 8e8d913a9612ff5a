// ========================================================================================
//
//                              Per-category score aggregation
//
// ========================================================================================

use crate::catalog::{
    DEFAULT_FIRST_LABEL, DEFAULT_SECOND_LABEL, EffectCatalog, EffectRecord, ScoringPolicy,
};
use crate::resolve::{Resolution, lookup_literal, resolve};
use crate::standardize::MatchedMarker;
use crate::store::{GenotypeCall, GenotypeStore};
use crate::types::Category;
use log::{debug, info};
use std::fmt;

/// Composite totals at or beyond these magnitudes are "strong" / "moderate" leanings.
pub const STRONG_BALANCE_THRESHOLD: f64 = 1.5;
pub const MODERATE_BALANCE_THRESHOLD: f64 = 0.5;

/// The composite total treated as a full (100 %) leaning toward one side.
pub const MAX_REALISTIC_COMPOSITE: f64 = 3.0;

impl ScoringPolicy {
    /// The signed contribution of one resolved marker.
    pub fn contribution(self, weight: f64, resolution: &Resolution) -> f64 {
        match self {
            ScoringPolicy::Additive => {
                if resolution.is_homozygous_first() {
                    weight
                } else if resolution.is_homozygous_second() {
                    -weight
                } else {
                    0.0
                }
            }
            ScoringPolicy::PerAllele => weight * f64::from(resolution.first_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// Not present in the genotype file.
    Absent,
    /// Present, but the platform reported no call.
    NoCall,
    /// Called, but no read order or strand matches the catalog alleles.
    Unresolved,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingReason::Absent => "absent",
            MissingReason::NoCall => "no call",
            MissingReason::Unresolved => "unresolved",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingMarker {
    pub marker_id: String,
    pub gene: String,
    pub reason: MissingReason,
    /// The raw call, for unresolved markers.
    pub genotype: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub marker_id: String,
    pub gene: String,
    pub genotype: String,
    pub resolution: Resolution,
    pub value: f64,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryScore {
    pub category: Category,
    pub total: f64,
    pub contributions: Vec<Contribution>,
    pub missing: Vec<MissingMarker>,
}

impl CategoryScore {
    fn new(category: Category) -> Self {
        Self {
            category,
            total: 0.0,
            contributions: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn matched(&self) -> usize {
        self.contributions.len()
    }

    pub fn marker_count(&self) -> usize {
        self.contributions.len() + self.missing.len()
    }
}

/// Where a composite total sits on the first/second axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balance {
    StrongFirst,
    ModerateFirst,
    Balanced,
    ModerateSecond,
    StrongSecond,
}

impl Balance {
    pub fn classify(total: f64) -> Self {
        if total > STRONG_BALANCE_THRESHOLD {
            Balance::StrongFirst
        } else if total > MODERATE_BALANCE_THRESHOLD {
            Balance::ModerateFirst
        } else if total < -STRONG_BALANCE_THRESHOLD {
            Balance::StrongSecond
        } else if total < -MODERATE_BALANCE_THRESHOLD {
            Balance::ModerateSecond
        } else {
            Balance::Balanced
        }
    }

    pub fn describe(self, first_label: &str, second_label: &str) -> String {
        match self {
            Balance::StrongFirst => format!("Strong {first_label}"),
            Balance::ModerateFirst => format!("Moderate {first_label}"),
            Balance::Balanced => "Balanced/Mixed".to_string(),
            Balance::ModerateSecond => format!("Moderate {second_label}"),
            Balance::StrongSecond => format!("Strong {second_label}"),
        }
    }
}

/// The full result of scoring one genotype store against one catalog.
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub catalog_name: String,
    pub policy: ScoringPolicy,
    pub first_label: String,
    pub second_label: String,
    pub categories: Vec<CategoryScore>,
    /// Every missing marker once, in catalog order.
    pub missing: Vec<MissingMarker>,
    pub total_markers: usize,
    composite: bool,
    matched: Vec<MatchedMarker>,
}

impl ScoreReport {
    pub fn matched(&self) -> usize {
        self.matched.len()
    }

    /// Matched fraction of the catalog, in [0, 1].
    pub fn coverage(&self) -> f64 {
        if self.total_markers == 0 {
            0.0
        } else {
            self.matched.len() as f64 / self.total_markers as f64
        }
    }

    pub fn is_composite(&self) -> bool {
        self.composite || self.categories.len() == 1
    }

    /// The single-axis total. `None` when the categories are independent mechanisms.
    pub fn composite_total(&self) -> Option<f64> {
        self.is_composite()
            .then(|| self.matched.iter().map(|m| m.contribution).sum())
    }

    /// Whether the catalog itself declares a composite axis with named ends. Single-category
    /// catalogs have a composite total without one.
    pub fn has_named_axis(&self) -> bool {
        self.composite
            && self.first_label != DEFAULT_FIRST_LABEL
            && self.second_label != DEFAULT_SECOND_LABEL
    }

    pub fn balance(&self) -> Option<Balance> {
        self.composite_total().map(Balance::classify)
    }

    /// `(first %, second %)` of the composite total against a full-scale leaning.
    pub fn axis_share(&self) -> Option<(f64, f64)> {
        self.composite_total().map(|total| {
            let first = (total / MAX_REALISTIC_COMPOSITE * 100.0).clamp(0.0, 100.0);
            let second = (-total / MAX_REALISTIC_COMPOSITE * 100.0).clamp(0.0, 100.0);
            (first, second)
        })
    }

    /// The composite total divided by the summed absolute weights of matched markers.
    pub fn normalized_score(&self) -> Option<f64> {
        let total = self.composite_total()?;
        let weight_sum: f64 = self.matched.iter().map(|m| m.beta.abs()).sum();
        Some(if weight_sum > 0.0 {
            total / weight_sum
        } else {
            0.0
        })
    }

    /// One entry per resolved catalog marker, ready for standardization.
    pub fn matched_markers(&self) -> &[MatchedMarker] {
        &self.matched
    }

    pub fn category(&self, name: &str) -> Option<&CategoryScore> {
        self.categories.iter().find(|c| c.category.as_str() == name)
    }
}

/// Scores every catalog marker against the store. Per-marker problems never fail the run;
/// they are recorded as missing and contribute nothing.
pub fn score<S: GenotypeStore + ?Sized>(catalog: &EffectCatalog, store: &S) -> ScoreReport {
    let header = catalog.header();
    let policy = catalog.policy();
    let mut categories: Vec<CategoryScore> = header
        .categories
        .iter()
        .cloned()
        .map(CategoryScore::new)
        .collect();
    let mut missing = Vec::new();
    let mut matched = Vec::new();

    for record in catalog.records() {
        match evaluate(record, policy, &header.first_label, &header.second_label, store) {
            Ok(contribution) => {
                matched.push(MatchedMarker {
                    beta: record.weight,
                    frequency: record.frequency,
                    contribution: contribution.value,
                    policy,
                });
                for slot in categories
                    .iter_mut()
                    .filter(|c| record.categories.contains(&c.category))
                {
                    slot.total += contribution.value;
                    slot.contributions.push(contribution.clone());
                }
            }
            Err(marker) => {
                for slot in categories
                    .iter_mut()
                    .filter(|c| record.categories.contains(&c.category))
                {
                    slot.missing.push(marker.clone());
                }
                missing.push(marker);
            }
        }
    }

    info!(
        "Scored '{}': {} of {} markers matched, {} missing.",
        catalog.name(),
        matched.len(),
        catalog.len(),
        missing.len()
    );

    ScoreReport {
        catalog_name: catalog.name().to_string(),
        policy,
        first_label: header.first_label.clone(),
        second_label: header.second_label.clone(),
        categories,
        missing,
        total_markers: catalog.len(),
        composite: header.composite,
        matched,
    }
}

fn evaluate<S: GenotypeStore + ?Sized>(
    record: &EffectRecord,
    policy: ScoringPolicy,
    first_label: &str,
    second_label: &str,
    store: &S,
) -> Result<Contribution, MissingMarker> {
    let missing = |reason, genotype: Option<&str>| MissingMarker {
        marker_id: record.id.clone(),
        gene: record.gene.clone(),
        reason,
        genotype: genotype.map(str::to_string),
    };

    let genotype = match store.lookup(&record.id) {
        GenotypeCall::Absent => return Err(missing(MissingReason::Absent, None)),
        GenotypeCall::NoCall => return Err(missing(MissingReason::NoCall, None)),
        GenotypeCall::Called(genotype) => genotype,
    };

    let Some(resolution) = resolve(genotype, &record.first, &record.second) else {
        debug!(
            "{}: genotype '{}' does not match alleles {} / {} on either strand",
            record.id, genotype, record.first, record.second
        );
        return Err(missing(MissingReason::Unresolved, Some(genotype)));
    };

    let value = policy.contribution(record.weight, &resolution);
    let interpretation = describe(record, policy, &resolution, genotype, first_label, second_label);

    Ok(Contribution {
        marker_id: record.id.clone(),
        gene: record.gene.clone(),
        genotype: genotype.to_string(),
        resolution,
        value,
        interpretation,
    })
}

fn describe(
    record: &EffectRecord,
    policy: ScoringPolicy,
    resolution: &Resolution,
    genotype: &str,
    first_label: &str,
    second_label: &str,
) -> String {
    let strand = if resolution.strand_flipped() {
        format!("{genotype} [flip: {}]", resolution.matched)
    } else {
        genotype.to_string()
    };

    if let Some((_, text, _)) = lookup_literal(genotype, &record.interpretations) {
        return format!("{text} ({strand})");
    }

    let text = match policy {
        ScoringPolicy::Additive if resolution.is_homozygous_first() => {
            format!("Homozygous {first_label}")
        }
        ScoringPolicy::Additive if resolution.is_homozygous_second() => {
            format!("Homozygous {second_label}")
        }
        ScoringPolicy::Additive => "Heterozygous".to_string(),
        ScoringPolicy::PerAllele => format!("{} × {}", resolution.first_count, record.first),
    };
    format!("{text} ({strand})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogHeader;
    use crate::store::MemoryGenotypeStore;
    use crate::types::AlleleSet;
    use approx::assert_relative_eq;

    fn single_marker_catalog(policy: ScoringPolicy) -> EffectCatalog {
        let header = CatalogHeader::new("one", policy, vec![Category::new("score")]);
        let record = EffectRecord::new(
            "rs1",
            AlleleSet::new(["C"]),
            AlleleSet::new(["T"]),
            Category::new("score"),
            2.0,
        );
        EffectCatalog::new(header, vec![record]).unwrap()
    }

    #[test]
    fn additive_policy_is_signed_with_neutral_heterozygotes() {
        let catalog = single_marker_catalog(ScoringPolicy::Additive);
        for (genotype, expected) in [("CC", 2.0), ("TT", -2.0), ("TC", 0.0), ("GG", 2.0)] {
            let store = MemoryGenotypeStore::new().with_call("rs1", "1", genotype);
            let report = score(&catalog, &store);
            assert_relative_eq!(report.categories[0].total, expected);
            assert!(report.missing.is_empty());
        }
    }

    #[test]
    fn per_allele_policy_counts_first_allele_copies() {
        let catalog = single_marker_catalog(ScoringPolicy::PerAllele);
        let store = MemoryGenotypeStore::new().with_call("rs1", "1", "CT");
        let report = score(&catalog, &store);
        assert_relative_eq!(report.categories[0].total, 2.0);
        assert_eq!(
            report.categories[0].contributions[0].interpretation,
            "1 × C (CT)"
        );
    }

    #[test]
    fn missing_reasons_are_recorded() {
        let catalog = single_marker_catalog(ScoringPolicy::Additive);

        let absent = score(&catalog, &MemoryGenotypeStore::new());
        assert_eq!(absent.missing[0].reason, MissingReason::Absent);

        let no_call = score(&catalog, &MemoryGenotypeStore::new().with_call("rs1", "1", "--"));
        assert_eq!(no_call.missing[0].reason, MissingReason::NoCall);

        let unresolved = score(&catalog, &MemoryGenotypeStore::new().with_call("rs1", "1", "AC"));
        assert_eq!(unresolved.missing[0].reason, MissingReason::Unresolved);
        assert_eq!(unresolved.missing[0].genotype.as_deref(), Some("AC"));
        assert_eq!(unresolved.categories[0].total, 0.0);
        assert_eq!(unresolved.coverage(), 0.0);
    }

    #[test]
    fn balance_bands_follow_thresholds() {
        assert_eq!(Balance::classify(1.6), Balance::StrongFirst);
        assert_eq!(Balance::classify(0.6), Balance::ModerateFirst);
        assert_eq!(Balance::classify(0.5), Balance::Balanced);
        assert_eq!(Balance::classify(-0.7), Balance::ModerateSecond);
        assert_eq!(Balance::classify(-2.0), Balance::StrongSecond);
        assert_eq!(
            Balance::StrongSecond.describe("endurance", "power"),
            "Strong power"
        );
    }

    #[test]
    fn independent_categories_have_no_composite_total() {
        let header = CatalogHeader::new(
            "two",
            ScoringPolicy::Additive,
            vec![Category::new("a"), Category::new("b")],
        );
        let records = vec![
            EffectRecord::new(
                "rs1",
                AlleleSet::new(["C"]),
                AlleleSet::new(["T"]),
                Category::new("a"),
                1.0,
            ),
            EffectRecord::new(
                "rs2",
                AlleleSet::new(["A"]),
                AlleleSet::new(["G"]),
                Category::new("b"),
                1.0,
            ),
        ];
        let catalog = EffectCatalog::new(header, records).unwrap();
        let store = MemoryGenotypeStore::new()
            .with_call("rs1", "1", "CC")
            .with_call("rs2", "2", "AA");
        let report = score(&catalog, &store);
        assert_eq!(report.composite_total(), None);
        assert_eq!(report.normalized_score(), None);
        assert!(!report.has_named_axis());
        assert_relative_eq!(report.category("a").unwrap().total, 1.0);
        assert_relative_eq!(report.category("b").unwrap().total, 1.0);
    }
}
