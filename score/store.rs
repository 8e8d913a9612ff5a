//! The genotype store: the read-only view of one person's raw genotype calls that the
//! scoring engine queries by marker id.

use crate::types::{BiologicalSex, GenomeBuild, normalize_chromosome_label};
use ahash::AHashMap;

/// Calls that consumer platforms emit in place of a genotype when the assay failed.
const NO_CALL_SENTINELS: &[&str] = &["--", "00", "0", "-", "NC", "??"];

/// Returns `true` when a raw genotype string carries no usable allele call.
pub fn is_no_call(genotype: &str) -> bool {
    let trimmed = genotype.trim();
    trimmed.is_empty()
        || NO_CALL_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// The answer to a single marker lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenotypeCall<'a> {
    /// The marker id is not present in the file at all.
    Absent,
    /// The marker is present but the platform reported a missing call.
    NoCall,
    Called(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChromosomeSummary {
    pub total: usize,
    pub called: usize,
}

/// Read-only access to a loaded genotype collection.
pub trait GenotypeStore {
    fn lookup(&self, marker_id: &str) -> GenotypeCall<'_>;

    fn marker_count(&self) -> usize;

    fn sex(&self) -> BiologicalSex;

    fn build(&self) -> GenomeBuild;

    /// The platform that produced the file (e.g. `23andMe`), when known.
    fn source(&self) -> Option<&str> {
        None
    }

    /// Raw genotype strings of every marker on a chromosome, no-calls included.
    fn chromosome_calls(&self, label: &str) -> Vec<&str>;

    fn chromosome_summary(&self, label: &str) -> ChromosomeSummary {
        let calls = self.chromosome_calls(label);
        ChromosomeSummary {
            total: calls.len(),
            called: calls.iter().filter(|g| !is_no_call(g)).count(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredCall {
    chromosome: String,
    genotype: String,
}

/// A hash-map backed store, filled by a file adapter or directly in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryGenotypeStore {
    calls: AHashMap<String, StoredCall>,
    sex: BiologicalSex,
    build: GenomeBuild,
    source: Option<String>,
}

impl MemoryGenotypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a call. Genotype letters are upper-cased.
    pub fn insert(&mut self, marker_id: &str, chromosome: &str, genotype: &str) {
        self.calls.insert(
            marker_id.trim().to_string(),
            StoredCall {
                chromosome: normalize_chromosome_label(chromosome),
                genotype: genotype.trim().to_ascii_uppercase(),
            },
        );
    }

    pub fn with_call(mut self, marker_id: &str, chromosome: &str, genotype: &str) -> Self {
        self.insert(marker_id, chromosome, genotype);
        self
    }

    pub fn with_sex(mut self, sex: BiologicalSex) -> Self {
        self.sex = sex;
        self
    }

    pub fn with_build(mut self, build: GenomeBuild) -> Self {
        self.build = build;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn set_sex(&mut self, sex: BiologicalSex) {
        self.sex = sex;
    }

    pub fn set_build(&mut self, build: GenomeBuild) {
        self.build = build;
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl GenotypeStore for MemoryGenotypeStore {
    fn lookup(&self, marker_id: &str) -> GenotypeCall<'_> {
        match self.calls.get(marker_id) {
            None => GenotypeCall::Absent,
            Some(call) if is_no_call(&call.genotype) => GenotypeCall::NoCall,
            Some(call) => GenotypeCall::Called(&call.genotype),
        }
    }

    fn marker_count(&self) -> usize {
        self.calls.len()
    }

    fn sex(&self) -> BiologicalSex {
        self.sex
    }

    fn build(&self) -> GenomeBuild {
        self.build
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn chromosome_calls(&self, label: &str) -> Vec<&str> {
        let wanted = normalize_chromosome_label(label);
        self.calls
            .values()
            .filter(|call| call.chromosome == wanted)
            .map(|call| call.genotype.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_distinguishes_absent_no_call_and_called() {
        let store = MemoryGenotypeStore::new()
            .with_call("rs1", "1", "ct")
            .with_call("rs2", "1", "--");

        assert_eq!(store.lookup("rs1"), GenotypeCall::Called("CT"));
        assert_eq!(store.lookup("rs2"), GenotypeCall::NoCall);
        assert_eq!(store.lookup("rs3"), GenotypeCall::Absent);
    }

    #[test]
    fn chromosome_summary_counts_called_markers() {
        let store = MemoryGenotypeStore::new()
            .with_call("rs10", "chrMT", "A")
            .with_call("rs11", "26", "--")
            .with_call("rs12", "Y", "G");

        let mt = store.chromosome_summary("MT");
        assert_eq!(mt, ChromosomeSummary { total: 2, called: 1 });
        assert_eq!(store.chromosome_summary("y").total, 1);
    }

    #[test]
    fn no_call_sentinels_are_recognised() {
        for sentinel in ["", "--", "00", "nc", " ?? "] {
            assert!(is_no_call(sentinel), "{sentinel:?} should be a no-call");
        }
        assert!(!is_no_call("AG"));
        assert!(!is_no_call("D"));
    }
}
