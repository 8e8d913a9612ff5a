use log::debug;

use crate::resolve::tokenize;
use crate::store::{GenotypeStore, is_no_call};
use crate::types::{BiologicalSex, normalize_chromosome_label};

/// X heterozygosity at or below this rate is male evidence; above it, female evidence.
pub const X_HETEROZYGOSITY_THRESHOLD: f64 = 0.05;
/// Y call rate at or above this is male evidence.
pub const Y_MALE_CALL_RATE: f64 = 0.5;
/// Y call rate below this is female evidence.
pub const Y_FEMALE_CALL_RATE: f64 = 0.1;

/// The individual checks behind a call. A check is `None` when its chromosome had no data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SexEvidence {
    /// (heterozygous fraction of called X markers, vote)
    pub x_heterozygosity_check: Option<(f64, BiologicalSex)>,
    /// (called fraction of Y markers, vote); `Unknown` when the rate is inconclusive.
    pub y_presence_check: Option<(f64, BiologicalSex)>,
    pub male_votes: u8,
    pub female_votes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SexInference {
    pub call: BiologicalSex,
    pub report: SexEvidence,
}

/// Collects X/Y call statistics one genotype at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SexInferenceAccumulator {
    x_called: usize,
    x_heterozygous: usize,
    y_total: usize,
    y_called: usize,
}

impl SexInferenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_call(&mut self, chromosome: &str, genotype: &str) {
        match normalize_chromosome_label(chromosome).as_str() {
            "X" => {
                if is_no_call(genotype) {
                    return;
                }
                self.x_called += 1;
                if is_heterozygous(genotype) {
                    self.x_heterozygous += 1;
                }
            }
            "Y" => {
                self.y_total += 1;
                if !is_no_call(genotype) {
                    self.y_called += 1;
                }
            }
            _ => {}
        }
    }

    pub fn finish(self) -> SexInference {
        let mut report = SexEvidence::default();

        if self.x_called > 0 {
            let ratio = self.x_heterozygous as f64 / self.x_called as f64;
            let vote = if ratio <= X_HETEROZYGOSITY_THRESHOLD {
                BiologicalSex::Male
            } else {
                BiologicalSex::Female
            };
            report.x_heterozygosity_check = Some((ratio, vote));
        }

        if self.y_total > 0 {
            let rate = self.y_called as f64 / self.y_total as f64;
            let vote = if rate >= Y_MALE_CALL_RATE {
                BiologicalSex::Male
            } else if rate < Y_FEMALE_CALL_RATE {
                BiologicalSex::Female
            } else {
                BiologicalSex::Unknown
            };
            report.y_presence_check = Some((rate, vote));
        }

        for vote in [report.x_heterozygosity_check, report.y_presence_check]
            .into_iter()
            .flatten()
            .map(|(_, vote)| vote)
        {
            match vote {
                BiologicalSex::Male => report.male_votes += 1,
                BiologicalSex::Female => report.female_votes += 1,
                BiologicalSex::Unknown => {}
            }
        }

        let call = match (report.male_votes, report.female_votes) {
            (m, 0) if m > 0 => BiologicalSex::Male,
            (0, f) if f > 0 => BiologicalSex::Female,
            _ => BiologicalSex::Unknown,
        };
        debug!(
            "Sex inference: {} (male votes {}, female votes {})",
            call, report.male_votes, report.female_votes
        );
        SexInference { call, report }
    }
}

fn is_heterozygous(genotype: &str) -> bool {
    let tokens = tokenize(genotype);
    tokens.windows(2).any(|pair| pair[0] != pair[1])
}

/// Infers biological sex from the X and Y calls held by a store.
pub fn infer_sex<S: GenotypeStore + ?Sized>(store: &S) -> SexInference {
    let mut accumulator = SexInferenceAccumulator::new();
    for chromosome in ["X", "Y"] {
        for genotype in store.chromosome_calls(chromosome) {
            accumulator.process_call(chromosome, genotype);
        }
    }
    accumulator.finish()
}
