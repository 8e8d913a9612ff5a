// ========================================================================================
//
//                      Population-calibrated score standardization
//
// ========================================================================================

use crate::aggregate::ScoreReport;
use crate::catalog::ScoringPolicy;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::fmt;

/// Standardization is only attempted when at least this fraction of markers matched.
pub const DEFAULT_MIN_COVERAGE: f64 = 0.03;
pub const DEFAULT_RESAMPLES: usize = 1000;
pub const DEFAULT_SEED: u64 = 42;
/// Below this many matched markers the interval is widened with a Student-t quantile.
pub const SMALL_SAMPLE_MARKERS: usize = 100;
/// 97.5th percentile of the standard normal distribution.
pub const NORMAL_CRITICAL_VALUE: f64 = 1.96;
/// Effect-allele frequency assumed for markers without a reference frequency.
pub const DEFAULT_ALLELE_FREQUENCY: f64 = 0.5;

/// One resolved marker as seen by the standardizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedMarker {
    /// Per-copy effect of the effect (first) allele.
    pub beta: f64,
    /// Reference frequency of the effect allele.
    pub frequency: Option<f64>,
    /// The signed contribution actually added to the raw score.
    pub contribution: f64,
    /// How `beta` turned into `contribution`.
    pub policy: ScoringPolicy,
}

impl MatchedMarker {
    /// Expected contribution and its variance under Hardy-Weinberg proportions.
    ///
    /// Per-allele markers add `beta` per copy of the effect allele. Additive markers add
    /// `+beta` for the first homozygote (f²), `−beta` for the second ((1 − f)²) and nothing
    /// for heterozygotes.
    pub fn expected_moments(&self) -> (f64, f64) {
        let f = self.frequency.unwrap_or(DEFAULT_ALLELE_FREQUENCY);
        let beta = self.beta;
        match self.policy {
            ScoringPolicy::PerAllele => (beta * 2.0 * f, beta * beta * 2.0 * f * (1.0 - f)),
            ScoringPolicy::Additive => {
                let mean = beta * (2.0 * f - 1.0);
                let second_moment = beta * beta * (f * f + (1.0 - f) * (1.0 - f));
                (mean, second_moment - mean * mean)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplingConfig {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_RESAMPLES,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardizeOptions {
    pub min_coverage: f64,
    /// `None` selects the analytic interval.
    pub resampling: Option<ResamplingConfig>,
}

impl Default for StandardizeOptions {
    fn default() -> Self {
        Self {
            min_coverage: DEFAULT_MIN_COVERAGE,
            resampling: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    /// Expected mean and variance from reference allele frequencies.
    AlleleFrequency,
    /// Mean and spread of the observed contributions.
    Empirical,
}

impl fmt::Display for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Estimator::AlleleFrequency => "allele-frequency",
            Estimator::Empirical => "empirical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSummary {
    pub mean: f64,
    pub sd: f64,
    pub z_score: f64,
}

impl EstimatorSummary {
    fn new(raw_score: f64, mean: f64, sd: f64) -> Self {
        Self {
            mean,
            sd,
            z_score: z_score(raw_score, mean, sd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interval {
    /// `raw ± 1.96 × sd × inflation`, symmetric around the raw score.
    Analytic { low: f64, high: f64, inflation: f64 },
    /// Empirical 2.5th / 97.5th percentiles of resampled sums.
    Resampled {
        low: f64,
        high: f64,
        mean: f64,
        sd: f64,
        iterations: usize,
    },
}

impl Interval {
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Interval::Analytic { low, high, .. } | Interval::Resampled { low, high, .. } => {
                (low, high)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub estimator: Estimator,
    pub expected_mean: f64,
    /// The uncorrected expected SD used for the z-score.
    pub expected_sd: f64,
    /// The SD after small-sample widening, used for the analytic interval.
    pub interval_sd: f64,
    pub z_score: f64,
    pub percentile: f64,
    pub interval: Interval,
    pub allele_frequency: EstimatorSummary,
    pub empirical: EstimatorSummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnavailableReason {
    NoMatchedMarkers,
    InsufficientCoverage { coverage: f64, required: f64 },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NoMatchedMarkers => f.write_str("no markers matched"),
            UnavailableReason::InsufficientCoverage { coverage, required } => write!(
                f,
                "coverage {:.1}% is below the required {:.1}%",
                coverage * 100.0,
                required * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Standardization {
    Calibrated(Calibration),
    Unavailable(UnavailableReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardizationResult {
    pub raw_score: f64,
    pub matched: usize,
    pub total: usize,
    pub coverage: f64,
    pub outcome: Standardization,
}

impl StandardizationResult {
    pub fn calibration(&self) -> Option<&Calibration> {
        match &self.outcome {
            Standardization::Calibrated(calibration) => Some(calibration),
            Standardization::Unavailable(_) => None,
        }
    }

    pub fn z_score(&self) -> Option<f64> {
        self.calibration().map(|c| c.z_score)
    }

    pub fn percentile(&self) -> Option<f64> {
        self.calibration().map(|c| c.percentile)
    }

    pub fn interval(&self) -> Option<(f64, f64)> {
        self.calibration().map(|c| c.interval.bounds())
    }

    pub fn coverage_level(&self) -> CoverageLevel {
        CoverageLevel::classify(self.coverage, self.total)
    }
}

/// Verbal percentile bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentileBand {
    VeryHigh,
    AboveAverage,
    ModeratelyAboveAverage,
    Average,
    ModeratelyBelowAverage,
    BelowAverage,
    Low,
}

impl PercentileBand {
    pub fn classify(percentile: f64) -> Self {
        match percentile {
            p if p >= 90.0 => PercentileBand::VeryHigh,
            p if p >= 75.0 => PercentileBand::AboveAverage,
            p if p >= 60.0 => PercentileBand::ModeratelyAboveAverage,
            p if p >= 40.0 => PercentileBand::Average,
            p if p >= 25.0 => PercentileBand::ModeratelyBelowAverage,
            p if p >= 10.0 => PercentileBand::BelowAverage,
            _ => PercentileBand::Low,
        }
    }
}

impl fmt::Display for PercentileBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PercentileBand::VeryHigh => "Very High",
            PercentileBand::AboveAverage => "Above Average",
            PercentileBand::ModeratelyAboveAverage => "Moderately Above Average",
            PercentileBand::Average => "Average",
            PercentileBand::ModeratelyBelowAverage => "Moderately Below Average",
            PercentileBand::BelowAverage => "Below Average",
            PercentileBand::Low => "Low",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageLevel {
    VeryLow,
    Low,
    Adequate,
}

impl CoverageLevel {
    /// Small selections need 10 % coverage before a percentile is worth reading.
    pub fn classify(coverage: f64, selected_markers: usize) -> Self {
        if (selected_markers <= 1000 && coverage < 0.10) || coverage < 0.05 {
            CoverageLevel::VeryLow
        } else if coverage < 0.10 {
            CoverageLevel::Low
        } else {
            CoverageLevel::Adequate
        }
    }
}

impl fmt::Display for CoverageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoverageLevel::VeryLow => "very low coverage, percentile unreliable",
            CoverageLevel::Low => "low coverage, results uncertain",
            CoverageLevel::Adequate => "adequate coverage",
        })
    }
}

/// `(raw − mean) / sd`, defined as 0 when the SD is zero or not finite.
pub fn z_score(raw_score: f64, mean: f64, sd: f64) -> f64 {
    if sd > 0.0 && sd.is_finite() {
        (raw_score - mean) / sd
    } else {
        0.0
    }
}

/// Standard normal CDF of `z`, scaled to [0, 100].
pub fn percentile_from_z(z: f64) -> f64 {
    let cdf = Normal::new(0.0, 1.0).map(|n| n.cdf(z)).unwrap_or(0.5);
    (cdf * 100.0).clamp(0.0, 100.0)
}

/// Ratio of the Student-t 97.5th percentile to 1.96 for small matches, 1 otherwise.
pub fn small_sample_inflation(matched: usize) -> f64 {
    if matched >= SMALL_SAMPLE_MARKERS {
        return 1.0;
    }
    let df = matched.saturating_sub(1).max(1) as f64;
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.inverse_cdf(0.975) / NORMAL_CRITICAL_VALUE,
        Err(_) => 1.0,
    }
}

/// Expected mean and SD of the score from reference allele frequencies.
pub fn allele_frequency_moments(matched: &[MatchedMarker]) -> (f64, f64) {
    let (mean, variance) = matched.iter().fold((0.0, 0.0), |(mean, variance), m| {
        let (marker_mean, marker_variance) = m.expected_moments();
        (mean + marker_mean, variance + marker_variance)
    });
    (mean, variance.max(0.0).sqrt())
}

/// Mean and population SD of the observed contributions, scaled to the matched count.
pub fn empirical_moments(matched: &[MatchedMarker]) -> (f64, f64) {
    if matched.is_empty() {
        return (0.0, 0.0);
    }
    let n = matched.len() as f64;
    let contributions: Vec<f64> = matched.iter().map(|m| m.contribution).collect();
    let (mean, sd) = mean_and_sd(&contributions);
    (mean * n, sd * n.sqrt())
}

/// Turns a raw weighted sum into a z-score, percentile and 95 % interval.
///
/// `total_markers` is the size of the catalog the matches were drawn from and drives the
/// coverage gate. Below the gate every derived number is reported as unavailable.
pub fn standardize(
    matched: &[MatchedMarker],
    raw_score: f64,
    total_markers: usize,
    options: &StandardizeOptions,
) -> StandardizationResult {
    let coverage = if total_markers == 0 {
        0.0
    } else {
        matched.len() as f64 / total_markers as f64
    };
    let unavailable = |reason| StandardizationResult {
        raw_score,
        matched: matched.len(),
        total: total_markers,
        coverage,
        outcome: Standardization::Unavailable(reason),
    };

    if matched.is_empty() {
        info!("Standardization skipped: no markers matched.");
        return unavailable(UnavailableReason::NoMatchedMarkers);
    }
    if coverage < options.min_coverage {
        let reason = UnavailableReason::InsufficientCoverage {
            coverage,
            required: options.min_coverage,
        };
        info!("Standardization skipped: {reason}.");
        return unavailable(reason);
    }

    let (af_mean, af_sd) = allele_frequency_moments(matched);
    let (emp_mean, emp_sd) = empirical_moments(matched);
    let allele_frequency = EstimatorSummary::new(raw_score, af_mean, af_sd);
    let empirical = EstimatorSummary::new(raw_score, emp_mean, emp_sd);

    let estimator = if matched.iter().any(|m| m.frequency.is_some()) {
        Estimator::AlleleFrequency
    } else {
        Estimator::Empirical
    };
    let primary = match estimator {
        Estimator::AlleleFrequency => allele_frequency,
        Estimator::Empirical => empirical,
    };

    let inflation = small_sample_inflation(matched.len());
    let interval_sd = primary.sd * inflation;
    if inflation > 1.0 {
        debug!(
            "Only {} markers matched; widening the interval SD by {:.3}.",
            matched.len(),
            inflation
        );
    }

    let interval = match options.resampling {
        Some(config) => resampled_interval(matched, config),
        None => Interval::Analytic {
            low: raw_score - NORMAL_CRITICAL_VALUE * interval_sd,
            high: raw_score + NORMAL_CRITICAL_VALUE * interval_sd,
            inflation,
        },
    };

    StandardizationResult {
        raw_score,
        matched: matched.len(),
        total: total_markers,
        coverage,
        outcome: Standardization::Calibrated(Calibration {
            estimator,
            expected_mean: primary.mean,
            expected_sd: primary.sd,
            interval_sd,
            z_score: primary.z_score,
            percentile: percentile_from_z(primary.z_score),
            interval,
            allele_frequency,
            empirical,
        }),
    }
}

/// Standardizes the composite total of a report. `None` for reports whose categories
/// must not be summed.
pub fn standardize_report(
    report: &ScoreReport,
    options: &StandardizeOptions,
) -> Option<StandardizationResult> {
    let raw = report.composite_total()?;
    Some(standardize(
        report.matched_markers(),
        raw,
        report.total_markers,
        options,
    ))
}

/// Resamples the matched contributions with replacement. Trial `i` draws from its own
/// generator seeded with `seed + i`, so results do not depend on the thread count.
fn resampled_interval(matched: &[MatchedMarker], config: ResamplingConfig) -> Interval {
    let contributions: Vec<f64> = matched.iter().map(|m| m.contribution).collect();
    let n = contributions.len();
    let iterations = config.iterations.max(1);

    let mut sums: Vec<f64> = (0..iterations)
        .into_par_iter()
        .map(|trial| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(trial as u64));
            (0..n)
                .map(|_| contributions[rng.gen_range(0..n)])
                .sum::<f64>()
        })
        .collect();
    sums.sort_by(f64::total_cmp);

    let (mean, sd) = mean_and_sd(&sums);
    Interval::Resampled {
        low: interpolated_percentile(&sums, 2.5),
        high: interpolated_percentile(&sums, 97.5),
        mean,
        sd,
        iterations,
    }
}

/// Linear-interpolated percentile of an ascending slice.
fn interpolated_percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (len - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

/// Mean and population (ddof = 0) standard deviation.
fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn marker(beta: f64, frequency: Option<f64>, contribution: f64) -> MatchedMarker {
        MatchedMarker {
            beta,
            frequency,
            contribution,
            policy: ScoringPolicy::PerAllele,
        }
    }

    fn additive(weight: f64, frequency: f64, contribution: f64) -> MatchedMarker {
        MatchedMarker {
            beta: weight,
            frequency: Some(frequency),
            contribution,
            policy: ScoringPolicy::Additive,
        }
    }

    #[test]
    fn single_heterozygous_marker_matches_hand_calculation() {
        let matched = [marker(0.1, Some(0.3), 0.1)];
        let result = standardize(&matched, 0.1, 1, &StandardizeOptions::default());
        let calibration = result.calibration().unwrap();

        assert_eq!(calibration.estimator, Estimator::AlleleFrequency);
        assert_relative_eq!(calibration.expected_mean, 0.06, epsilon = 1e-12);
        assert_relative_eq!(calibration.expected_sd.powi(2), 0.0042, epsilon = 1e-12);
        assert_abs_diff_eq!(calibration.z_score, 0.617, epsilon = 1e-3);
        assert!(calibration.percentile > 72.0 && calibration.percentile < 74.0);
    }

    #[test]
    fn small_matches_widen_only_the_interval() {
        let matched = [marker(0.1, Some(0.3), 0.1)];
        let result = standardize(&matched, 0.1, 1, &StandardizeOptions::default());
        let calibration = result.calibration().unwrap();

        // df = 1: t(0.975) = 12.706
        assert_abs_diff_eq!(
            calibration.interval_sd / calibration.expected_sd,
            12.706 / 1.96,
            epsilon = 1e-3
        );
        let (low, high) = calibration.interval.bounds();
        assert_relative_eq!(0.1 - low, high - 0.1, epsilon = 1e-12);
        assert_eq!(small_sample_inflation(SMALL_SAMPLE_MARKERS), 1.0);
        assert!(small_sample_inflation(10) > small_sample_inflation(50));
    }

    #[test]
    fn zero_variance_gives_neutral_z() {
        let matched = [marker(0.2, Some(0.0), 0.0)];
        let result = standardize(&matched, 0.0, 1, &StandardizeOptions::default());
        assert_eq!(result.z_score(), Some(0.0));
        assert_relative_eq!(result.percentile().unwrap(), 50.0, epsilon = 1e-9);
        assert_eq!(z_score(1.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn percentile_is_monotone_and_bounded() {
        let mut previous = -1.0;
        for step in -80..=80 {
            let p = percentile_from_z(step as f64 * 0.1);
            assert!((0.0..=100.0).contains(&p));
            assert!(p >= previous);
            previous = p;
        }
    }

    #[test]
    fn coverage_gate_reports_unavailable() {
        let matched = [marker(0.1, Some(0.3), 0.1)];
        let result = standardize(&matched, 0.1, 100, &StandardizeOptions::default());
        assert!(matches!(
            result.outcome,
            Standardization::Unavailable(UnavailableReason::InsufficientCoverage { .. })
        ));
        assert_eq!(result.z_score(), None);
        assert_eq!(result.interval(), None);

        let empty = standardize(&[], 0.0, 10, &StandardizeOptions::default());
        assert_eq!(
            empty.outcome,
            Standardization::Unavailable(UnavailableReason::NoMatchedMarkers)
        );
    }

    #[test]
    fn empirical_estimator_is_primary_without_frequencies() {
        let matched = [marker(0.1, None, 0.2), marker(0.3, None, 0.0)];
        let result = standardize(&matched, 0.2, 2, &StandardizeOptions::default());
        let calibration = result.calibration().unwrap();
        assert_eq!(calibration.estimator, Estimator::Empirical);
        assert_relative_eq!(calibration.empirical.mean, 0.2, epsilon = 1e-12);
        // 0.5 is assumed for the missing frequencies.
        assert_relative_eq!(calibration.allele_frequency.mean, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn resampled_interval_is_reproducible() {
        let matched: Vec<MatchedMarker> = (0..40)
            .map(|i| marker(0.05, Some(0.4), if i % 3 == 0 { 0.1 } else { 0.05 }))
            .collect();
        let raw: f64 = matched.iter().map(|m| m.contribution).sum();
        let options = StandardizeOptions {
            resampling: Some(ResamplingConfig {
                iterations: 500,
                seed: 7,
            }),
            ..StandardizeOptions::default()
        };

        let first = standardize(&matched, raw, 40, &options);
        let second = standardize(&matched, raw, 40, &options);
        assert_eq!(first.interval(), second.interval());

        let (low, high) = first.interval().unwrap();
        assert!(low <= raw && raw <= high);
        match first.calibration().unwrap().interval {
            Interval::Resampled { iterations, mean, .. } => {
                assert_eq!(iterations, 500);
                assert_abs_diff_eq!(mean, raw, epsilon = 0.1);
            }
            Interval::Analytic { .. } => panic!("expected a resampled interval"),
        }
    }

    #[test]
    fn additive_markers_use_signed_genotype_moments() {
        // Heterozygote at f = 0.5 is the population average of a ±w / 0 marker.
        let matched = [additive(1.0, 0.5, 0.0)];
        let result = standardize(&matched, 0.0, 1, &StandardizeOptions::default());
        let calibration = result.calibration().unwrap();
        assert_relative_eq!(calibration.expected_mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(calibration.expected_sd.powi(2), 0.5, epsilon = 1e-12);
        assert_relative_eq!(calibration.percentile, 50.0, epsilon = 1e-9);

        // f = 0.8, w = 2: mean 2 × 0.6 = 1.2, E[X²] = 4 × 0.68 = 2.72, variance 1.28.
        let (mean, variance) = additive(2.0, 0.8, 2.0).expected_moments();
        assert_relative_eq!(mean, 1.2, epsilon = 1e-12);
        assert_relative_eq!(variance, 1.28, epsilon = 1e-12);
    }

    #[test]
    fn interpolated_percentile_matches_linear_rule() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(interpolated_percentile(&values, 50.0), 3.0);
        assert_relative_eq!(interpolated_percentile(&values, 2.5), 1.1);
        assert_relative_eq!(interpolated_percentile(&values, 97.5), 4.9);
    }

    #[test]
    fn bands_and_coverage_levels() {
        assert_eq!(PercentileBand::classify(95.0), PercentileBand::VeryHigh);
        assert_eq!(PercentileBand::classify(50.0), PercentileBand::Average);
        assert_eq!(PercentileBand::classify(3.0), PercentileBand::Low);
        assert_eq!(CoverageLevel::classify(0.08, 500), CoverageLevel::VeryLow);
        assert_eq!(CoverageLevel::classify(0.08, 50_000), CoverageLevel::Low);
        assert_eq!(CoverageLevel::classify(0.04, 50_000), CoverageLevel::VeryLow);
        assert_eq!(CoverageLevel::classify(0.5, 50), CoverageLevel::Adequate);
    }
}
