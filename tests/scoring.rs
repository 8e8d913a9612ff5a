use approx::{assert_abs_diff_eq, assert_relative_eq};
use genoscore::aggregate::{MissingReason, score};
use genoscore::catalog::{CatalogHeader, EffectCatalog, EffectRecord, ScoringPolicy};
use genoscore::resolve::{complement_token, join_tokens, resolve, tokenize};
use genoscore::standardize::{
    StandardizeOptions, percentile_from_z, standardize, standardize_report,
};
use genoscore::store::MemoryGenotypeStore;
use genoscore::sumstats::{Selection, SummaryStatistics};
use genoscore::types::{AlleleSet, Category};

fn one_marker_catalog() -> EffectCatalog {
    let header = CatalogHeader::new(
        "single",
        ScoringPolicy::Additive,
        vec![Category::new("trait")],
    );
    let record = EffectRecord::new(
        "rs1",
        AlleleSet::new(["C"]),
        AlleleSet::new(["T"]),
        Category::new("trait"),
        2.0,
    );
    EffectCatalog::new(header, vec![record]).unwrap()
}

#[test]
fn homozygous_first_scores_full_weight() {
    let store = MemoryGenotypeStore::new().with_call("rs1", "1", "CC");
    let report = score(&one_marker_catalog(), &store);
    assert_relative_eq!(report.categories[0].total, 2.0);
    assert!(report.missing.is_empty());
    assert_relative_eq!(report.coverage(), 1.0);
}

#[test]
fn heterozygote_in_either_order_is_neutral() {
    for genotype in ["TC", "CT"] {
        let store = MemoryGenotypeStore::new().with_call("rs1", "1", genotype);
        let report = score(&one_marker_catalog(), &store);
        assert_eq!(report.categories[0].total, 0.0);
        assert_eq!(report.matched(), 1);
    }
}

#[test]
fn unresolvable_call_is_missing_not_an_error() {
    let store = MemoryGenotypeStore::new().with_call("rs1", "1", "AC");
    let report = score(&one_marker_catalog(), &store);
    assert_eq!(report.categories[0].total, 0.0);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].reason, MissingReason::Unresolved);
}

#[test]
fn empty_store_leaves_every_marker_missing() {
    let catalog = EffectCatalog::athletic().unwrap();
    let report = score(&catalog, &MemoryGenotypeStore::new());
    assert_eq!(report.missing.len(), catalog.len());
    assert_eq!(report.coverage(), 0.0);
    assert_eq!(report.composite_total(), Some(0.0));
    assert!(report.categories.iter().all(|c| c.total == 0.0));
}

#[test]
fn resolution_is_symmetric_under_complement() {
    let pairs = [
        (AlleleSet::new(["C"]), AlleleSet::new(["T"])),
        (AlleleSet::new(["A"]), AlleleSet::new(["G"])),
        (AlleleSet::new(["T"]), AlleleSet::new(["G"])),
    ];
    let genotypes = ["CC", "CT", "TT", "AG", "GA", "AA", "GG", "AC"];

    for (first, second) in &pairs {
        for genotype in genotypes {
            let complemented: Vec<String> =
                tokenize(genotype).iter().map(|t| complement_token(t)).collect();
            let complemented = join_tokens(&complemented);

            let direct = resolve(genotype, first, second)
                .map(|r| (r.first_count, r.second_count));
            let flipped = resolve(&complemented, first, second)
                .map(|r| (r.first_count, r.second_count));
            assert_eq!(direct, flipped, "{genotype} vs {complemented} against {first}/{second}");
        }
    }
}

#[test]
fn bundled_catalog_scores_flipped_strand_like_forward_strand() {
    let catalog = EffectCatalog::athletic().unwrap();
    let forward = score(&catalog, &MemoryGenotypeStore::new().with_call("rs1815739", "11", "TT"));
    let flipped = score(&catalog, &MemoryGenotypeStore::new().with_call("rs1815739", "11", "AA"));

    let forward_muscle = forward.category("muscle_energy").unwrap();
    let flipped_muscle = flipped.category("muscle_energy").unwrap();
    assert_relative_eq!(forward_muscle.total, 1.5_f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(flipped_muscle.total, forward_muscle.total);

    let interpretation = &flipped_muscle.contributions[0].interpretation;
    assert!(interpretation.starts_with("XX:"), "{interpretation}");
    assert!(interpretation.ends_with("(AA [flip: TT])"), "{interpretation}");
}

#[test]
fn single_marker_standardization_matches_hand_calculation() {
    let header = CatalogHeader::new("pgs", ScoringPolicy::PerAllele, vec![Category::new("score")]);
    let mut record = EffectRecord::new(
        "rs1",
        AlleleSet::new(["A"]),
        AlleleSet::new(["G"]),
        Category::new("score"),
        0.1,
    );
    record.frequency = Some(0.3);
    let catalog = EffectCatalog::new(header, vec![record]).unwrap();

    let store = MemoryGenotypeStore::new().with_call("rs1", "1", "AG");
    let report = score(&catalog, &store);
    let result = standardize_report(&report, &StandardizeOptions::default()).unwrap();

    assert_relative_eq!(result.raw_score, 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(result.z_score().unwrap(), 0.617, epsilon = 1e-3);
    let percentile = result.percentile().unwrap();
    assert!(percentile > 72.0 && percentile < 74.0);
}

#[test]
fn additive_catalog_places_an_average_genotype_at_the_median() {
    let mut record = EffectRecord::new(
        "rs1",
        AlleleSet::new(["C"]),
        AlleleSet::new(["T"]),
        Category::new("trait"),
        1.0,
    );
    record.frequency = Some(0.5);
    let header = CatalogHeader::new(
        "single",
        ScoringPolicy::Additive,
        vec![Category::new("trait")],
    );
    let catalog = EffectCatalog::new(header, vec![record]).unwrap();

    let store = MemoryGenotypeStore::new().with_call("rs1", "1", "CT");
    let result = standardize_report(&score(&catalog, &store), &StandardizeOptions::default())
        .unwrap();
    let calibration = result.calibration().unwrap();
    assert_abs_diff_eq!(calibration.expected_mean, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(calibration.expected_sd, 0.5_f64.sqrt(), epsilon = 1e-12);
    assert_abs_diff_eq!(result.percentile().unwrap(), 50.0, epsilon = 1e-9);

    let store = MemoryGenotypeStore::new().with_call("rs1", "1", "CC");
    let result = standardize_report(&score(&catalog, &store), &StandardizeOptions::default())
        .unwrap();
    assert_abs_diff_eq!(result.z_score().unwrap(), 2.0_f64.sqrt(), epsilon = 1e-9);
}

#[test]
fn degenerate_variance_yields_neutral_z() {
    let header = CatalogHeader::new("pgs", ScoringPolicy::PerAllele, vec![Category::new("score")]);
    let mut record = EffectRecord::new(
        "rs1",
        AlleleSet::new(["A"]),
        AlleleSet::new(["G"]),
        Category::new("score"),
        0.4,
    );
    record.frequency = Some(1.0);
    let catalog = EffectCatalog::new(header, vec![record]).unwrap();
    let report = score(&catalog, &MemoryGenotypeStore::new().with_call("rs1", "1", "AA"));
    let result = standardize_report(&report, &StandardizeOptions::default()).unwrap();

    assert_eq!(result.z_score(), Some(0.0));
    assert_abs_diff_eq!(result.percentile().unwrap(), 50.0, epsilon = 1e-9);
}

#[test]
fn percentile_is_monotone_in_z() {
    let mut previous = percentile_from_z(-8.0);
    for step in -79..=80 {
        let current = percentile_from_z(step as f64 / 10.0);
        assert!(current >= previous);
        assert!((0.0..=100.0).contains(&current));
        previous = current;
    }
}

#[test]
fn coverage_gate_blocks_sparse_matches() {
    let result = standardize(&[], 0.0, 100, &StandardizeOptions::default());
    assert!(result.calibration().is_none());
    assert_eq!(result.percentile(), None);
}

const SUMSTATS: &str = "\
MarkerName\tA1\tA2\tEAF\tBeta\tPval
rs1\tA\tG\t0.3\t0.2\t1e-8
rs2\tC\tT\t0.5\t-0.1\t0.01
rs3\tG\tA\t0.2\t0.5\t0.2
";

#[test]
fn summary_statistics_drive_a_standardized_score() {
    let sumstats = SummaryStatistics::from_reader(SUMSTATS.as_bytes()).unwrap();
    let rows = sumstats.select(Selection::PValueBelow(0.05));
    assert_eq!(rows.len(), 2);

    let catalog = SummaryStatistics::into_catalog(&rows, "test gwas").unwrap();
    let store = MemoryGenotypeStore::new()
        .with_call("rs1", "1", "AG")
        .with_call("rs2", "2", "TT")
        .with_call("rs3", "3", "GG");
    let report = score(&catalog, &store);
    assert_relative_eq!(report.composite_total().unwrap(), 0.2, epsilon = 1e-12);
    assert_relative_eq!(report.coverage(), 1.0);

    let result = standardize_report(&report, &StandardizeOptions::default()).unwrap();
    let calibration = result.calibration().unwrap();
    assert_relative_eq!(calibration.expected_mean, 0.02, epsilon = 1e-12);
    assert_relative_eq!(calibration.expected_sd.powi(2), 0.0218, epsilon = 1e-12);
    assert_abs_diff_eq!(calibration.z_score, 0.18 / 0.0218_f64.sqrt(), epsilon = 1e-9);
}
