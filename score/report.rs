// ========================================================================================
//
//                                   Plain-text reporting
//
// ========================================================================================

use crate::aggregate::{CategoryScore, MissingMarker, MissingReason, ScoreReport};
use crate::annotate::SectionFindings;
use crate::haplogroup::{Classification, LineagePrediction};
use crate::standardize::{Interval, PercentileBand, Standardization, StandardizationResult};
use crate::store::GenotypeStore;
use itertools::Itertools;
use std::io::{self, Write};

/// Renders engine results. Every score is printed next to its coverage and missing count.
pub trait Reporter {
    fn sample(&mut self, store: &dyn GenotypeStore) -> io::Result<()>;

    fn score(&mut self, report: &ScoreReport) -> io::Result<()>;

    fn standardization(&mut self, result: &StandardizationResult) -> io::Result<()>;

    fn classification(&mut self, title: &str, classification: &Classification) -> io::Result<()>;

    fn lineage(&mut self, title: &str, prediction: &LineagePrediction) -> io::Result<()>;

    fn annotations(&mut self, sections: &[SectionFindings]) -> io::Result<()>;
}

#[derive(Debug)]
pub struct TextReporter<W> {
    writer: W,
    show_missing: bool,
}

impl<W: Write> TextReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            show_missing: true,
        }
    }

    /// Lists each missing marker by id when `true` (the default); counts are always shown.
    pub fn with_missing_details(mut self, show_missing: bool) -> Self {
        self.show_missing = show_missing;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn heading(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "== {title} ==")
    }

    fn category(&mut self, category: &CategoryScore) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}: {:+.3} ({}/{} markers matched)",
            category.category.title(),
            category.total,
            category.matched(),
            category.marker_count()
        )?;
        for contribution in &category.contributions {
            writeln!(
                self.writer,
                "  {} ({}): {} -> {:+.3}",
                contribution.marker_id,
                contribution.gene,
                contribution.interpretation,
                contribution.value
            )?;
        }
        if self.show_missing {
            for marker in &category.missing {
                writeln!(
                    self.writer,
                    "  {} ({}): {}",
                    marker.marker_id,
                    marker.gene,
                    missing_text(marker)
                )?;
            }
        }
        Ok(())
    }
}

fn missing_text(marker: &MissingMarker) -> String {
    match (&marker.reason, &marker.genotype) {
        (MissingReason::Unresolved, Some(genotype)) => format!("unresolved genotype {genotype}"),
        (reason, _) => format!("not scored ({reason})"),
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn sample(&mut self, store: &dyn GenotypeStore) -> io::Result<()> {
        writeln!(
            self.writer,
            "Sample: {} markers, source {}, build {}, sex {}",
            store.marker_count(),
            store.source().unwrap_or("unknown"),
            store.build(),
            store.sex()
        )
    }

    fn score(&mut self, report: &ScoreReport) -> io::Result<()> {
        self.heading(&report.catalog_name)?;
        writeln!(
            self.writer,
            "Markers matched: {}/{} ({:.1}%), missing: {}",
            report.matched(),
            report.total_markers,
            report.coverage() * 100.0,
            report.missing.len()
        )?;
        for category in &report.categories {
            self.category(category)?;
        }

        if !report.has_named_axis() {
            return Ok(());
        }
        if let (Some(total), Some(balance)) = (report.composite_total(), report.balance()) {
            writeln!(
                self.writer,
                "Composite: {:+.3} ({})",
                total,
                balance.describe(&report.first_label, &report.second_label)
            )?;
            if let Some((first, second)) = report.axis_share() {
                writeln!(
                    self.writer,
                    "Leaning: {first:.0}% {} / {second:.0}% {}",
                    report.first_label, report.second_label
                )?;
            }
        }
        Ok(())
    }

    fn standardization(&mut self, result: &StandardizationResult) -> io::Result<()> {
        writeln!(self.writer, "Raw score: {:.6}", result.raw_score)?;
        writeln!(
            self.writer,
            "Coverage: {}/{} markers ({:.1}%), {}",
            result.matched,
            result.total,
            result.coverage * 100.0,
            result.coverage_level()
        )?;

        let calibration = match &result.outcome {
            Standardization::Calibrated(calibration) => calibration,
            Standardization::Unavailable(reason) => {
                return writeln!(self.writer, "Percentile: unavailable ({reason})");
            }
        };

        writeln!(
            self.writer,
            "Expected under {} estimator: mean {:.6}, sd {:.6}",
            calibration.estimator, calibration.expected_mean, calibration.expected_sd
        )?;
        writeln!(self.writer, "Z-score: {:.3}", calibration.z_score)?;
        writeln!(
            self.writer,
            "Percentile: {:.1} ({})",
            calibration.percentile,
            PercentileBand::classify(calibration.percentile)
        )?;
        match calibration.interval {
            Interval::Analytic { low, high, inflation } => writeln!(
                self.writer,
                "95% interval: [{low:.6}, {high:.6}] (analytic, sd inflation {inflation:.3})"
            ),
            Interval::Resampled {
                low,
                high,
                iterations,
                ..
            } => writeln!(
                self.writer,
                "95% interval: [{low:.6}, {high:.6}] ({iterations} resamples)"
            ),
        }
    }

    fn classification(&mut self, title: &str, classification: &Classification) -> io::Result<()> {
        match classification {
            Classification::InsufficientEvidence => {
                writeln!(self.writer, "{title}: insufficient evidence")
            }
            Classification::Called {
                label,
                tier,
                description,
                tallies,
            } => {
                writeln!(
                    self.writer,
                    "{title}: {label} ({tier} confidence, ~{:.0}%)",
                    tier.nominal_confidence() * 100.0
                )?;
                if let Some(description) = description {
                    writeln!(self.writer, "  {description}")?;
                }
                for tally in tallies {
                    writeln!(
                        self.writer,
                        "  {}: {}",
                        tally.label,
                        tally.support.iter().join(", ")
                    )?;
                }
                Ok(())
            }
        }
    }

    fn lineage(&mut self, title: &str, prediction: &LineagePrediction) -> io::Result<()> {
        match prediction {
            LineagePrediction::NotMale => {
                writeln!(self.writer, "{title}: not applicable (sample is not male)")
            }
            LineagePrediction::NoChromosomeData => {
                writeln!(self.writer, "{title}: no data for this chromosome")
            }
            LineagePrediction::Classified(classification) => {
                self.classification(title, classification)
            }
        }
    }

    fn annotations(&mut self, sections: &[SectionFindings]) -> io::Result<()> {
        for section in sections {
            self.heading(&section.title)?;
            for finding in &section.findings {
                let subject = finding
                    .subject
                    .as_deref()
                    .map(|s| format!(" [{s}]"))
                    .unwrap_or_default();
                writeln!(
                    self.writer,
                    "{} ({}){} {}: {}",
                    finding.marker_id,
                    finding.gene,
                    subject,
                    finding.genotype,
                    finding.text()
                )?;
                if let Some(effect) = &finding.effect {
                    writeln!(self.writer, "  effect: {effect}")?;
                }
                if section.show_evidence {
                    if let Some(evidence) = &finding.evidence {
                        writeln!(self.writer, "  evidence: {evidence}")?;
                    }
                }
            }
            if !section.absent.is_empty() {
                writeln!(
                    self.writer,
                    "Not in file: {} ({})",
                    section.absent.len(),
                    section.absent.iter().join(", ")
                )?;
            }
        }
        Ok(())
    }
}
