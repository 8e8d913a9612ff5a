// ========================================================================================
//
//               GWAS summary statistics: loading, selection, catalog conversion
//
// ========================================================================================

use crate::catalog::{CatalogError, CatalogHeader, EffectCatalog, EffectRecord, ScoringPolicy};
use crate::types::{AlleleSet, Category};
use ahash::AHashSet;
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// The category every summary-statistics catalog scores into.
pub const SUMSTATS_CATEGORY: &str = "score";

const MARKER_ALIASES: &[&str] = &["markername", "rsid", "snp", "variant_id", "id"];
const EFFECT_ALLELE_ALIASES: &[&str] = &["a1", "effect_allele", "ea"];
const OTHER_ALLELE_ALIASES: &[&str] = &["a2", "other_allele", "oa", "non_effect_allele"];
const FREQUENCY_ALIASES: &[&str] = &["eaf", "freq", "effect_allele_frequency", "af"];
const BETA_ALIASES: &[&str] = &["beta", "effect_weight", "effect"];
const P_VALUE_ALIASES: &[&str] = &["pval", "p", "p_value", "pvalue"];

#[derive(Error, Debug)]
pub enum SumstatsError {
    #[error("Failed to read summary statistics: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed summary statistics table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Summary statistics header has no '{0}' column (or any of its aliases).")]
    MissingColumn(&'static str),
    #[error("Summary statistics line {line}: {message}")]
    Parse { line: u64, message: String },
}

/// One association row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub marker_id: String,
    pub effect_allele: String,
    pub other_allele: String,
    pub frequency: Option<f64>,
    pub beta: f64,
    pub p_value: f64,
}

/// How rows are chosen before scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Rows with `p < threshold`.
    PValueBelow(f64),
    /// The `n` most significant rows.
    TopN(usize),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::PValueBelow(0.05)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryStatistics {
    rows: Vec<SummaryRow>,
}

struct Columns {
    marker: usize,
    effect: usize,
    other: usize,
    frequency: Option<usize>,
    beta: usize,
    p_value: usize,
}

impl Columns {
    fn from_header(header: &csv::StringRecord) -> Result<Self, SumstatsError> {
        let find = |aliases: &[&str]| {
            header
                .iter()
                .position(|name| aliases.iter().any(|a| name.trim().eq_ignore_ascii_case(a)))
        };
        Ok(Self {
            marker: find(MARKER_ALIASES).ok_or(SumstatsError::MissingColumn("MarkerName"))?,
            effect: find(EFFECT_ALLELE_ALIASES).ok_or(SumstatsError::MissingColumn("A1"))?,
            other: find(OTHER_ALLELE_ALIASES).ok_or(SumstatsError::MissingColumn("A2"))?,
            frequency: find(FREQUENCY_ALIASES),
            beta: find(BETA_ALIASES).ok_or(SumstatsError::MissingColumn("Beta"))?,
            p_value: find(P_VALUE_ALIASES).ok_or(SumstatsError::MissingColumn("Pval"))?,
        })
    }
}

impl SummaryStatistics {
    pub fn new(rows: Vec<SummaryRow>) -> Self {
        Self { rows }
    }

    /// Reads a tab-separated table with a header row. `#` lines are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SumstatsError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = Columns::from_header(reader.headers()?)?;
        let mut rows = Vec::new();

        for result in reader.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let field = |index: usize| record.get(index).unwrap_or("");
            let number = |index: usize, name: &str| -> Result<f64, SumstatsError> {
                field(index).parse::<f64>().map_err(|e| SumstatsError::Parse {
                    line,
                    message: format!("{name} '{}' is not a number ({e})", field(index)),
                })
            };

            let frequency = match columns.frequency.map(field) {
                None | Some("") | Some("NA") | Some("na") => None,
                Some(_) => columns
                    .frequency
                    .map(|i| number(i, "EAF"))
                    .transpose()?,
            };

            rows.push(SummaryRow {
                marker_id: field(columns.marker).to_string(),
                effect_allele: field(columns.effect).to_ascii_uppercase(),
                other_allele: field(columns.other).to_ascii_uppercase(),
                frequency,
                beta: number(columns.beta, "Beta")?,
                p_value: number(columns.p_value, "Pval")?,
            });
        }

        debug!("Read {} summary statistics rows.", rows.len());
        Ok(Self { rows })
    }

    /// Opens a table from disk, decompressing `.gz` files transparently.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SumstatsError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let source: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let table = Self::from_reader(BufReader::new(source))?;
        info!(
            "Loaded {} summary statistics rows from {}.",
            table.rows.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Applies a selection and returns the kept rows, most significant first.
    ///
    /// When a marker id appears more than once the most significant row is kept.
    pub fn select(&self, selection: Selection) -> Vec<SummaryRow> {
        let mut kept: Vec<&SummaryRow> = match selection {
            Selection::PValueBelow(threshold) => {
                self.rows.iter().filter(|r| r.p_value < threshold).collect()
            }
            Selection::TopN(_) => self.rows.iter().filter(|r| !r.p_value.is_nan()).collect(),
        };
        kept.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        if let Selection::TopN(n) = selection {
            kept.truncate(n);
        }

        let mut seen = AHashSet::with_capacity(kept.len());
        let mut duplicates = 0usize;
        let selected: Vec<SummaryRow> = kept
            .into_iter()
            .filter(|row| {
                let first = seen.insert(row.marker_id.as_str());
                if !first {
                    duplicates += 1;
                }
                first
            })
            .cloned()
            .collect();

        if duplicates > 0 {
            warn!(
                "Ignored {duplicates} duplicate summary statistics rows; the most significant row \
                 of each marker was kept."
            );
        }
        info!("Selected {} of {} summary statistics rows.", selected.len(), self.rows.len());
        selected
    }

    /// Turns selected rows into a per-allele catalog with a single `score` category.
    ///
    /// Rows whose alleles cannot form a valid record (identical or non-alphanumeric
    /// alleles) are dropped with a warning.
    pub fn into_catalog(
        rows: &[SummaryRow],
        name: impl Into<String>,
    ) -> Result<EffectCatalog, CatalogError> {
        let category = Category::new(SUMSTATS_CATEGORY);
        let mut records = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;

        for row in rows {
            let usable = |allele: &str| {
                !allele.is_empty() && allele.chars().all(|c| c.is_ascii_alphanumeric())
            };
            if !usable(&row.effect_allele)
                || !usable(&row.other_allele)
                || row.effect_allele == row.other_allele
            {
                dropped += 1;
                continue;
            }
            let mut record = EffectRecord::new(
                row.marker_id.clone(),
                AlleleSet::new([&row.effect_allele]),
                AlleleSet::new([&row.other_allele]),
                category.clone(),
                row.beta,
            );
            record.frequency = row.frequency;
            records.push(record);
        }
        if dropped > 0 {
            warn!("Dropped {dropped} summary statistics rows with unusable alleles.");
        }

        let header = CatalogHeader::new(name, ScoringPolicy::PerAllele, vec![category]);
        EffectCatalog::new(header, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    const TABLE: &str = "MarkerName\tCHR\tPOS\tA1\tA2\tEAF\tBeta\tSE\tPval\n\
rs1\t1\t100\tA\tG\t0.3\t0.02\t0.001\t1e-9\n\
rs2\t1\t200\tc\tt\tNA\t-0.01\t0.001\t0.04\n\
rs3\t2\t300\tT\tC\t0.5\t0.015\t0.001\t0.2\n\
rs1\t1\t100\tA\tG\t0.3\t0.05\t0.001\t0.01\n";

    #[test]
    fn reads_columns_by_alias() {
        let table = SummaryStatistics::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 4);
        let second = &table.rows()[1];
        assert_eq!(second.effect_allele, "C");
        assert_eq!(second.frequency, None);
        assert_relative_eq!(second.beta, -0.01);
    }

    #[test]
    fn p_value_selection_is_strict_and_deduplicated() {
        let table = SummaryStatistics::from_reader(TABLE.as_bytes()).unwrap();
        let selected = table.select(Selection::PValueBelow(0.04));
        let ids: Vec<&str> = selected.iter().map(|r| r.marker_id.as_str()).collect();
        assert_eq!(ids, vec!["rs1"]);
        assert_relative_eq!(selected[0].beta, 0.02);
    }

    #[test]
    fn top_n_keeps_most_significant_rows() {
        let table = SummaryStatistics::from_reader(TABLE.as_bytes()).unwrap();
        let selected = table.select(Selection::TopN(3));
        let ids: Vec<&str> = selected.iter().map(|r| r.marker_id.as_str()).collect();
        assert_eq!(ids, vec!["rs1", "rs2"]);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let err = SummaryStatistics::from_reader("SNP\tA1\tA2\tPval\nrs1\tA\tG\t0.1\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, SumstatsError::MissingColumn("Beta")));
    }

    #[test]
    fn unparsable_beta_is_a_parse_error() {
        let text = "rsid\teffect_allele\tother_allele\teffect_weight\tp\nrs1\tA\tG\tx\t0.1\n";
        let err = SummaryStatistics::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, SumstatsError::Parse { line: 2, .. }));
    }

    #[test]
    fn converts_rows_into_per_allele_catalog() {
        let table = SummaryStatistics::from_reader(TABLE.as_bytes()).unwrap();
        let selected = table.select(Selection::PValueBelow(1.0));
        let catalog = SummaryStatistics::into_catalog(&selected, "EA").unwrap();
        assert_eq!(catalog.policy(), ScoringPolicy::PerAllele);
        assert_eq!(catalog.len(), 3);
        let rs1 = catalog.get("rs1").unwrap();
        assert_eq!(rs1.frequency, Some(0.3));
        assert_eq!(rs1.first.to_string(), "A");
    }

    #[test]
    fn loads_gzip_compressed_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sumstats.tsv.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(TABLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let table = SummaryStatistics::load(&path).unwrap();
        assert_eq!(table.len(), 4);
    }
}
