use crate::sex::infer_sex;
use crate::store::{GenotypeStore, MemoryGenotypeStore};
use crate::types::{BiologicalSex, GenomeBuild};
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenotypeFileError {
    #[error("Error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} contains no genotype calls")]
    Empty(String),
}

/// Sequential, line-oriented access to text data regardless of compression.
pub trait TextSource {
    fn next_line(&mut self) -> Result<Option<&[u8]>, GenotypeFileError>;
}

struct LocalTextSource {
    reader: BufReader<Box<dyn Read>>,
    line: Vec<u8>,
    line_active: bool,
    path_display: String,
}

impl LocalTextSource {
    fn new(path: &Path, reader: Box<dyn Read>) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::with_capacity(256),
            line_active: false,
            path_display: path.display().to_string(),
        }
    }
}

impl TextSource for LocalTextSource {
    fn next_line(&mut self) -> Result<Option<&[u8]>, GenotypeFileError> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|source| GenotypeFileError::Io {
                path: self.path_display.clone(),
                source,
            })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        Ok(Some(&self.line))
    }
}

/// Opens a local text file, decompressing `.gz` files transparently.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, GenotypeFileError> {
    let file = File::open(path).map_err(|source| GenotypeFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(LocalTextSource::new(path, reader)))
}

/// Platform names recognised in comment headers, matched case-insensitively.
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("23andme", "23andMe"),
    ("ancestrydna", "AncestryDNA"),
    ("ancestry.com", "AncestryDNA"),
    ("myheritage", "MyHeritage"),
    ("family tree dna", "FamilyTreeDNA"),
    ("ftdna", "FamilyTreeDNA"),
    ("livingdna", "LivingDNA"),
];

/// First-column values that mark a column header row.
const HEADER_FIRST_FIELDS: &[&str] = &["rsid", "snp", "name", "marker", "snp_name", "rs_id"];

#[derive(Debug, Default)]
struct FileHeader {
    source: Option<String>,
    build: GenomeBuild,
    sex: Option<BiologicalSex>,
}

impl FileHeader {
    fn absorb_comment(&mut self, comment: &str) {
        let lower = comment.to_ascii_lowercase();
        if self.source.is_none() {
            self.source = KNOWN_SOURCES
                .iter()
                .find(|(needle, _)| lower.contains(needle))
                .map(|(_, name)| name.to_string());
        }
        if self.build == GenomeBuild::Unknown {
            self.build = GenomeBuild::from_label(&lower);
        }
        if self.sex.is_none() {
            self.sex = stated_sex(&lower);
        }
    }
}

/// Reads `sex: male` / `gender = female` style comment lines.
fn stated_sex(lower: &str) -> Option<BiologicalSex> {
    let (key, value) = lower.split_once([':', '='])?;
    if !matches!(key.trim(), "sex" | "gender") {
        return None;
    }
    match value.trim() {
        "male" | "m" => Some(BiologicalSex::Male),
        "female" | "f" => Some(BiologicalSex::Female),
        _ => None,
    }
}

/// Splits one data row. Tab- and comma-delimited rows go through the `csv` parser so quoted
/// fields may contain the delimiter; anything else is split on whitespace.
fn split_fields(line: &str) -> Vec<String> {
    let delimiter = if line.contains('\t') {
        b'\t'
    } else if line.contains(',') {
        b','
    } else {
        return line
            .split_whitespace()
            .map(|field| field.trim_matches('"').to_string())
            .collect();
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .buffer_capacity(line.len().max(64))
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Loads a consumer raw-data export into an in-memory store.
///
/// Accepts the 4-column layout (`rsid chromosome position genotype`) and the 5-column
/// layout with separate allele columns, tab-, comma- or space-separated, optionally
/// quoted and gzip-compressed. Sex is inferred from X/Y calls unless the header states it.
pub fn load_dtc_genotypes(path: &Path) -> Result<MemoryGenotypeStore, GenotypeFileError> {
    let mut source = open_text_source(path)?;
    let mut header = FileHeader::default();
    let mut store = MemoryGenotypeStore::new();
    let mut five_column_rows = 0usize;
    let mut skipped = 0usize;

    while let Some(bytes) = source.next_line()? {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            header.absorb_comment(comment);
            continue;
        }

        let fields = split_fields(line);
        let is_header_row = fields.first().is_some_and(|first| {
            HEADER_FIRST_FIELDS
                .iter()
                .any(|h| first.eq_ignore_ascii_case(h))
        });
        if is_header_row {
            continue;
        }

        match fields.as_slice() {
            [id, chromosome, _position, allele1, allele2, ..] => {
                five_column_rows += 1;
                store.insert(id, chromosome, &format!("{allele1}{allele2}"));
            }
            [id, chromosome, _position, genotype] => store.insert(id, chromosome, genotype),
            _ => {
                skipped += 1;
                debug!("Skipping malformed line in {}: {line}", path.display());
            }
        }
    }

    if store.is_empty() {
        return Err(GenotypeFileError::Empty(path.display().to_string()));
    }
    if skipped > 0 {
        warn!("Skipped {skipped} malformed lines in {}.", path.display());
    }

    if header.source.is_none() && five_column_rows > 0 {
        header.source = Some("AncestryDNA".to_string());
    }
    if let Some(name) = header.source {
        store.set_source(name);
    }
    store.set_build(header.build);

    let sex = match header.sex {
        Some(sex) => sex,
        None => infer_sex(&store).call,
    };
    store.set_sex(sex);

    info!(
        "Loaded {} markers from {} (build {}, sex {}).",
        store.marker_count(),
        path.display(),
        header.build,
        sex
    );
    Ok(store)
}
