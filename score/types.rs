// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// A named category (or "index") tag declared by a catalog header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `muscle_energy` -> `Muscle Energy`.
    pub fn title(&self) -> String {
        self.0
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered, de-duplicated set of allele tokens.
///
/// Tokens are upper-cased single nucleotides (`A`, `C`, `G`, `T`) or, for indel-type
/// markers, short distinguishable strings such as `I`, `D` or `TA7`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlleleSet(Vec<String>);

impl AlleleSet {
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut set: Vec<String> = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        set.sort();
        set.dedup();
        Self(set)
    }

    #[inline]
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// First token shared with `other`, if the two sets overlap.
    pub fn intersection_with<'a>(&'a self, other: &AlleleSet) -> Option<&'a str> {
        self.iter().find(|t| other.contains(t))
    }
}

impl fmt::Display for AlleleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BiologicalSex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl fmt::Display for BiologicalSex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenomeBuild {
    Grch36,
    Grch37,
    Grch38,
    #[default]
    Unknown,
}

impl GenomeBuild {
    /// Recognises the build labels consumer files put in their comment headers.
    pub fn from_label(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("grch38") || lower.contains("hg38") || lower.contains("build 38") {
            Self::Grch38
        } else if lower.contains("grch37") || lower.contains("hg19") || lower.contains("build 37")
        {
            Self::Grch37
        } else if lower.contains("ncbi36") || lower.contains("hg18") || lower.contains("build 36")
        {
            Self::Grch36
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for GenomeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Grch36 => "NCBI36",
            Self::Grch37 => "GRCh37",
            Self::Grch38 => "GRCh38",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Normalises a chromosome label to the bare upper-case form used as a store key.
///
/// Consumer files number the sex chromosomes (23 = X, 24 = Y, 25 = pseudo-autosomal XY,
/// 26 = MT) and some prefix labels with `chr`.
pub fn normalize_chromosome_label(label: &str) -> String {
    let mut trimmed = label.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("chr")) {
        trimmed = &trimmed[3..];
    }
    let upper = trimmed.to_ascii_uppercase();
    match upper.as_str() {
        "23" => "X".to_string(),
        "24" => "Y".to_string(),
        "25" => "XY".to_string(),
        "26" | "M" => "MT".to_string(),
        _ => upper,
    }
}
