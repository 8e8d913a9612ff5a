// ========================================================================================
//
//                      Strand- and order-tolerant genotype resolution
//
// ========================================================================================

use crate::types::AlleleSet;
use std::collections::BTreeMap;

/// Splits a raw genotype string into allele tokens.
///
/// Calls with a `/` separator (`TA7/TA6`, `I/D`) are split on it; anything else is read
/// as one token per character (`CT`, `A`, `DI`). Tokens are upper-cased.
pub fn tokenize(genotype: &str) -> Vec<String> {
    let trimmed = genotype.trim();
    if trimmed.contains('/') {
        trimmed
            .split('/')
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect()
    } else {
        trimmed
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase().to_string())
            .collect()
    }
}

/// Watson-Crick complement of a single token. Non-nucleotide tokens pass through.
pub fn complement_token(token: &str) -> String {
    token
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'A' => 'T',
            'T' => 'A',
            'C' => 'G',
            'G' => 'C',
            other => other,
        })
        .collect()
}

/// Joins tokens back into the literal form used as a lookup key: single-character tokens
/// are concatenated (`CT`), longer tokens keep their separator (`TA7/TA6`).
pub fn join_tokens(tokens: &[String]) -> String {
    if tokens.iter().all(|t| t.chars().count() == 1) {
        tokens.concat()
    } else {
        tokens.join("/")
    }
}

/// The read transforms tried, in order, until a genotype can be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Tokens as reported.
    Direct,
    /// Token order reversed (`TC` read as `CT`).
    Reversed,
    /// Each token replaced by its strand complement.
    Complement,
    /// Both transforms.
    ReversedComplement,
}

impl Orientation {
    /// The order of preference. Strand flips are only tried after both read orders fail.
    pub const ORDER: [Orientation; 4] = [
        Orientation::Direct,
        Orientation::Reversed,
        Orientation::Complement,
        Orientation::ReversedComplement,
    ];

    pub fn apply(self, tokens: &[String]) -> Vec<String> {
        match self {
            Orientation::Direct => tokens.to_vec(),
            Orientation::Reversed => tokens.iter().rev().cloned().collect(),
            Orientation::Complement => tokens.iter().map(|t| complement_token(t)).collect(),
            Orientation::ReversedComplement => {
                tokens.iter().rev().map(|t| complement_token(t)).collect()
            }
        }
    }

    #[inline]
    pub fn is_strand_flipped(self) -> bool {
        matches!(
            self,
            Orientation::Complement | Orientation::ReversedComplement
        )
    }
}

/// Allele counts of one genotype against a marker's two allele sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub first_count: u8,
    pub second_count: u8,
    pub orientation: Orientation,
    /// The genotype literal after the winning transform, e.g. `CT`.
    pub matched: String,
}

impl Resolution {
    pub fn strand_flipped(&self) -> bool {
        self.orientation.is_strand_flipped()
    }

    pub fn is_homozygous_first(&self) -> bool {
        self.first_count > 0 && self.second_count == 0
    }

    pub fn is_homozygous_second(&self) -> bool {
        self.second_count > 0 && self.first_count == 0
    }

    pub fn is_heterozygous(&self) -> bool {
        self.first_count > 0 && self.second_count > 0
    }
}

/// Runs the transform chain and returns the first success.
///
/// `classify` receives the transformed tokens and decides whether they are acceptable.
pub fn resolve_with<T, F>(genotype: &str, mut classify: F) -> Option<(Orientation, T)>
where
    F: FnMut(&[String]) -> Option<T>,
{
    let tokens = tokenize(genotype);
    if tokens.is_empty() {
        return None;
    }
    Orientation::ORDER.iter().find_map(|&orientation| {
        let transformed = orientation.apply(&tokens);
        classify(&transformed).map(|value| (orientation, value))
    })
}

/// Counts copies of the first and second alleles in `genotype`.
///
/// Every token must belong to `first ∪ second` under one of the four transforms, otherwise
/// the genotype is unresolved and `None` is returned. Never fails loudly.
pub fn resolve(genotype: &str, first: &AlleleSet, second: &AlleleSet) -> Option<Resolution> {
    let (orientation, (first_count, second_count, matched)) =
        resolve_with(genotype, |tokens| {
            let mut first_count = 0u8;
            let mut second_count = 0u8;
            for token in tokens {
                if first.contains(token) {
                    first_count = first_count.saturating_add(1);
                } else if second.contains(token) {
                    second_count = second_count.saturating_add(1);
                } else {
                    return None;
                }
            }
            Some((first_count, second_count, join_tokens(tokens)))
        })?;

    Some(Resolution {
        first_count,
        second_count,
        orientation,
        matched,
    })
}

/// Looks up a genotype among literal keys (`CC`, `CT`, `TA7/TA6`) using the same chain.
///
/// Keys are expected in upper case. Returns the matched key, its value and the orientation
/// that produced the match.
pub fn lookup_literal<'m, V>(
    genotype: &str,
    table: &'m BTreeMap<String, V>,
) -> Option<(&'m str, &'m V, Orientation)> {
    let (orientation, (key, value)) = resolve_with(genotype, |tokens| {
        table.get_key_value(join_tokens(tokens).as_str())
    })?;
    Some((key.as_str(), value, orientation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets(first: &[&str], second: &[&str]) -> (AlleleSet, AlleleSet) {
        (AlleleSet::new(first), AlleleSet::new(second))
    }

    #[test]
    fn homozygous_and_heterozygous_counts() {
        let (c, t) = sets(&["C"], &["T"]);

        let hom = resolve("CC", &c, &t).unwrap();
        assert_eq!((hom.first_count, hom.second_count), (2, 0));
        assert_eq!(hom.orientation, Orientation::Direct);

        let het = resolve("TC", &c, &t).unwrap();
        assert_eq!((het.first_count, het.second_count), (1, 1));
        assert!(het.is_heterozygous());

        let other = resolve("tt", &c, &t).unwrap();
        assert!(other.is_homozygous_second());
    }

    #[test]
    fn complement_strand_is_tried_after_direct_orders() {
        let (c, t) = sets(&["C"], &["T"]);
        let flipped = resolve("GG", &c, &t).unwrap();
        assert_eq!(flipped.orientation, Orientation::Complement);
        assert!(flipped.strand_flipped());
        assert_eq!(flipped.matched, "CC");
        assert_eq!((flipped.first_count, flipped.second_count), (2, 0));
    }

    #[test]
    fn mixed_strand_call_is_unresolved() {
        let (c, t) = sets(&["C"], &["T"]);
        assert!(resolve("AC", &c, &t).is_none());
        assert!(resolve("CA", &c, &t).is_none());
        assert!(resolve("", &c, &t).is_none());
    }

    #[test]
    fn complement_symmetry_holds_for_resolvable_calls() {
        let (a, g) = sets(&["A"], &["G"]);
        for genotype in ["AA", "AG", "GA", "GG", "TT", "TC", "CT", "CC"] {
            let direct = resolve(genotype, &a, &g).unwrap();
            let complemented: String = tokenize(genotype)
                .iter()
                .map(|t| complement_token(t))
                .collect();
            let mirrored = resolve(&complemented, &a, &g).unwrap();
            assert_eq!(
                (direct.first_count, direct.second_count),
                (mirrored.first_count, mirrored.second_count),
                "genotype {genotype}"
            );
        }
    }

    #[test]
    fn multi_character_tokens_use_slash_separator() {
        let (seven, six) = sets(&["TA7"], &["TA6"]);
        let resolution = resolve("TA6/TA7", &seven, &six).unwrap();
        assert_eq!((resolution.first_count, resolution.second_count), (1, 1));
        assert_eq!(resolution.matched, "TA6/TA7");

        let (i, d) = sets(&["I"], &["D"]);
        let indel = resolve("DD", &i, &d).unwrap();
        assert_eq!(indel.second_count, 2);
    }

    #[test]
    fn literal_lookup_follows_the_chain() {
        let mut table = BTreeMap::new();
        table.insert("CT".to_string(), "carrier");
        table.insert("CC".to_string(), "typical");

        let (key, value, orientation) = lookup_literal("TC", &table).unwrap();
        assert_eq!((key, *value), ("CT", "carrier"));
        assert_eq!(orientation, Orientation::Reversed);

        let (key, _, orientation) = lookup_literal("GG", &table).unwrap();
        assert_eq!(key, "CC");
        assert!(orientation.is_strand_flipped());

        assert!(lookup_literal("AA", &table).is_none());
    }
}
