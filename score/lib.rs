#![deny(unused_variables)]
pub mod aggregate;
pub mod annotate;
pub mod catalog;
pub mod report;
pub mod resolve;
pub mod store;
pub mod sumstats;
pub mod types;

#[path = "../calibrate/mod.rs"]
pub mod calibrate;
pub use calibrate::standardize;

#[path = "../terms/mod.rs"]
pub mod terms;
pub use terms::{haplogroup, sex};

#[path = "../shared/mod.rs"]
pub mod shared;

pub use aggregate::{ScoreReport, score};
pub use catalog::{CatalogError, EffectCatalog, EffectRecord, ScoringPolicy};
pub use resolve::{Orientation, Resolution, resolve};
pub use store::{GenotypeCall, GenotypeStore, MemoryGenotypeStore};
pub use types::{AlleleSet, BiologicalSex, Category, GenomeBuild};
