#![deny(unused_variables)]

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use genoscore::aggregate;
use genoscore::annotate::{InterpretationPanel, annotate};
use genoscore::catalog::EffectCatalog;
use genoscore::haplogroup::{
    DiagnosticPanel, VoteOptions, mitochondrial_summary, predict_y_lineage,
};
use genoscore::report::{Reporter, TextReporter};
use genoscore::shared::files::load_dtc_genotypes;
use genoscore::standardize::{
    DEFAULT_MIN_COVERAGE, DEFAULT_RESAMPLES, DEFAULT_SEED, ResamplingConfig, StandardizeOptions,
    standardize_report,
};
use genoscore::store::MemoryGenotypeStore;
use genoscore::sumstats::{Selection, SummaryStatistics};

#[derive(Parser)]
#[command(
    name = "genoscore",
    about = "Genotype interpretation and polygenic scoring for consumer raw-data files",
    long_about = "Resolves consumer genotype calls against effect catalogs on either strand, \
                 aggregates trait scores, standardizes polygenic scores against allele \
                 frequencies and classifies paternal lineage from diagnostic markers."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Suppress warnings
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret pharmacogenomic, health and trait markers
    #[command(about = "Interpret markers from a genotype interpretation panel")]
    Traits {
        /// Consumer raw-data file (23andMe, AncestryDNA, ...; optionally .gz)
        #[arg(value_name = "GENOTYPE_PATH")]
        genotype_path: PathBuf,

        /// Interpretation panel TOML (defaults to the bundled panel)
        #[arg(long, value_name = "PATH")]
        panel: Option<PathBuf>,
    },

    /// Score a genotype file against an effect catalog
    #[command(about = "Aggregate per-category scores from an effect catalog")]
    Score {
        #[arg(value_name = "GENOTYPE_PATH")]
        genotype_path: PathBuf,

        /// Effect catalog TOML (defaults to the bundled athletic catalog)
        #[arg(long, value_name = "PATH")]
        catalog: Option<PathBuf>,

        /// Also standardize the composite total
        #[arg(long)]
        standardize: bool,

        /// Minimum matched fraction before a percentile is reported
        #[arg(long, default_value_t = DEFAULT_MIN_COVERAGE)]
        min_coverage: f64,

        /// Only report missing-marker counts, not each missing marker
        #[arg(long)]
        brief: bool,
    },

    /// Polygenic score from GWAS summary statistics
    #[command(about = "Compute and standardize a polygenic score from summary statistics")]
    Pgs {
        #[arg(value_name = "GENOTYPE_PATH")]
        genotype_path: PathBuf,

        /// Tab-separated summary statistics (optionally .gz)
        #[arg(value_name = "SUMSTATS_PATH")]
        sumstats: PathBuf,

        /// Keep markers with p below this threshold (ignored with --top)
        #[arg(long, default_value_t = 0.05)]
        p_value: f64,

        /// Keep the N most significant markers instead of a p-value cut
        #[arg(long, value_name = "N")]
        top: Option<usize>,

        /// Resample the 95% interval instead of the analytic interval
        #[arg(long)]
        bootstrap: bool,

        /// Number of resampling trials
        #[arg(long, default_value_t = DEFAULT_RESAMPLES)]
        resamples: usize,

        /// Seed for resampling
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        #[arg(long, default_value_t = DEFAULT_MIN_COVERAGE)]
        min_coverage: f64,
    },

    /// Paternal lineage from Y-chromosome diagnostic markers
    #[command(about = "Classify Y-chromosome haplogroup from diagnostic markers")]
    Haplogroup {
        #[arg(value_name = "GENOTYPE_PATH")]
        genotype_path: PathBuf,

        /// Diagnostic panel TOML (defaults to the bundled Y panel)
        #[arg(long, value_name = "PATH")]
        panel: Option<PathBuf>,

        /// Also try the complementary strand when an allele is not in the panel
        #[arg(long)]
        allow_complement: bool,
    },

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let result = match cli.command {
        Some(Commands::Traits {
            genotype_path,
            panel,
        }) => run_traits(&genotype_path, panel.as_deref()),
        Some(Commands::Score {
            genotype_path,
            catalog,
            standardize,
            min_coverage,
            brief,
        }) => run_score(
            &genotype_path,
            catalog.as_deref(),
            standardize.then_some(min_coverage),
            brief,
        ),
        Some(Commands::Pgs {
            genotype_path,
            sumstats,
            p_value,
            top,
            bootstrap,
            resamples,
            seed,
            min_coverage,
        }) => {
            let selection = match top {
                Some(n) => Selection::TopN(n),
                None => Selection::PValueBelow(p_value),
            };
            let options = StandardizeOptions {
                min_coverage,
                resampling: bootstrap.then_some(ResamplingConfig {
                    iterations: resamples,
                    seed,
                }),
            };
            run_pgs(&genotype_path, &sumstats, selection, &options)
        }
        Some(Commands::Haplogroup {
            genotype_path,
            panel,
            allow_complement,
        }) => run_haplogroup(
            &genotype_path,
            panel.as_deref(),
            VoteOptions { allow_complement },
        ),
        Some(Commands::Version) => {
            println!("genoscore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map_err(|e| Box::new(e) as Box<dyn Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(quiet: bool, verbose: u8) {
    let level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    if let Err(e) = env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let level = record.level().as_str().to_lowercase();
            writeln!(buf, "[genoscore {level:>5}] {}", record.args())
        })
        .try_init()
    {
        eprintln!("failed to set up logger: {e}");
    }
}

fn load_store(path: &Path) -> Result<MemoryGenotypeStore, Box<dyn Error>> {
    Ok(load_dtc_genotypes(path)?)
}

fn stdout_reporter() -> TextReporter<io::StdoutLock<'static>> {
    TextReporter::new(io::stdout().lock())
}

fn run_traits(genotype_path: &Path, panel: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let store = load_store(genotype_path)?;
    let panel = match panel {
        Some(path) => InterpretationPanel::load(path)?,
        None => InterpretationPanel::bundled()?,
    };

    let mut reporter = stdout_reporter();
    reporter.sample(&store)?;
    reporter.annotations(&annotate(&panel, &store))?;
    Ok(())
}

fn run_score(
    genotype_path: &Path,
    catalog: Option<&Path>,
    min_coverage: Option<f64>,
    brief: bool,
) -> Result<(), Box<dyn Error>> {
    let store = load_store(genotype_path)?;
    let catalog = match catalog {
        Some(path) => EffectCatalog::load(path)?,
        None => EffectCatalog::athletic()?,
    };
    let report = aggregate::score(&catalog, &store);

    let mut reporter = stdout_reporter().with_missing_details(!brief);
    reporter.sample(&store)?;
    reporter.score(&report)?;

    if let Some(min_coverage) = min_coverage {
        let options = StandardizeOptions {
            min_coverage,
            ..StandardizeOptions::default()
        };
        match standardize_report(&report, &options) {
            Some(result) => reporter.standardization(&result)?,
            None => log::warn!(
                "'{}' has independent categories; no composite total to standardize.",
                report.catalog_name
            ),
        }
    }
    Ok(())
}

fn run_pgs(
    genotype_path: &Path,
    sumstats_path: &Path,
    selection: Selection,
    options: &StandardizeOptions,
) -> Result<(), Box<dyn Error>> {
    let store = load_store(genotype_path)?;
    let sumstats = SummaryStatistics::load(sumstats_path)?;
    let rows = sumstats.select(selection);
    if rows.is_empty() {
        return Err(format!(
            "no summary statistics rows in {} pass the selection",
            sumstats_path.display()
        )
        .into());
    }

    let name = sumstats_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "summary statistics".to_string());
    let catalog = SummaryStatistics::into_catalog(&rows, name)?;
    let report = aggregate::score(&catalog, &store);

    let mut reporter = stdout_reporter().with_missing_details(false);
    reporter.sample(&store)?;
    reporter.score(&report)?;
    if let Some(result) = standardize_report(&report, options) {
        reporter.standardization(&result)?;
    }
    Ok(())
}

fn run_haplogroup(
    genotype_path: &Path,
    panel: Option<&Path>,
    options: VoteOptions,
) -> Result<(), Box<dyn Error>> {
    let store = load_store(genotype_path)?;
    let panel = match panel {
        Some(path) => DiagnosticPanel::load(path)?,
        None => DiagnosticPanel::y_chromosome()?,
    };

    let mut reporter = stdout_reporter();
    reporter.sample(&store)?;
    reporter.lineage(panel.name(), &predict_y_lineage(&panel, &store, options))?;

    let mt = mitochondrial_summary(&store);
    let mut out = reporter.into_inner();
    writeln!(out, "Mitochondrial markers: {} ({} called)", mt.total, mt.called)?;
    Ok(())
}
