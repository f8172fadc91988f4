// ========================================================================================
//
//                           THE COMMAND-LINE FRONT END: PLINKSCORE
//
// ========================================================================================
//
// Builds a `RunConfig` from an optional TOML file, applies command-line overrides on top
// of it, and hands it to the pipeline. Every fatal error is reported once and turns into
// a non-zero exit status.

use clap::Parser;
use log::error;
use plinkscore::config::RunConfig;
use plinkscore::pipeline;
use plinkscore::types::{GeneticModel, MissingPolicy};
use std::path::PathBuf;
use std::process;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "plinkscore",
    version,
    about = "Polygenic risk scores computed directly from PLINK binary filesets."
)]
struct Args {
    /// TOML run configuration. Command-line options override its values.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Genotype fileset prefix. `#` expands to each chromosome; append `,FAM` to use an
    /// external sample file.
    #[clap(long)]
    bfile: Option<String>,

    /// Sample (.fam) file shared by every located fileset.
    #[clap(long)]
    fam: Option<PathBuf>,

    /// Association statistics with SNP, A1 and BETA (or OR) columns.
    #[clap(long)]
    base: Option<PathBuf>,

    /// Output prefix.
    #[clap(long)]
    out: Option<PathBuf>,

    /// Extra scoring region as chrN:start-end. May be repeated.
    #[clap(long = "region")]
    regions: Vec<String>,

    #[clap(long)]
    keep: Option<PathBuf>,

    #[clap(long)]
    remove: Option<PathBuf>,

    #[clap(long)]
    extract: Option<PathBuf>,

    #[clap(long)]
    exclude: Option<PathBuf>,

    /// Maximum genotype missingness rate.
    #[clap(long)]
    geno: Option<f64>,

    /// Minor allele frequency threshold.
    #[clap(long)]
    maf: Option<f64>,

    /// Keep A/T and C/G variants.
    #[clap(long)]
    keep_ambig: bool,

    /// Identify samples by IID alone.
    #[clap(long)]
    ignore_fid: bool,

    /// Keep samples whose parents are present in the sample file.
    #[clap(long)]
    nonfounders: bool,

    /// additive, dominant, recessive or heterozygous.
    #[clap(long)]
    model: Option<GeneticModel>,

    /// mean-impute, center or exclude.
    #[clap(long)]
    missing: Option<MissingPolicy>,

    #[clap(long)]
    threads: Option<usize>,
}

impl Args {
    fn into_config(self) -> plinkscore::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if self.bfile.is_some() {
            config.genotype = self.bfile;
        }
        if self.fam.is_some() {
            config.fam = self.fam;
        }
        if self.base.is_some() {
            config.weights = self.base;
        }
        if let Some(out) = self.out {
            config.out = out;
        }
        if !self.regions.is_empty() {
            config.regions = self.regions;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.ignore_fid |= self.ignore_fid;
        config.nonfounders |= self.nonfounders;

        let selection = &mut config.selection;
        selection.keep = self.keep.or(selection.keep.take());
        selection.remove = self.remove.or(selection.remove.take());
        selection.extract = self.extract.or(selection.extract.take());
        selection.exclude = self.exclude.or(selection.exclude.take());

        let filter = &mut config.filter;
        filter.geno = self.geno.or(filter.geno);
        filter.maf = self.maf.or(filter.maf);
        filter.keep_ambiguous |= self.keep_ambig;

        if let Some(model) = self.model {
            config.scoring.model = model;
        }
        if let Some(missing) = self.missing {
            config.scoring.missing = missing;
        }
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    match pipeline::run(&config) {
        Ok(summary) => {
            for path in &summary.profiles {
                eprintln!("> Scores written to {}", path.display());
            }
        }
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
