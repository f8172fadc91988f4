// ========================================================================================
//
//                         The pipeline: load, filter, score, write
//
// ========================================================================================
//
// `GenotypeData::load` runs the loading stages in dependency order and owns their
// results. `score_catalog` cuts the catalog into contiguous slices, scores each slice on
// the thread pool into its own accumulator, and reduces the partial accumulators in
// slice order so a fixed thread count always yields bit-identical scores.

use crate::bed::BedFileSet;
use crate::catalog::{CatalogOptions, VariantCatalog};
use crate::config::{RunConfig, ScoringConfig};
use crate::error::{GenotypeError, Result};
use crate::kernel::{ScoringContext, SliceSummary, score_slice};
use crate::locate::GenotypeFileSet;
use crate::qc::{QcReport, filter_variants};
use crate::registry::{RegistryOptions, SampleRegistry};
use crate::shared::files::with_suffix;
use crate::types::SampleScore;
use crate::weights::assign_weights;
use log::{info, warn};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything the loading stages produce, ready for scoring.
#[derive(Debug)]
pub struct GenotypeData {
    registry: SampleRegistry,
    catalog: VariantCatalog,
    beds: BedFileSet,
    qc: Option<QcReport>,
}

impl GenotypeData {
    pub fn load(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        let prefix = config
            .genotype
            .as_deref()
            .ok_or_else(|| GenotypeError::config("no genotype fileset prefix was given"))?;

        info!("> Stage 1: Locating genotype files...");
        let files = GenotypeFileSet::locate(prefix, config.fam.as_deref(), &config.chromosomes)?;

        info!("> Stage 2: Reading samples...");
        let sample_selection = config.selection.load_samples(config.ignore_fid)?;
        let registry = SampleRegistry::load(
            files.fam_path(),
            RegistryOptions {
                ignore_fid: config.ignore_fid,
                keep_nonfounders: config.nonfounders,
                selection: sample_selection.as_ref(),
            },
        )?;

        info!("> Stage 3: Reading variants...");
        let variant_selection = config.selection.load_variants()?;
        let mut catalog = VariantCatalog::load(
            &files,
            CatalogOptions {
                chromosomes: &config.chromosomes,
                keep_ambiguous: config.filter.keep_ambiguous,
                selection: variant_selection.as_ref(),
                out_prefix: &config.out,
            },
        )?;

        let beds = BedFileSet::validate(
            &files,
            registry.unfiltered_len(),
            catalog.file_variant_counts(),
        )?;

        let qc = if config.filter.is_active() {
            info!("> Stage 4: Filtering variants...");
            Some(filter_variants(
                &mut catalog,
                &beds,
                registry.inclusion(),
                &config.filter,
            )?)
        } else {
            None
        };

        Ok(Self {
            registry,
            catalog,
            beds,
            qc,
        })
    }

    pub fn registry(&self) -> &SampleRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &VariantCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut VariantCatalog {
        &mut self.catalog
    }

    pub fn qc_report(&self) -> Option<&QcReport> {
        self.qc.as_ref()
    }
}

/// Per-sample scores for one region, indexed like the registry's included samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionScores {
    pub region: usize,
    pub scores: Vec<SampleScore>,
    pub summary: SliceSummary,
}

/// Scores `region` over the whole catalog using `threads` contiguous slices.
pub fn score_catalog(
    data: &mut GenotypeData,
    region: usize,
    scoring: ScoringConfig,
    threads: usize,
) -> Result<RegionScores> {
    let GenotypeData {
        registry,
        catalog,
        beds,
        ..
    } = data;
    let context = ScoringContext {
        beds: &*beds,
        mask: registry.inclusion(),
        config: scoring,
    };
    let subset_len = context.mask.len();
    let variants = catalog.variants_mut();
    let slice_len = variants.len().div_ceil(threads.max(1)).max(1);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| GenotypeError::config(format!("failed to build thread pool: {e}")))?;

    let partials: Vec<(Vec<SampleScore>, SliceSummary)> = pool.install(|| {
        variants
            .par_chunks_mut(slice_len)
            .map(|slice| {
                let mut scores = vec![SampleScore::default(); subset_len];
                let summary = score_slice(slice, region, &context, &mut scores)?;
                Ok((scores, summary))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut scores = vec![SampleScore::default(); subset_len];
    let mut summary = SliceSummary::default();
    for (partial_scores, partial_summary) in &partials {
        for (total, partial) in scores.iter_mut().zip(partial_scores) {
            total.absorb(partial);
        }
        summary.absorb(partial_summary);
    }

    Ok(RegionScores {
        region,
        scores,
        summary,
    })
}

/// The profile file for `region`: `<out>.profile` for the genome, `<out>.region<k>.profile`
/// for configured region `k`.
pub fn profile_path(out: &Path, region: usize) -> PathBuf {
    if region == 0 {
        with_suffix(out, "profile")
    } else {
        with_suffix(out, &format!("region{region}.profile"))
    }
}

/// Writes one scored row per included sample, in pedigree order.
pub fn write_profile(
    path: &Path,
    registry: &SampleRegistry,
    scores: &[SampleScore],
) -> Result<()> {
    let temp_path = with_suffix(path, "tmp");
    let write_result = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writeln!(writer, "FID\tIID\tCNT\tSCORE")?;

        let mut ryu_buffer = ryu::Buffer::new();
        for (sample, score) in registry.included_samples().zip(scores) {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                sample.family_id,
                sample.individual_id,
                score.variant_count,
                ryu_buffer.format(score.score)
            )?;
        }
        writer.flush()
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(GenotypeError::io(path, err));
    }
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        GenotypeError::io(path, e)
    })
}

/// What a complete run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub profiles: Vec<PathBuf>,
    pub variants_scored: usize,
}

/// Loads the data described by `config`, attaches the association statistics and writes
/// one profile per region.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let start = Instant::now();
    let regions = config.parsed_regions()?;
    let weights = config
        .weights
        .as_deref()
        .ok_or_else(|| GenotypeError::config("no association file was given"))?;

    let mut data = GenotypeData::load(config)?;
    assign_weights(data.catalog_mut(), weights, &regions)?;

    info!("> Stage 5: Scoring {} region(s)...", regions.len() + 1);
    let mut profiles = Vec::with_capacity(regions.len() + 1);
    let mut variants_scored = 0;
    for region in 0..=regions.len() {
        let result = score_catalog(&mut data, region, config.scoring, config.threads)?;
        if result.summary.invalidated > 0 {
            warn!(
                "{} variant(s) in region {region} had no observed genotypes and were skipped",
                result.summary.invalidated
            );
        }
        if region == 0 {
            variants_scored = result.summary.scored;
        }
        let path = profile_path(&config.out, region);
        write_profile(&path, data.registry(), &result.scores)?;
        info!(
            "Region {region}: {} variant(s) scored, written to {}",
            result.summary.scored,
            path.display()
        );
        profiles.push(path);
    }

    info!("Finished in {:.2?}", start.elapsed());
    Ok(RunSummary {
        profiles,
        variants_scored,
    })
}
