// ========================================================================================
//
//                          The kernel: per-slice score accumulation
//
// ========================================================================================
//
// Scores one contiguous slice of the catalog into a caller-owned accumulator. The order
// of operations per variant is fixed: strand flip, genetic model, post-model allele
// frequency, then per-sample accumulation. Changing that order changes the numbers.

use crate::bed::BedFileSet;
use crate::config::ScoringConfig;
use crate::decode::{BedRowReader, DecodeScratch, GenotypeCounts, SampleMask, decode_genotypes};
use crate::error::Result;
use crate::types::{GeneticModel, MissingPolicy, SampleScore, Variant};

/// Everything a slice needs that is shared, read-only, across all slices of a run.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub beds: &'a BedFileSet,
    /// The scoring subset. Accumulator position `k` is the `k`-th selected sample.
    pub mask: &'a SampleMask,
    pub config: ScoringConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSummary {
    pub scored: usize,
    /// Variants whose every subset sample was missing.
    pub invalidated: usize,
}

impl SliceSummary {
    pub fn absorb(&mut self, other: &SliceSummary) {
        self.scored += other.scored;
        self.invalidated += other.invalidated;
    }
}

/// Applies the strand flip and then the genetic model to a count triplet.
pub fn apply_model(counts: GenotypeCounts, flipped: bool, model: GeneticModel) -> GenotypeCounts {
    let mut out = counts;
    if flipped {
        std::mem::swap(&mut out.hom_ref, &mut out.hom_alt);
    }
    match model {
        GeneticModel::Additive => {}
        GeneticModel::Heterozygous => {
            out.hom_ref += out.hom_alt;
            out.hom_alt = 0;
        }
        GeneticModel::Dominant => {
            out.het += out.hom_alt;
            out.hom_alt = 0;
        }
        GeneticModel::Recessive => {
            out.hom_ref += out.het;
            out.het = out.hom_alt;
            out.hom_alt = 0;
        }
    }
    out
}

/// The per-sample counterpart of `apply_model`.
#[inline(always)]
pub fn model_value(dosage: u8, flipped: bool, model: GeneticModel) -> u8 {
    let dosage = if flipped { 2 - dosage } else { dosage };
    match model {
        GeneticModel::Additive => dosage,
        GeneticModel::Heterozygous => {
            if dosage == 2 {
                0
            } else {
                dosage
            }
        }
        GeneticModel::Dominant => dosage.min(1),
        GeneticModel::Recessive => dosage.saturating_sub(1),
    }
}

/// Adds one decoded variant into `scores`. Returns `false`, leaving `scores` untouched,
/// when no sample of the subset was observed.
pub fn accumulate_variant(
    counts: GenotypeCounts,
    scratch: &DecodeScratch,
    statistic: f64,
    flipped: bool,
    config: &ScoringConfig,
    scores: &mut [SampleScore],
) -> bool {
    let observed = counts.observed();
    if observed == 0 {
        return false;
    }
    debug_assert_eq!(scratch.values.len(), scores.len());

    let modelled = apply_model(counts, flipped, config.model);
    let post_model_freq =
        (modelled.het + 2 * modelled.hom_alt) as f64 / (2.0 * observed as f64);
    let center = statistic * post_model_freq;

    let mut missing = scratch.missing.iter().copied().peekable();
    for (sample, (score, &dosage)) in scores.iter_mut().zip(&scratch.values).enumerate() {
        if missing.next_if_eq(&(sample as u32)).is_some() {
            if config.missing == MissingPolicy::MeanImpute {
                score.score += center;
                score.variant_count += 1;
            }
            continue;
        }
        if config.missing == MissingPolicy::Center {
            score.score -= center;
        }
        let value = model_value(dosage, flipped, config.model);
        score.score += value as f64 * statistic * 0.5;
        score.variant_count += 1;
    }
    true
}

/// Scores every variant of `variants` that belongs to `region` into `scores`, which
/// must hold one entry per sample of the scoring subset. Variants found to have no
/// observed sample are marked invalid and skipped.
pub fn score_slice(
    variants: &mut [Variant],
    region: usize,
    context: &ScoringContext<'_>,
    scores: &mut [SampleScore],
) -> Result<SliceSummary> {
    debug_assert_eq!(scores.len(), context.mask.len());
    let mut summary = SliceSummary::default();
    let mut reader = BedRowReader::new(context.beds);
    let mut scratch = DecodeScratch::with_capacity(context.mask.len());

    for variant in variants.iter_mut().filter(|v| v.in_region(region)) {
        let row = reader.read_row(variant.file, variant.record)?;
        let counts = decode_genotypes(row, context.mask, &mut scratch);
        let contributed = accumulate_variant(
            counts,
            &scratch,
            variant.statistic,
            variant.flipped,
            &context.config,
            scores,
        );
        if contributed {
            summary.scored += 1;
        } else {
            variant.valid = false;
            summary.invalidated += 1;
        }
    }
    reader.close();
    Ok(summary)
}
