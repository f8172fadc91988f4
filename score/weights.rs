// ========================================================================================
//                               Effect-size assignment
// ========================================================================================
//
// Reads a whitespace-delimited association table and attaches its effect sizes to the
// catalog: the statistic, the strand-flip flag and the region membership mask. Catalog
// variants that receive no row keep an empty mask and are never scored.

use crate::catalog::VariantCatalog;
use crate::error::{GenotypeError, Result};
use crate::shared::files::{line_as_str, open_text_source};
use crate::types::GenomicRegion;
use log::{info, warn};
use std::path::Path;

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WeightColumns {
    snp: usize,
    a1: usize,
    statistic: usize,
    is_odds_ratio: bool,
}

impl WeightColumns {
    fn from_header(path: &Path, header: &str) -> Result<Self> {
        let names: Vec<String> = header
            .split_whitespace()
            .map(|name| name.to_ascii_uppercase())
            .collect();
        let find = |wanted: &str| names.iter().position(|name| name == wanted);

        let snp = find("SNP")
            .ok_or_else(|| GenotypeError::malformed(path, Some(1), "missing SNP column"))?;
        let a1 =
            find("A1").ok_or_else(|| GenotypeError::malformed(path, Some(1), "missing A1 column"))?;
        let (statistic, is_odds_ratio) = match (find("BETA"), find("OR")) {
            (Some(beta), _) => (beta, false),
            (None, Some(or)) => (or, true),
            (None, None) => {
                return Err(GenotypeError::malformed(
                    path,
                    Some(1),
                    "missing BETA or OR column",
                ));
            }
        };
        Ok(Self {
            snp,
            a1,
            statistic,
            is_odds_ratio,
        })
    }

    fn width(&self) -> usize {
        self.snp.max(self.a1).max(self.statistic) + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightsReport {
    pub rows: usize,
    pub matched: usize,
    pub not_in_catalog: usize,
    pub allele_mismatch: usize,
    pub invalid_statistic: usize,
    pub repeated: usize,
}

/// Parses a statistic token; odds ratios are converted to log odds.
fn parse_statistic(token: &str, is_odds_ratio: bool) -> Option<f64> {
    let value: f64 = token.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if is_odds_ratio {
        return (value > 0.0).then(|| value.ln());
    }
    Some(value)
}

/// Bit 0 is the whole genome; bit `k+1` is the `k`-th region.
fn region_mask(chromosome: u8, position: u32, regions: &[GenomicRegion]) -> u64 {
    regions
        .iter()
        .enumerate()
        .filter(|(_, region)| region.contains((chromosome, position)))
        .fold(1u64, |mask, (k, _)| mask | (1u64 << (k + 1)))
}

/// Attaches the statistics in `path` to the catalog.
pub fn assign_weights(
    catalog: &mut VariantCatalog,
    path: &Path,
    regions: &[GenomicRegion],
) -> Result<WeightsReport> {
    if regions.len() > 63 {
        return Err(GenotypeError::config(format!(
            "at most 63 regions are supported, got {}",
            regions.len()
        )));
    }

    let mut reader = open_text_source(path)?;
    let mut report = WeightsReport::default();
    let mut line_number = 0usize;
    let mut columns: Option<WeightColumns> = None;

    while let Some(raw) = reader.next_line()? {
        line_number += 1;
        let line = line_as_str(path, line_number, raw)?.trim();
        if line.is_empty() {
            continue;
        }
        let Some(cols) = columns else {
            columns = Some(WeightColumns::from_header(path, line)?);
            continue;
        };

        report.rows += 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < cols.width() {
            return Err(GenotypeError::malformed(
                path,
                Some(line_number),
                format!("expected at least {} columns", cols.width()),
            ));
        }

        let Some(variant) = catalog.get_mut(fields[cols.snp]) else {
            report.not_in_catalog += 1;
            continue;
        };
        if variant.region_mask != 0 {
            report.repeated += 1;
            continue;
        }
        let Some(statistic) = parse_statistic(fields[cols.statistic], cols.is_odds_ratio) else {
            report.invalid_statistic += 1;
            continue;
        };

        let effect_allele = fields[cols.a1].to_ascii_uppercase();
        let flipped = if effect_allele == variant.allele2 {
            false
        } else if effect_allele == variant.allele1 {
            true
        } else {
            report.allele_mismatch += 1;
            continue;
        };

        variant.statistic = statistic;
        variant.flipped = flipped;
        variant.region_mask = region_mask(variant.chromosome, variant.position, regions);
        report.matched += 1;
    }

    if columns.is_none() {
        return Err(GenotypeError::malformed(path, None, "no header row found"));
    }
    if report.allele_mismatch > 0 {
        warn!(
            "{} variant(s) skipped because their effect allele matches neither allele",
            report.allele_mismatch
        );
    }
    if report.invalid_statistic > 0 {
        warn!(
            "{} variant(s) skipped because of a non-numeric or invalid statistic",
            report.invalid_statistic
        );
    }
    info!(
        "{} of {} association row(s) matched a genotyped variant",
        report.matched, report.rows
    );
    Ok(report)
}
