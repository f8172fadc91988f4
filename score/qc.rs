// ========================================================================================
//                                Variant quality control
// ========================================================================================
//
// One streaming pass over the catalog. Each row is decoded to aggregate counts only,
// judged against the missingness and allele-frequency thresholds, and the survivors are
// compacted to the front of the catalog in their original order.

use crate::bed::BedFileSet;
use crate::catalog::VariantCatalog;
use crate::config::FilterConfig;
use crate::decode::{BedRowReader, GenotypeCounts, SampleMask, decode_counts};
use crate::error::Result;
use log::info;

/// Why a variant left the catalog, or that it stays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcVerdict {
    Pass,
    /// No sample of the subset was observed.
    Unobserved,
    Missingness,
    AlleleFrequency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QcReport {
    pub examined: usize,
    pub unobserved: usize,
    pub geno_filtered: usize,
    pub maf_filtered: usize,
    pub retained: usize,
}

impl QcReport {
    pub fn dropped(&self) -> usize {
        self.unobserved + self.geno_filtered + self.maf_filtered
    }
}

/// Minor allele frequency over the observed samples, folded to at most 0.5.
pub fn folded_maf(counts: &GenotypeCounts) -> Option<f64> {
    let observed = counts.observed();
    if observed == 0 {
        return None;
    }
    let freq = (counts.het + 2 * counts.hom_alt) as f64 / (2.0 * observed as f64);
    Some(if freq > 0.5 { 1.0 - freq } else { freq })
}

/// Judges one variant. The missingness check is applied before the frequency check.
pub fn assess(counts: &GenotypeCounts, subset_len: usize, filter: &FilterConfig) -> QcVerdict {
    let Some(maf) = folded_maf(counts) else {
        return QcVerdict::Unobserved;
    };
    let missingness = counts.missing as f64 / subset_len as f64;
    if filter.geno.is_some_and(|geno| missingness > geno) {
        return QcVerdict::Missingness;
    }
    if filter.maf.is_some_and(|threshold| maf > threshold) {
        return QcVerdict::AlleleFrequency;
    }
    QcVerdict::Pass
}

/// Filters the catalog in place over the samples selected by `mask`.
pub fn filter_variants(
    catalog: &mut VariantCatalog,
    beds: &BedFileSet,
    mask: &SampleMask,
    filter: &FilterConfig,
) -> Result<QcReport> {
    let mut report = QcReport {
        examined: catalog.len(),
        ..QcReport::default()
    };
    let mut keep = Vec::with_capacity(catalog.len());
    let mut reader = BedRowReader::new(beds);

    for variant in catalog.variants() {
        let row = reader.read_row(variant.file, variant.record)?;
        let counts = decode_counts(row, mask);
        let verdict = assess(&counts, mask.len(), filter);
        match verdict {
            QcVerdict::Pass => {}
            QcVerdict::Unobserved => report.unobserved += 1,
            QcVerdict::Missingness => report.geno_filtered += 1,
            QcVerdict::AlleleFrequency => report.maf_filtered += 1,
        }
        keep.push(verdict == QcVerdict::Pass);
    }
    reader.close();

    if keep.iter().any(|kept| !kept) {
        let mut verdicts = keep.into_iter();
        catalog.retain_in_order(|_| verdicts.next().unwrap_or(false));
    }
    report.retained = catalog.len();

    if report.geno_filtered > 0 {
        info!(
            "{} variant(s) filtered based on genotype missingness",
            report.geno_filtered
        );
    }
    if report.maf_filtered > 0 {
        info!("{} variant(s) filtered based on MAF", report.maf_filtered);
    }
    info!("{} total variant(s) remained after filtering", report.retained);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;
    use crate::config::ChromosomeConfig;
    use crate::decode::pack_row;
    use crate::locate::GenotypeFileSet;
    use approx::assert_abs_diff_eq;
    use std::fs;

    fn counts(hom_ref: u32, het: u32, hom_alt: u32, missing: u32) -> GenotypeCounts {
        GenotypeCounts {
            hom_ref,
            het,
            hom_alt,
            missing,
        }
    }

    #[test]
    fn maf_is_folded_and_ignores_missing_calls() {
        assert_abs_diff_eq!(folded_maf(&counts(1, 1, 1, 1)).unwrap(), 0.5);
        assert_abs_diff_eq!(folded_maf(&counts(0, 1, 3, 0)).unwrap(), 0.125);
        assert_abs_diff_eq!(folded_maf(&counts(3, 1, 0, 5)).unwrap(), 0.125);
        assert_eq!(folded_maf(&counts(0, 0, 0, 4)), None);
    }

    #[test]
    fn missingness_takes_precedence_over_frequency() {
        let filter = FilterConfig {
            geno: Some(0.1),
            maf: Some(0.1),
            keep_ambiguous: false,
        };
        assert_eq!(assess(&counts(1, 1, 0, 2), 4, &filter), QcVerdict::Missingness);
        assert_eq!(
            assess(&counts(2, 2, 0, 0), 4, &filter),
            QcVerdict::AlleleFrequency
        );
        assert_eq!(assess(&counts(0, 0, 0, 4), 4, &filter), QcVerdict::Unobserved);
        assert_eq!(
            assess(&counts(0, 0, 0, 4), 4, &FilterConfig::default()),
            QcVerdict::Unobserved
        );
        assert_eq!(assess(&counts(4, 0, 0, 0), 4, &filter), QcVerdict::Pass);
    }

    #[test]
    fn filtering_compacts_in_order_and_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("qc");
        let calls: [[Option<u8>; 4]; 5] = [
            [Some(0), Some(0), Some(0), Some(0)],
            [Some(1), Some(1), Some(0), Some(2)],
            [None, None, None, None],
            [Some(0), Some(0), None, None],
            [Some(0), Some(0), Some(0), Some(1)],
        ];
        let mut bim = String::new();
        let mut bed = vec![0x6c, 0x1b, 0x01];
        for (i, row) in calls.iter().enumerate() {
            bim.push_str(&format!("1 rs{i} 0 {} A C\n", 100 * (i + 1)));
            bed.extend(pack_row(row));
        }
        fs::write(prefix.with_extension("bim"), bim).expect("write bim");
        fs::write(prefix.with_extension("bed"), bed).expect("write bed");

        let chromosomes = ChromosomeConfig::default();
        let files = GenotypeFileSet::locate(prefix.to_str().unwrap(), None, &chromosomes)?;
        let out = dir.path().join("out");
        let mut catalog = VariantCatalog::load(
            &files,
            CatalogOptions {
                chromosomes: &chromosomes,
                keep_ambiguous: false,
                selection: None,
                out_prefix: &out,
            },
        )?;
        let beds = BedFileSet::validate(&files, 4, catalog.file_variant_counts())?;
        let mask = SampleMask::all(4);
        let filter = FilterConfig {
            geno: Some(0.25),
            maf: Some(0.2),
            keep_ambiguous: false,
        };

        let first = filter_variants(&mut catalog, &beds, &mask, &filter)?;
        assert_eq!(first.unobserved, 1);
        assert_eq!(first.geno_filtered, 1);
        assert_eq!(first.maf_filtered, 1);
        let ids: Vec<&str> = catalog.variants().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["rs0", "rs4"]);
        assert_eq!(catalog.position_of("rs4"), Some(1));

        let second = filter_variants(&mut catalog, &beds, &mask, &filter)?;
        assert_eq!(second.dropped(), 0);
        assert_eq!(second.retained, 2);
        Ok(())
    }
}
