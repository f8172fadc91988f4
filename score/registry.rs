// ========================================================================================
//
//                                 The sample registry
//
// ========================================================================================
//
// Parses the pedigree (.fam) file once and fixes the sample universe for the whole run:
// its size sizes every packed genotype row, and its inclusion mask is the subset every
// decode is restricted to. The file is streamed a single time; founder status is decided
// afterwards, once every family/individual composite key has been seen.

use crate::config::{SampleSelection, sample_key};
use crate::decode::SampleMask;
use crate::error::{GenotypeError, Result};
use crate::shared::files::{line_as_str, open_text_source};
use crate::types::{Sample, Sex};
use ahash::AHashSet;
use log::info;
use std::path::Path;

/// Running totals gathered while building the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTally {
    pub total: usize,
    pub male: usize,
    pub female: usize,
    pub ambiguous_sex: usize,
    pub founders: usize,
    /// Non-founders that passed the selection list and were kept.
    pub nonfounders_retained: usize,
    /// Non-founders that passed the selection list but were dropped.
    pub nonfounders_dropped: usize,
    /// Samples rejected by the keep/remove list.
    pub deselected: usize,
}

impl SampleTally {
    pub fn included(&self) -> usize {
        self.founders + self.nonfounders_retained
    }

    pub fn excluded(&self) -> usize {
        self.nonfounders_dropped + self.deselected
    }
}

/// How the registry decides which rows are included.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions<'a> {
    pub ignore_fid: bool,
    pub keep_nonfounders: bool,
    pub selection: Option<&'a SampleSelection>,
}

#[derive(Debug)]
pub struct SampleRegistry {
    samples: Vec<Sample>,
    inclusion: SampleMask,
    tally: SampleTally,
}

/// The raw columns of a pedigree row that matter after the first pass.
struct PedigreeRow {
    family_id: String,
    individual_id: String,
    father_id: String,
    mother_id: String,
    sex: Sex,
    phenotype: String,
}

impl SampleRegistry {
    pub fn load(path: &Path, options: RegistryOptions<'_>) -> Result<Self> {
        let mut reader = open_text_source(path)?;
        let mut rows = Vec::new();
        let mut composite_keys = AHashSet::new();
        let mut line_number = 0usize;

        while let Some(raw) = reader.next_line()? {
            line_number += 1;
            let line = line_as_str(path, line_number, raw)?.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(fid), Some(iid), Some(father), Some(mother), Some(sex), Some(phenotype)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                return Err(GenotypeError::malformed(
                    path,
                    Some(line_number),
                    "expected at least 6 whitespace-delimited columns",
                ));
            };
            composite_keys.insert(format!("{fid}_{iid}"));
            rows.push(PedigreeRow {
                family_id: fid.to_string(),
                individual_id: iid.to_string(),
                father_id: father.to_string(),
                mother_id: mother.to_string(),
                sex: Sex::from_code(sex),
                phenotype: phenotype.to_string(),
            });
        }

        if rows.is_empty() {
            return Err(GenotypeError::malformed(
                path,
                None,
                "no samples found in pedigree file",
            ));
        }

        let registry = Self::resolve(rows, &composite_keys, options);
        registry.report();
        Ok(registry)
    }

    fn resolve(
        rows: Vec<PedigreeRow>,
        composite_keys: &AHashSet<String>,
        options: RegistryOptions<'_>,
    ) -> Self {
        let mut tally = SampleTally {
            total: rows.len(),
            ..SampleTally::default()
        };
        let mut samples = Vec::with_capacity(rows.len());

        for row in rows {
            let key = sample_key(&row.family_id, &row.individual_id, options.ignore_fid);
            let selected = options
                .selection
                .is_none_or(|selection| selection.admits(&key));

            // Parents are looked up by their raw ID token against `FID_IID` keys.
            let parents_absent = !composite_keys.contains(&row.father_id)
                && !composite_keys.contains(&row.mother_id);

            let (included, founder) = match (selected, parents_absent) {
                (false, _) => {
                    tally.deselected += 1;
                    (false, false)
                }
                (true, true) => {
                    tally.founders += 1;
                    (true, true)
                }
                (true, false) if options.keep_nonfounders => {
                    tally.nonfounders_retained += 1;
                    (true, false)
                }
                (true, false) => {
                    tally.nonfounders_dropped += 1;
                    (false, false)
                }
            };

            match row.sex {
                Sex::Male => tally.male += 1,
                Sex::Female => tally.female += 1,
                Sex::Ambiguous => tally.ambiguous_sex += 1,
            }

            samples.push(Sample {
                family_id: row.family_id,
                individual_id: row.individual_id,
                phenotype: row.phenotype,
                sex: row.sex,
                included,
                founder,
            });
        }

        let inclusion = SampleMask::from_flags(samples.iter().map(|s| s.included));
        Self {
            samples,
            inclusion,
            tally,
        }
    }

    fn report(&self) {
        let t = &self.tally;
        info!(
            "{} people ({} male(s), {} female(s), {} ambiguous) observed",
            t.total, t.male, t.female, t.ambiguous_sex
        );
        info!("{} founder(s) included", t.founders);
        if t.nonfounders_retained > 0 {
            info!("{} non-founder(s) retained", t.nonfounders_retained);
        }
        if t.nonfounders_dropped > 0 {
            info!(
                "{} non-founder(s) excluded (enable non-founder retention to keep them)",
                t.nonfounders_dropped
            );
        }
    }

    /// Size of the unfiltered sample universe; every packed row covers this many samples.
    pub fn unfiltered_len(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn inclusion(&self) -> &SampleMask {
        &self.inclusion
    }

    pub fn tally(&self) -> &SampleTally {
        &self.tally
    }

    /// The included samples, in pedigree order. Position `k` of this iterator is the
    /// subset-relative index `k` used by the decoder and the scoring engine.
    pub fn included_samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|sample| sample.included)
    }
}
