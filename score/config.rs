// ========================================================================================
//
//                               Run configuration
//
// ========================================================================================
//
// Every knob the genotype subsystem consults lives here. A run is described by a
// `RunConfig`, which can be read from a TOML file and then overridden from the command
// line. The smaller structs are what the individual components actually receive.

use crate::error::{GenotypeError, Result};
use crate::shared::files::{line_as_str, open_text_source};
use crate::types::{
    GeneticModel, GenomicRegion, MissingPolicy, SampleSelectionMode, SpecialChromosome,
    VariantSelectionMode,
};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The placeholder character expanded to each chromosome label in a fileset prefix.
pub const CHROMOSOME_PLACEHOLDER: char = '#';

/// The chromosome set of the dataset: how many autosomes there are and which of the
/// special chromosomes are switched on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromosomeConfig {
    pub num_autosomes: u8,
    pub include_x: bool,
    pub include_y: bool,
    pub include_xy: bool,
    pub include_mt: bool,
}

impl Default for ChromosomeConfig {
    fn default() -> Self {
        Self {
            num_autosomes: 22,
            include_x: true,
            include_y: true,
            include_xy: true,
            include_mt: true,
        }
    }
}

impl ChromosomeConfig {
    pub fn is_enabled(&self, special: SpecialChromosome) -> bool {
        match special {
            SpecialChromosome::X => self.include_x,
            SpecialChromosome::Y => self.include_y,
            SpecialChromosome::Xy => self.include_xy,
            SpecialChromosome::Mt => self.include_mt,
        }
    }

    /// The largest chromosome code enabled in this set.
    pub fn max_code(&self) -> u8 {
        SpecialChromosome::ALL
            .into_iter()
            .rev()
            .find(|special| self.is_enabled(*special))
            .map_or(self.num_autosomes, |special| {
                self.num_autosomes.saturating_add(special.offset())
            })
    }

    /// Chromosome labels, in the order their per-chromosome files are located.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = (1..=self.num_autosomes).map(|c| c.to_string()).collect();
        labels.extend(
            SpecialChromosome::ALL
                .into_iter()
                .filter(|special| self.is_enabled(*special))
                .map(|special| special.label().to_string()),
        );
        labels
    }

    fn validate(&self) -> Result<()> {
        if self.num_autosomes == 0 || self.num_autosomes > 95 {
            return Err(GenotypeError::config(format!(
                "num_autosomes must be between 1 and 95, got {}",
                self.num_autosomes
            )));
        }
        Ok(())
    }
}

/// Variant-level quality control thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Maximum tolerated genotype missingness rate.
    pub geno: Option<f64>,
    /// Minor allele frequency threshold.
    pub maf: Option<f64>,
    pub keep_ambiguous: bool,
}

impl FilterConfig {
    pub fn is_active(&self) -> bool {
        self.geno.is_some() || self.maf.is_some()
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [("geno", self.geno), ("maf", self.maf)] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(GenotypeError::config(format!(
                        "{name} threshold must lie in [0, 1], got {value}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub model: GeneticModel,
    pub missing: MissingPolicy,
}

/// Optional keep/remove sample lists and extract/exclude variant lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub keep: Option<PathBuf>,
    pub remove: Option<PathBuf>,
    pub extract: Option<PathBuf>,
    pub exclude: Option<PathBuf>,
}

/// A loaded sample list together with how it should be applied.
#[derive(Debug, Clone)]
pub struct SampleSelection {
    pub mode: SampleSelectionMode,
    pub ids: AHashSet<String>,
}

impl SampleSelection {
    /// Whether a sample with this identity key passes the selection.
    #[inline]
    pub fn admits(&self, key: &str) -> bool {
        let listed = self.ids.contains(key);
        match self.mode {
            SampleSelectionMode::Keep => listed,
            SampleSelectionMode::Remove => !listed,
        }
    }
}

/// A loaded variant list together with how it should be applied.
#[derive(Debug, Clone)]
pub struct VariantSelection {
    pub mode: VariantSelectionMode,
    pub ids: AHashSet<String>,
}

impl VariantSelection {
    #[inline]
    pub fn admits(&self, id: &str) -> bool {
        let listed = self.ids.contains(id);
        match self.mode {
            VariantSelectionMode::Extract => listed,
            VariantSelectionMode::Exclude => !listed,
        }
    }
}

impl SelectionConfig {
    pub fn load_samples(&self, ignore_fid: bool) -> Result<Option<SampleSelection>> {
        let (mode, path) = match (&self.keep, &self.remove) {
            (Some(_), Some(_)) => {
                return Err(GenotypeError::config(
                    "keep and remove sample lists cannot be combined",
                ));
            }
            (Some(keep), None) => (SampleSelectionMode::Keep, keep),
            (None, Some(remove)) => (SampleSelectionMode::Remove, remove),
            (None, None) => return Ok(None),
        };
        let ids = load_sample_list(path, ignore_fid)?;
        Ok(Some(SampleSelection { mode, ids }))
    }

    pub fn load_variants(&self) -> Result<Option<VariantSelection>> {
        let (mode, path) = match (&self.extract, &self.exclude) {
            (Some(_), Some(_)) => {
                return Err(GenotypeError::config(
                    "extract and exclude variant lists cannot be combined",
                ));
            }
            (Some(extract), None) => (VariantSelectionMode::Extract, extract),
            (None, Some(exclude)) => (VariantSelectionMode::Exclude, exclude),
            (None, None) => return Ok(None),
        };
        let ids = load_variant_list(path)?;
        Ok(Some(VariantSelection { mode, ids }))
    }
}

/// The identity key of a sample: the individual ID alone, or `FID_IID`.
#[inline]
pub fn sample_key(family_id: &str, individual_id: &str, ignore_fid: bool) -> String {
    if ignore_fid {
        individual_id.to_string()
    } else {
        format!("{family_id}_{individual_id}")
    }
}

/// Reads a keep/remove list. With `ignore_fid` the first column is the key; otherwise
/// the first two columns form an `FID_IID` key.
pub fn load_sample_list(path: &Path, ignore_fid: bool) -> Result<AHashSet<String>> {
    let mut reader = open_text_source(path)?;
    let mut ids = AHashSet::new();
    let mut line_number = 0usize;
    while let Some(raw) = reader.next_line()? {
        line_number += 1;
        let line = line_as_str(path, line_number, raw)?;
        let mut fields = line.split_whitespace();
        let Some(first) = fields.next() else {
            continue;
        };
        if ignore_fid {
            ids.insert(first.to_string());
            continue;
        }
        let second = fields.next().ok_or_else(|| {
            GenotypeError::malformed(
                path,
                Some(line_number),
                "expected FID and IID columns (or run with ignore_fid)",
            )
        })?;
        ids.insert(sample_key(first, second, false));
    }
    Ok(ids)
}

/// Reads an extract/exclude list: the first column of every non-blank line.
pub fn load_variant_list(path: &Path) -> Result<AHashSet<String>> {
    let mut reader = open_text_source(path)?;
    let mut ids = AHashSet::new();
    let mut line_number = 0usize;
    while let Some(raw) = reader.next_line()? {
        line_number += 1;
        let line = line_as_str(path, line_number, raw)?;
        if let Some(id) = line.split_whitespace().next() {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Everything one scoring run needs. Deserializes from TOML with defaults for every
/// field that is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fileset prefix, optionally containing `#` and optionally followed by `,famfile`.
    pub genotype: Option<String>,
    pub fam: Option<PathBuf>,
    pub out: PathBuf,
    pub weights: Option<PathBuf>,
    pub regions: Vec<String>,
    pub ignore_fid: bool,
    pub nonfounders: bool,
    pub threads: usize,
    pub chromosomes: ChromosomeConfig,
    pub filter: FilterConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            genotype: None,
            fam: None,
            out: PathBuf::from("plinkscore"),
            weights: None,
            regions: Vec::new(),
            ignore_fid: false,
            nonfounders: false,
            threads: num_cpus::get(),
            chromosomes: ChromosomeConfig::default(),
            filter: FilterConfig::default(),
            scoring: ScoringConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

impl RunConfig {
    /// Loads a run configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let toml_string = fs::read_to_string(path).map_err(|e| GenotypeError::io(path, e))?;
        let config: RunConfig = toml::from_str(&toml_string)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chromosomes.validate()?;
        self.filter.validate()?;
        if self.threads == 0 {
            return Err(GenotypeError::config("threads must be at least 1"));
        }
        if self.regions.len() > 63 {
            return Err(GenotypeError::config(format!(
                "at most 63 regions are supported, got {}",
                self.regions.len()
            )));
        }
        Ok(())
    }

    /// Parses the configured regions. Region `k` of the list becomes region index `k+1`;
    /// index 0 is always the whole genome.
    pub fn parsed_regions(&self) -> Result<Vec<GenomicRegion>> {
        self.regions
            .iter()
            .map(|text| {
                GenomicRegion::parse(text, self.chromosomes.num_autosomes)
                    .map_err(GenotypeError::Configuration)
            })
            .collect()
    }
}
