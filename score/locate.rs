// ========================================================================================
//                               Genotype file locator
// ========================================================================================
//
// Expands a fileset prefix into the ordered list of per-chromosome filesets that exist
// on disk, and decides which pedigree file describes their samples.

use crate::config::{CHROMOSOME_PLACEHOLDER, ChromosomeConfig};
use crate::error::{GenotypeError, Result};
use crate::shared::files::with_suffix;
use log::info;
use std::path::{Path, PathBuf};

/// The located filesets. Every entry shares the sample universe of `fam`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeFileSet {
    prefixes: Vec<PathBuf>,
    fam: PathBuf,
}

impl GenotypeFileSet {
    /// Locates filesets for `prefix`. The prefix may carry an external sample file as
    /// `prefix,famfile`; an explicit `fam` argument takes precedence over both.
    pub fn locate(
        prefix: &str,
        fam: Option<&Path>,
        chromosomes: &ChromosomeConfig,
    ) -> Result<Self> {
        let (bfile_prefix, embedded_fam) = match prefix.split_once(',') {
            Some((bfile, fam)) => (bfile.trim(), Some(PathBuf::from(fam.trim()))),
            None => (prefix.trim(), None),
        };

        let prefixes: Vec<PathBuf> = if bfile_prefix.contains(CHROMOSOME_PLACEHOLDER) {
            chromosomes
                .labels()
                .iter()
                .map(|label| {
                    PathBuf::from(bfile_prefix.replace(CHROMOSOME_PLACEHOLDER, label))
                })
                .filter(|candidate| with_suffix(candidate, "bed").is_file())
                .collect()
        } else if bfile_prefix.is_empty() {
            Vec::new()
        } else {
            vec![PathBuf::from(bfile_prefix)]
        };

        let Some(first) = prefixes.first() else {
            return Err(GenotypeError::config(format!(
                "no genotype files were found for prefix '{bfile_prefix}'"
            )));
        };

        let fam = fam
            .map(Path::to_path_buf)
            .or(embedded_fam)
            .unwrap_or_else(|| with_suffix(first, "fam"));

        info!(
            "Located {} genotype fileset(s); samples read from {}",
            prefixes.len(),
            fam.display()
        );
        Ok(Self { prefixes, fam })
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    pub fn fam_path(&self) -> &Path {
        &self.fam
    }

    pub fn bim_path(&self, file: usize) -> PathBuf {
        with_suffix(&self.prefixes[file], "bim")
    }

    pub fn bed_path(&self, file: usize) -> PathBuf {
        with_suffix(&self.prefixes[file], "bed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_fileset(dir: &Path, prefix: &str) {
        for ext in ["bed", "bim", "fam"] {
            fs::write(dir.join(format!("{prefix}.{ext}")), b"").expect("touch");
        }
    }

    #[test]
    fn placeholder_expands_to_existing_chromosomes_in_order() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        touch_fileset(dir.path(), "cohort_chr2");
        touch_fileset(dir.path(), "cohort_chr10");
        touch_fileset(dir.path(), "cohort_chrX");

        let prefix = dir.path().join("cohort_chr#");
        let set = GenotypeFileSet::locate(
            prefix.to_str().expect("utf8 path"),
            None,
            &ChromosomeConfig::default(),
        )?;

        let names: Vec<String> = set
            .prefixes()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cohort_chr2", "cohort_chr10", "cohort_chrX"]);
        assert_eq!(set.fam_path(), dir.path().join("cohort_chr2.fam"));
        Ok(())
    }

    #[test]
    fn disabled_chromosomes_are_not_located() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        touch_fileset(dir.path(), "c1");
        touch_fileset(dir.path(), "cX");
        let chromosomes = ChromosomeConfig {
            include_x: false,
            ..ChromosomeConfig::default()
        };
        let prefix = dir.path().join("c#");
        let set = GenotypeFileSet::locate(prefix.to_str().unwrap(), None, &chromosomes)?;
        assert_eq!(set.len(), 1);
        Ok(())
    }

    #[test]
    fn prefix_without_placeholder_is_a_single_fileset() -> Result<()> {
        let set = GenotypeFileSet::locate("data/cohort", None, &ChromosomeConfig::default())?;
        assert_eq!(set.prefixes(), &[PathBuf::from("data/cohort")]);
        assert_eq!(set.bed_path(0), PathBuf::from("data/cohort.bed"));
        assert_eq!(set.fam_path(), Path::new("data/cohort.fam"));
        Ok(())
    }

    #[test]
    fn external_sample_file_overrides_the_default() -> Result<()> {
        let set = GenotypeFileSet::locate(
            "data/cohort,meta/samples.fam",
            None,
            &ChromosomeConfig::default(),
        )?;
        assert_eq!(set.fam_path(), Path::new("meta/samples.fam"));

        let set = GenotypeFileSet::locate(
            "data/cohort,meta/samples.fam",
            Some(Path::new("explicit.fam")),
            &ChromosomeConfig::default(),
        )?;
        assert_eq!(set.fam_path(), Path::new("explicit.fam"));
        Ok(())
    }

    #[test]
    fn no_located_files_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("missing_chr#");
        let result = GenotypeFileSet::locate(
            prefix.to_str().unwrap(),
            None,
            &ChromosomeConfig::default(),
        );
        assert!(matches!(result, Err(GenotypeError::Configuration(_))));
    }
}
