// ========================================================================================
//
//                                 The variant catalog
//
// ========================================================================================
//
// Streams every located `.bim` file in order and materializes the retained variants
// into one ordered sequence plus an id -> position map. The map is the exact inverse of
// the sequence after every structural change; `retain_in_order` is the only mutation
// that reshapes the sequence and it always rebuilds the map.

use crate::config::{ChromosomeConfig, VariantSelection};
use crate::error::{GenotypeError, Result};
use crate::locate::GenotypeFileSet;
use crate::shared::files::{line_as_str, open_text_source, with_suffix};
use crate::types::{
    BimRowIndex, FileIndex, Variant, is_ambiguous, parse_chromosome_label, special_chromosome,
};
use ahash::{AHashMap, AHashSet};
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// The largest total number of `.bim` rows a run may carry.
pub const MAX_UNFILTERED_VARIANTS: u64 = 2_147_483_645;

/// Counts gathered while building the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogTally {
    /// Every non-blank `.bim` row across all files.
    pub unfiltered: u64,
    /// Rows rejected by the extract/exclude list.
    pub deselected: u64,
    /// Rows on chromosomes beyond the configured maximum code.
    pub over_max_chromosome: u64,
    /// Rows on sex or haploid chromosomes.
    pub sex_or_haploid: u64,
    /// Ambiguous rows seen, whether or not they were kept.
    pub ambiguous: u64,
    pub duplicates: u64,
}

/// How the catalog decides which rows are materialized.
#[derive(Debug, Clone, Copy)]
pub struct CatalogOptions<'a> {
    pub chromosomes: &'a ChromosomeConfig,
    pub keep_ambiguous: bool,
    pub selection: Option<&'a VariantSelection>,
    /// Prefix of the remediation file written when duplicate ids are found.
    pub out_prefix: &'a Path,
}

#[derive(Debug)]
pub struct VariantCatalog {
    variants: Vec<Variant>,
    index: AHashMap<String, usize>,
    file_variant_counts: Vec<u64>,
    tally: CatalogTally,
}

/// A chromosome as seen in the clustering check. Unparseable labels are tracked by text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChromosomeKey {
    Code(u8),
    Label(String),
}

/// What to do with the rows of the current chromosome block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockAction {
    Keep(u8),
    SkipOverMax,
    SkipSexOrHaploid,
}

/// Per-build state for the chromosome clustering check and the once-only warnings.
struct ChromosomeTracker<'a> {
    chromosomes: &'a ChromosomeConfig,
    max_code: u8,
    seen: AHashSet<ChromosomeKey>,
    current: Option<(ChromosomeKey, BlockAction)>,
    warned_over_max: bool,
    warned_sex: bool,
}

impl<'a> ChromosomeTracker<'a> {
    fn new(chromosomes: &'a ChromosomeConfig) -> Self {
        Self {
            chromosomes,
            max_code: chromosomes.max_code(),
            seen: AHashSet::new(),
            current: None,
            warned_over_max: false,
            warned_sex: false,
        }
    }

    /// Resolves the action for a row on `label`, checking clustering on transitions.
    fn observe(&mut self, label: &str, path: &Path) -> Result<BlockAction> {
        let code = parse_chromosome_label(label, self.chromosomes.num_autosomes);
        let key = match code {
            Some(code) => ChromosomeKey::Code(code),
            None => ChromosomeKey::Label(label.to_string()),
        };

        if let Some((current_key, action)) = &self.current {
            if *current_key == key {
                return Ok(*action);
            }
        }

        if !self.seen.insert(key.clone()) {
            return Err(GenotypeError::Ordering {
                path: path.display().to_string(),
                chromosome: label.to_string(),
            });
        }

        let (action, over_max, sex_or_haploid) = self.classify(code);
        if over_max && !self.warned_over_max {
            warn!(
                "Variants with chromosome codes larger than {} will be ignored",
                self.max_code
            );
            self.warned_over_max = true;
        }
        if sex_or_haploid && !self.warned_sex {
            warn!("Haploid and sex chromosomes are not supported; their variants will be ignored");
            self.warned_sex = true;
        }
        self.current = Some((key, action));
        Ok(action)
    }

    /// Returns the block action along with which skip conditions hold. A configured-off
    /// special chromosome can exceed the maximum code as well.
    fn classify(&self, code: Option<u8>) -> (BlockAction, bool, bool) {
        let over_max = code.is_none_or(|code| code > self.max_code);
        let sex_or_haploid = code
            .and_then(|code| special_chromosome(code, self.chromosomes.num_autosomes))
            .is_some_and(|special| {
                special.is_sex_or_haploid() || !self.chromosomes.is_enabled(special)
            });

        let action = match code {
            _ if sex_or_haploid => BlockAction::SkipSexOrHaploid,
            Some(code) if !over_max => BlockAction::Keep(code),
            _ => BlockAction::SkipOverMax,
        };
        (action, over_max, sex_or_haploid)
    }
}

impl VariantCatalog {
    pub fn load(files: &GenotypeFileSet, options: CatalogOptions<'_>) -> Result<Self> {
        let mut variants: Vec<Variant> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut duplicates: AHashSet<String> = AHashSet::new();
        let mut file_variant_counts = vec![0u64; files.len()];
        let mut tally = CatalogTally::default();
        let mut tracker = ChromosomeTracker::new(options.chromosomes);

        for (file_idx, file_count) in file_variant_counts.iter_mut().enumerate() {
            let path = files.bim_path(file_idx);
            let mut reader = open_text_source(&path)?;
            let mut line_number = 0usize;

            while let Some(raw) = reader.next_line()? {
                line_number += 1;
                let line = line_as_str(&path, line_number, raw)?.trim();
                if line.is_empty() {
                    continue;
                }
                let record = BimRowIndex(*file_count);
                *file_count += 1;
                tally.unfiltered += 1;

                let mut fields = line.split_whitespace();
                let (Some(chr), Some(id), Some(_cm), Some(pos), Some(a1), Some(a2)) = (
                    fields.next(),
                    fields.next(),
                    fields.next(),
                    fields.next(),
                    fields.next(),
                    fields.next(),
                ) else {
                    return Err(GenotypeError::malformed(
                        &path,
                        Some(line_number),
                        "expected at least 6 whitespace-delimited columns",
                    ));
                };

                if let Some(selection) = options.selection {
                    if !selection.admits(id) {
                        tally.deselected += 1;
                        continue;
                    }
                }

                let chromosome = match tracker.observe(chr, &path)? {
                    BlockAction::Keep(code) => code,
                    BlockAction::SkipOverMax => {
                        tally.over_max_chromosome += 1;
                        continue;
                    }
                    BlockAction::SkipSexOrHaploid => {
                        tally.sex_or_haploid += 1;
                        continue;
                    }
                };

                let position = parse_position(pos).ok_or_else(|| {
                    GenotypeError::malformed(
                        &path,
                        Some(line_number),
                        format!("variant {id} has an invalid base-pair position '{pos}'"),
                    )
                })?;

                if index.contains_key(id) {
                    duplicates.insert(id.to_string());
                    tally.duplicates += 1;
                    continue;
                }

                let allele1 = a1.to_ascii_uppercase();
                let allele2 = a2.to_ascii_uppercase();
                if is_ambiguous(&allele1, &allele2) {
                    tally.ambiguous += 1;
                    if !options.keep_ambiguous {
                        continue;
                    }
                }

                index.insert(id.to_string(), variants.len());
                variants.push(Variant {
                    id: id.to_string(),
                    chromosome,
                    position,
                    allele1,
                    allele2,
                    file: FileIndex(file_idx as u32),
                    record,
                    statistic: 0.0,
                    flipped: false,
                    region_mask: 0,
                    valid: true,
                });
            }
        }

        if !duplicates.is_empty() {
            let remediation = with_suffix(options.out_prefix, "valid");
            write_remediation(&remediation, &variants, &duplicates)?;
            return Err(GenotypeError::DuplicateVariant {
                count: duplicates.len(),
                remediation,
            });
        }
        if tally.unfiltered > MAX_UNFILTERED_VARIANTS {
            return Err(GenotypeError::LimitExceeded {
                count: tally.unfiltered,
            });
        }

        let catalog = Self {
            variants,
            index,
            file_variant_counts,
            tally,
        };
        catalog.report(options.keep_ambiguous);
        Ok(catalog)
    }

    fn report(&self, keep_ambiguous: bool) {
        let t = &self.tally;
        if t.ambiguous > 0 {
            if keep_ambiguous {
                info!("{} ambiguous variant(s) kept", t.ambiguous);
            } else {
                info!("{} ambiguous variant(s) excluded", t.ambiguous);
            }
        }
        info!(
            "{} variant(s) included out of {} observed",
            self.variants.len(),
            t.unfiltered
        );
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variants_mut(&mut self) -> &mut [Variant] {
        &mut self.variants
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Variant> {
        let position = *self.index.get(id)?;
        self.variants.get_mut(position)
    }

    /// Number of rows in each located `.bim` file, in file order.
    pub fn file_variant_counts(&self) -> &[u64] {
        &self.file_variant_counts
    }

    pub fn unfiltered_len(&self) -> u64 {
        self.tally.unfiltered
    }

    pub fn tally(&self) -> &CatalogTally {
        &self.tally
    }

    /// Keeps the variants for which `keep` returns true, preserving their relative order,
    /// and rebuilds the id map. Returns the number of variants dropped.
    pub fn retain_in_order(&mut self, mut keep: impl FnMut(&Variant) -> bool) -> usize {
        let before = self.variants.len();
        self.variants.retain(|variant| keep(variant));
        self.rebuild_index();
        before - self.variants.len()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.index.reserve(self.variants.len());
        for (position, variant) in self.variants.iter().enumerate() {
            self.index.insert(variant.id.clone(), position);
        }
    }
}

/// Positions are non-negative integers; a leading `-` or any non-digit is rejected.
fn parse_position(token: &str) -> Option<u32> {
    token.parse::<i64>().ok().and_then(|pos| u32::try_from(pos).ok())
}

fn write_remediation(
    path: &Path,
    variants: &[Variant],
    duplicates: &AHashSet<String>,
) -> Result<()> {
    let file = File::create(path).map_err(|e| GenotypeError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for variant in variants.iter().filter(|v| !duplicates.contains(&v.id)) {
        writeln!(writer, "{}", variant.id).map_err(|e| GenotypeError::io(path, e))?;
    }
    writer.flush().map_err(|e| GenotypeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VariantSelectionMode;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        dir: tempfile::TempDir,
        out: PathBuf,
        chromosomes: ChromosomeConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let out = dir.path().join("run");
            Self {
                dir,
                out,
                chromosomes: ChromosomeConfig::default(),
            }
        }

        fn fileset(&self, bims: &[&str]) -> GenotypeFileSet {
            for (i, contents) in bims.iter().enumerate() {
                let prefix = self.dir.path().join(format!("part{}", i + 1));
                fs::write(with_suffix(&prefix, "bim"), contents).expect("write bim");
                fs::write(with_suffix(&prefix, "bed"), b"").expect("write bed");
            }
            let template = self.dir.path().join("part#");
            let chromosomes = ChromosomeConfig {
                num_autosomes: bims.len() as u8,
                ..ChromosomeConfig::default()
            };
            GenotypeFileSet::locate(template.to_str().unwrap(), None, &chromosomes)
                .expect("locate")
        }

        fn options(&self) -> CatalogOptions<'_> {
            CatalogOptions {
                chromosomes: &self.chromosomes,
                keep_ambiguous: false,
                selection: None,
                out_prefix: &self.out,
            }
        }
    }

    fn assert_bijection(catalog: &VariantCatalog) {
        assert_eq!(catalog.index.len(), catalog.variants.len());
        for (position, variant) in catalog.variants().iter().enumerate() {
            assert_eq!(catalog.position_of(&variant.id), Some(position));
        }
    }

    #[test]
    fn clustered_chromosomes_are_accepted() -> Result<()> {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 a c\n1 rs2 0 200 G T\n2 rs3 0 50 A G\n"]);
        let catalog = VariantCatalog::load(&files, fixture.options())?;

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.variants()[0].allele1, "A");
        assert_eq!(catalog.variants()[2].chromosome, 2);
        assert_eq!(catalog.variants()[2].record, BimRowIndex(2));
        assert_eq!(catalog.file_variant_counts(), &[3]);
        assert_bijection(&catalog);
        Ok(())
    }

    #[test]
    fn reappearing_chromosome_is_an_ordering_error() {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A C\n2 rs2 0 200 G T\n1 rs3 0 50 A G\n"]);
        let result = VariantCatalog::load(&files, fixture.options());
        match result {
            Err(GenotypeError::Ordering { chromosome, .. }) => assert_eq!(chromosome, "1"),
            other => panic!("expected ordering error, got {other:?}"),
        }
    }

    #[test]
    fn ordering_is_checked_across_files() {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A C\n2 rs2 0 200 G T\n", "1 rs3 0 300 A G\n"]);
        match VariantCatalog::load(&files, fixture.options()) {
            Err(GenotypeError::Ordering { path, chromosome }) => {
                assert_eq!(chromosome, "1");
                assert!(path.ends_with("part2.bim"), "{path}");
            }
            other => panic!("expected ordering error, got {other:?}"),
        }
    }

    #[test]
    fn chromosome_continuing_into_the_next_file_is_accepted() -> Result<()> {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A C\n", "1 rs2 0 200 G T\n2 rs3 0 50 A G\n"]);
        let catalog = VariantCatalog::load(&files, fixture.options())?;

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.file_variant_counts(), &[1, 2]);
        assert_eq!(catalog.variants()[1].record, BimRowIndex(0));
        Ok(())
    }

    #[test]
    fn unplaced_chromosome_zero_is_kept() -> Result<()> {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["0 rs0 0 100 A C\n1 rs1 0 100 A C\n"]);
        let catalog = VariantCatalog::load(&files, fixture.options())?;

        let ids: Vec<&str> = catalog.variants().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["rs0", "rs1"]);
        assert_eq!(catalog.variants()[0].chromosome, 0);
        assert_eq!(catalog.tally().over_max_chromosome, 0);
        Ok(())
    }

    #[test]
    fn disabled_special_chromosome_above_the_maximum_raises_both_warnings() -> Result<()> {
        let chromosomes = ChromosomeConfig {
            num_autosomes: 2,
            include_mt: false,
            ..ChromosomeConfig::default()
        };
        let mut tracker = ChromosomeTracker::new(&chromosomes);
        let path = Path::new("cohort.bim");

        assert_eq!(tracker.observe("1", path)?, BlockAction::Keep(1));
        assert!(!tracker.warned_over_max && !tracker.warned_sex);

        assert_eq!(tracker.observe("MT", path)?, BlockAction::SkipSexOrHaploid);
        assert!(tracker.warned_over_max);
        assert!(tracker.warned_sex);
        Ok(())
    }

    #[test]
    fn ambiguous_variants_are_counted_and_kept_on_request() -> Result<()> {
        let fixture = Fixture::new();
        let bim = "1 rs1 0 100 A T\n1 rs2 0 200 C G\n1 rs3 0 300 A C\n";
        let files = fixture.fileset(&[bim]);

        let dropped = VariantCatalog::load(&files, fixture.options())?;
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped.tally().ambiguous, 2);
        // Excluded rows still occupy their row in the .bed file.
        assert_eq!(dropped.variants()[0].record, BimRowIndex(2));

        let kept = VariantCatalog::load(
            &files,
            CatalogOptions {
                keep_ambiguous: true,
                ..fixture.options()
            },
        )?;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.tally().ambiguous, 2);
        Ok(())
    }

    #[test]
    fn deselected_rows_advance_the_record_index() -> Result<()> {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A C\n\n1 rs2 0 200 G T\n1 rs3 0 300 A G\n"]);
        let selection = VariantSelection {
            mode: VariantSelectionMode::Extract,
            ids: ["rs3".to_string()].into_iter().collect(),
        };
        let catalog = VariantCatalog::load(
            &files,
            CatalogOptions {
                selection: Some(&selection),
                ..fixture.options()
            },
        )?;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.variants()[0].record, BimRowIndex(2));
        assert_eq!(catalog.tally().deselected, 2);
        assert_eq!(catalog.unfiltered_len(), 3);
        Ok(())
    }

    #[test]
    fn sex_and_over_max_chromosomes_are_skipped_independently() -> Result<()> {
        let mut fixture = Fixture::new();
        fixture.chromosomes = ChromosomeConfig {
            num_autosomes: 2,
            include_x: true,
            include_y: true,
            include_xy: true,
            include_mt: false,
        };
        let bim = "\
1 rs1 0 100 A C
X rs2 0 200 G T
X rs3 0 300 G T
XY rs4 0 400 A G
9 rs5 0 500 A G
9 rs6 0 600 A G
2 rs7 0 700 A G
";
        let prefix = fixture.dir.path().join("all");
        fs::write(with_suffix(&prefix, "bim"), bim).expect("write bim");
        let files = GenotypeFileSet::locate(
            prefix.to_str().unwrap(),
            None,
            &fixture.chromosomes,
        )?;
        let catalog = VariantCatalog::load(&files, fixture.options())?;

        let ids: Vec<&str> = catalog.variants().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["rs1", "rs4", "rs7"]);
        assert_eq!(catalog.tally().sex_or_haploid, 2);
        assert_eq!(catalog.tally().over_max_chromosome, 2);
        assert_eq!(catalog.variants()[2].record, BimRowIndex(6));
        Ok(())
    }

    #[test]
    fn negative_position_is_malformed() {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A C\n1 rs2 0 -5 G T\n"]);
        match VariantCatalog::load(&files, fixture.options()) {
            Err(GenotypeError::MalformedInput { line, .. }) => assert_eq!(line, Some(2)),
            other => panic!("expected malformed input, got {other:?}"),
        }
    }

    #[test]
    fn short_row_is_malformed() {
        let fixture = Fixture::new();
        let files = fixture.fileset(&["1 rs1 0 100 A\n"]);
        assert!(matches!(
            VariantCatalog::load(&files, fixture.options()),
            Err(GenotypeError::MalformedInput { .. })
        ));
    }

    #[test]
    fn duplicates_across_files_write_a_remediation_list() {
        let fixture = Fixture::new();
        let files = fixture.fileset(&[
            "1 rs1 0 100 A C\n1 rs2 0 200 G T\n",
            "2 rs2 0 300 A G\n2 rs3 0 400 A G\n",
        ]);
        let result = VariantCatalog::load(&files, fixture.options());

        match result {
            Err(GenotypeError::DuplicateVariant { count, remediation }) => {
                assert_eq!(count, 1);
                assert_eq!(remediation, with_suffix(&fixture.out, "valid"));
                let listed = fs::read_to_string(&remediation).expect("read remediation");
                assert_eq!(listed.lines().collect::<Vec<_>>(), vec!["rs1", "rs3"]);
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn retain_keeps_order_and_the_index_bijective() -> Result<()> {
        let fixture = Fixture::new();
        let files = fixture.fileset(&[
            "1 rs1 0 100 A C\n1 rs2 0 200 A C\n1 rs3 0 300 A C\n1 rs4 0 400 A C\n",
        ]);
        let mut catalog = VariantCatalog::load(&files, fixture.options())?;
        let dropped = catalog.retain_in_order(|v| v.id != "rs2");

        assert_eq!(dropped, 1);
        let ids: Vec<&str> = catalog.variants().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["rs1", "rs3", "rs4"]);
        assert_eq!(catalog.position_of("rs2"), None);
        assert_bijection(&catalog);

        catalog.get_mut("rs4").expect("rs4 retained").statistic = 0.5;
        assert_eq!(catalog.variants()[2].statistic, 0.5);
        Ok(())
    }
}
