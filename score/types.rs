// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Types used by more than one module. Module-local types stay in their module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========================================================================================
//                              Chromosome codes & regions
// ========================================================================================

/// The non-autosomal chromosomes a human fileset may carry. Their integer codes are
/// placed directly after the configured autosomes, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialChromosome {
    X,
    Y,
    Xy,
    Mt,
}

impl SpecialChromosome {
    pub const ALL: [SpecialChromosome; 4] = [Self::X, Self::Y, Self::Xy, Self::Mt];

    #[inline]
    pub fn offset(self) -> u8 {
        match self {
            Self::X => 1,
            Self::Y => 2,
            Self::Xy => 3,
            Self::Mt => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Xy => "XY",
            Self::Mt => "MT",
        }
    }

    /// Sex and haploid chromosomes have no diploid dosage model in this engine.
    #[inline]
    pub fn is_sex_or_haploid(self) -> bool {
        !matches!(self, Self::Xy)
    }
}

/// Resolves a textual chromosome label to an integer code, given the number of
/// autosomes. `X`, `Y`, `XY` and `MT` map to `N+1..=N+4`; the legacy numeric codes
/// 23-26 are accepted for them when `N` is 22. `0` is the unplaced code. Returns `None`
/// for anything else.
pub fn parse_chromosome_label(chr_str: &str, num_autosomes: u8) -> Option<u8> {
    let mut trimmed = chr_str.trim();

    if trimmed.len() >= 3 && trimmed[..3].eq_ignore_ascii_case("chr") {
        trimmed = &trimmed[3..];
    }

    for special in SpecialChromosome::ALL {
        if trimmed.eq_ignore_ascii_case(special.label()) {
            return Some(num_autosomes.saturating_add(special.offset()));
        }
    }
    if trimmed.eq_ignore_ascii_case("M") {
        return Some(num_autosomes.saturating_add(SpecialChromosome::Mt.offset()));
    }

    // Codes beyond the last special chromosome are passed through so the caller can
    // report them as exceeding the configured maximum.
    trimmed.parse::<u8>().ok()
}

/// Classifies a code as one of the special chromosomes, if it is one.
#[inline]
pub fn special_chromosome(code: u8, num_autosomes: u8) -> Option<SpecialChromosome> {
    SpecialChromosome::ALL
        .into_iter()
        .find(|special| num_autosomes.checked_add(special.offset()) == Some(code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenomicRegion {
    pub chromosome: u8,
    pub start: u32,
    pub end: u32,
}

impl GenomicRegion {
    #[inline]
    pub fn contains(&self, key: (u8, u32)) -> bool {
        key.0 == self.chromosome && key.1 >= self.start && key.1 <= self.end
    }

    /// Parses `chr1:100-200` (the `chr` prefix is optional).
    pub fn parse(text: &str, num_autosomes: u8) -> Result<Self, String> {
        let invalid = || format!("Invalid region '{text}'. Expected the form 'chr1:100-200'.");
        let (chr, span) = text.trim().split_once(':').ok_or_else(invalid)?;
        let (start, end) = span.split_once('-').ok_or_else(invalid)?;
        let chromosome = parse_chromosome_label(chr, num_autosomes).ok_or_else(invalid)?;
        let start: u32 = start.trim().parse().map_err(|_| invalid())?;
        let end: u32 = end.trim().parse().map_err(|_| invalid())?;
        if start > end {
            return Err(format!("Invalid region '{text}': start is after end."));
        }
        Ok(Self {
            chromosome,
            start,
            end,
        })
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chr{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

// ========================================================================================
//                                  Scoring choices
// ========================================================================================

/// The mapping from allele dosage to the value used in scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneticModel {
    #[default]
    Additive,
    Dominant,
    Recessive,
    Heterozygous,
}

impl FromStr for GeneticModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "additive" => Ok(Self::Additive),
            "dom" | "dominant" => Ok(Self::Dominant),
            "rec" | "recessive" => Ok(Self::Recessive),
            "het" | "heterozygous" => Ok(Self::Heterozygous),
            other => Err(format!("Unknown genetic model '{other}'")),
        }
    }
}

/// How a sample's unobserved genotype contributes to its aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    #[default]
    MeanImpute,
    Center,
    Exclude,
}

impl FromStr for MissingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean-impute" | "mean_impute" | "impute" => Ok(Self::MeanImpute),
            "center" | "centre" => Ok(Self::Center),
            "exclude" | "no-mean-imputation" => Ok(Self::Exclude),
            other => Err(format!("Unknown missing-data policy '{other}'")),
        }
    }
}

/// Whether a supplied sample list names the samples to keep or the samples to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSelectionMode {
    Keep,
    Remove,
}

/// Whether a supplied variant list names the variants to extract or to exclude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantSelectionMode {
    Extract,
    Exclude,
}

// ========================================================================================
//                                 Samples & variants
// ========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Ambiguous,
}

impl Sex {
    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => Self::Male,
            "2" => Self::Female,
            _ => Self::Ambiguous,
        }
    }
}

/// One row of the pedigree file.
#[derive(Debug, Clone)]
pub struct Sample {
    pub family_id: String,
    pub individual_id: String,
    pub phenotype: String,
    pub sex: Sex,
    pub included: bool,
    pub founder: bool,
}

/// The running score of one sample, owned by the caller of the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleScore {
    pub score: f64,
    pub variant_count: u32,
}

impl SampleScore {
    #[inline]
    pub fn absorb(&mut self, other: &SampleScore) {
        self.score += other.score;
        self.variant_count += other.variant_count;
    }
}

/// A retained variant of the catalog.
#[derive(Debug, Clone)]
pub struct Variant {
    pub id: String,
    pub chromosome: u8,
    pub position: u32,
    pub allele1: String,
    pub allele2: String,
    /// Index into the located fileset list.
    pub file: FileIndex,
    /// Row of this variant within its own `.bed` file.
    pub record: BimRowIndex,
    pub statistic: f64,
    pub flipped: bool,
    pub region_mask: u64,
    pub valid: bool,
}

impl Variant {
    #[inline]
    pub fn in_region(&self, region: usize) -> bool {
        region < 64 && self.region_mask & (1u64 << region) != 0
    }
}

/// An allele pair is ambiguous when it cannot be told apart from its own reverse
/// complement: `A/T` or `C/G` in either order.
pub fn is_ambiguous(allele1: &str, allele2: &str) -> bool {
    const AMBIGUOUS_PAIRS: [(&str, &str); 4] = [("A", "T"), ("T", "A"), ("C", "G"), ("G", "C")];
    AMBIGUOUS_PAIRS
        .iter()
        .any(|(a, b)| allele1.eq_ignore_ascii_case(a) && allele2.eq_ignore_ascii_case(b))
}

// ========================================================================================
//                            Primitive Type Definitions
// ========================================================================================

/// A row index within a single `.bim`/`.bed` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BimRowIndex(pub u64);

/// An index into the ordered list of located filesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FileIndex(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chromosome_label_supports_common_variants() {
        assert_eq!(parse_chromosome_label("1", 22), Some(1));
        assert_eq!(parse_chromosome_label("chr2", 22), Some(2));
        assert_eq!(parse_chromosome_label("chrX", 22), Some(23));
        assert_eq!(parse_chromosome_label("Y", 22), Some(24));
        assert_eq!(parse_chromosome_label("xy", 22), Some(25));
        assert_eq!(parse_chromosome_label("MT", 22), Some(26));
        assert_eq!(parse_chromosome_label("chrM", 22), Some(26));
        assert_eq!(parse_chromosome_label("40", 22), Some(40));
        assert_eq!(parse_chromosome_label("scaffold_12", 22), None);
        assert_eq!(parse_chromosome_label("0", 22), Some(0));
    }

    #[test]
    fn special_chromosomes_follow_the_autosomes() {
        assert_eq!(special_chromosome(23, 22), Some(SpecialChromosome::X));
        assert_eq!(special_chromosome(26, 22), Some(SpecialChromosome::Mt));
        assert_eq!(special_chromosome(22, 22), None);
        assert_eq!(special_chromosome(12, 10), Some(SpecialChromosome::Y));
    }

    #[test]
    fn genomic_region_contains_enforces_bounds() {
        let region = GenomicRegion {
            chromosome: 1,
            start: 100,
            end: 200,
        };

        assert!(region.contains((1, 150)));
        assert!(!region.contains((1, 50)));
        assert!(!region.contains((2, 150)));
        assert!(!region.contains((1, 250)));
    }

    #[test]
    fn genomic_region_parses_from_text() {
        let region = GenomicRegion::parse("chr6:28000000-34000000", 22).unwrap();
        assert_eq!(region.chromosome, 6);
        assert_eq!(region.start, 28_000_000);
        assert_eq!(region.end, 34_000_000);
        assert!(GenomicRegion::parse("6:300-200", 22).is_err());
        assert!(GenomicRegion::parse("6-300", 22).is_err());
    }

    #[test]
    fn ambiguous_pairs_are_strand_symmetric() {
        for (a, b) in [("A", "T"), ("T", "A"), ("C", "G"), ("G", "C"), ("a", "t")] {
            assert!(is_ambiguous(a, b), "{a}/{b} should be ambiguous");
        }
        for (a, b) in [("A", "C"), ("A", "G"), ("T", "C"), ("T", "G"), ("AT", "TA")] {
            assert!(!is_ambiguous(a, b), "{a}/{b} should not be ambiguous");
        }
    }

    #[test]
    fn model_and_policy_names_parse() {
        assert_eq!("dom".parse::<GeneticModel>(), Ok(GeneticModel::Dominant));
        assert_eq!(
            "heterozygous".parse::<GeneticModel>(),
            Ok(GeneticModel::Heterozygous)
        );
        assert_eq!("center".parse::<MissingPolicy>(), Ok(MissingPolicy::Center));
        assert!("median".parse::<MissingPolicy>().is_err());
    }
}
