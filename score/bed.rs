// ========================================================================================
//                              .bed container validation
// ========================================================================================
//
// Every located `.bed` file is checked before any row is decoded: its header must be one
// of the known PLINK layouts and its length must be exactly what that layout predicts
// for the sample and variant counts. Only the SNP-major layouts are decodable.

use crate::decode::row_stride;
use crate::error::{GenotypeError, Result};
use crate::locate::GenotypeFileSet;
use crate::shared::files::open_bed_source;
use crate::types::FileIndex;
use log::debug;
use std::path::{Path, PathBuf};

const BED_MAGIC_0: u8 = 0x6c;
const BED_MAGIC_1: u8 = 0x1b;
const BED_MODE_SNP_MAJOR: u8 = 0x01;
const BED_MODE_SAMPLE_MAJOR: u8 = 0x00;
const LEGACY_SNP_MAJOR: u8 = 0x01;
const LEGACY_SAMPLE_MAJOR: u8 = 0x00;

/// The header layouts a `.bed` file may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedLayout {
    /// `6c 1b 01`: the current SNP-major format.
    SnpMajor,
    /// `6c 1b 00`: version 1.00 sample-major.
    SampleMajor,
    /// A single `01` byte: version 0.99 SNP-major.
    LegacySnpMajor,
    /// A single `00` byte: version 0.99 sample-major.
    LegacySampleMajor,
    /// No header at all: pre-0.99 sample-major.
    HeaderlessSampleMajor,
}

impl BedLayout {
    pub fn header_len(self) -> u64 {
        match self {
            Self::SnpMajor | Self::SampleMajor => 3,
            Self::LegacySnpMajor | Self::LegacySampleMajor => 1,
            Self::HeaderlessSampleMajor => 0,
        }
    }

    pub fn is_sample_major(self) -> bool {
        !matches!(self, Self::SnpMajor | Self::LegacySnpMajor)
    }
}

/// A validated `.bed` file: where its first row starts and how many rows it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedDescriptor {
    pub path: PathBuf,
    pub layout: BedLayout,
    pub offset: u64,
    pub variant_count: u64,
}

/// Identifies the layout of a `.bed` file from its leading bytes and total length.
///
/// `head` holds up to the first three bytes of the file. The predicted lengths are
/// `ceil(samples/4) * variants` for SNP-major data and `samples * ceil(variants/4)` for
/// sample-major data, each plus the header.
pub fn detect_layout(
    path: &Path,
    head: &[u8],
    file_len: u64,
    unfiltered_samples: usize,
    variant_count: u64,
) -> Result<BedLayout> {
    let snp_major_len = row_stride(unfiltered_samples) as u64 * variant_count;
    let sample_major_len = unfiltered_samples as u64 * variant_count.div_ceil(4);

    let (layout, expected_len) = match head {
        [BED_MAGIC_0, BED_MAGIC_1, BED_MODE_SNP_MAJOR, ..] => {
            (BedLayout::SnpMajor, snp_major_len + 3)
        }
        [BED_MAGIC_0, BED_MAGIC_1, BED_MODE_SAMPLE_MAJOR, ..] => {
            (BedLayout::SampleMajor, sample_major_len + 3)
        }
        [LEGACY_SNP_MAJOR, ..] => (BedLayout::LegacySnpMajor, snp_major_len + 1),
        [LEGACY_SAMPLE_MAJOR, ..] => (BedLayout::LegacySampleMajor, sample_major_len + 1),
        _ => {
            if file_len != sample_major_len {
                let message = if looks_like_track_file(head) {
                    TRACK_FILE_HINT
                } else {
                    "invalid header bytes in .bed file"
                };
                return Err(GenotypeError::malformed(path, None, message));
            }
            (BedLayout::HeaderlessSampleMajor, sample_major_len)
        }
    };

    if file_len != expected_len {
        let message = if looks_like_track_file(head) {
            TRACK_FILE_HINT.to_string()
        } else {
            format!(
                "invalid .bed file size: expected {expected_len} bytes for {unfiltered_samples} \
                 samples and {variant_count} variants, found {file_len}"
            )
        };
        return Err(GenotypeError::malformed(path, None, message));
    }

    if layout.is_sample_major() {
        return Err(GenotypeError::UnsupportedFormat {
            path: path.display().to_string(),
            message: "sample-major .bed files are not supported; convert to SNP-major first"
                .to_string(),
        });
    }
    Ok(layout)
}

const TRACK_FILE_HINT: &str =
    "invalid header bytes in PLINK 1 .bed file (is this a UCSC Genome Browser BED file instead?)";

/// Browser-track BED files share the extension but start with a comment or a `chr` label.
fn looks_like_track_file(head: &[u8]) -> bool {
    head.first() == Some(&b'#') || head.starts_with(b"chr")
}

/// Opens one `.bed` file and validates it against the expected counts.
pub fn inspect_bed(
    path: &Path,
    unfiltered_samples: usize,
    variant_count: u64,
) -> Result<BedDescriptor> {
    let source = open_bed_source(path)?;
    if source.is_empty() {
        return Err(GenotypeError::malformed(path, None, "empty .bed file"));
    }
    let mut head = [0u8; 3];
    let head_len = head.len().min(source.len() as usize);
    source.read_at(0, &mut head[..head_len])?;

    let layout = detect_layout(
        path,
        &head[..head_len],
        source.len(),
        unfiltered_samples,
        variant_count,
    )?;
    debug!(
        "{}: {:?} layout, {} variants",
        path.display(),
        layout,
        variant_count
    );
    Ok(BedDescriptor {
        path: path.to_path_buf(),
        layout,
        offset: layout.header_len(),
        variant_count,
    })
}

/// The validated `.bed` files of a run, indexed like the located filesets.
#[derive(Debug, Clone)]
pub struct BedFileSet {
    descriptors: Vec<BedDescriptor>,
    bytes_per_variant: u64,
}

impl BedFileSet {
    /// Validates every `.bed` file. `variant_counts[i]` is the number of `.bim` rows of
    /// file `i`; every file shares the sample universe of size `unfiltered_samples`.
    pub fn validate(
        files: &GenotypeFileSet,
        unfiltered_samples: usize,
        variant_counts: &[u64],
    ) -> Result<Self> {
        let descriptors = variant_counts
            .iter()
            .enumerate()
            .map(|(file, &count)| inspect_bed(&files.bed_path(file), unfiltered_samples, count))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            descriptors,
            bytes_per_variant: row_stride(unfiltered_samples) as u64,
        })
    }

    pub fn descriptor(&self, file: FileIndex) -> &BedDescriptor {
        &self.descriptors[file.0 as usize]
    }

    /// Length in bytes of one packed row.
    pub fn bytes_per_variant(&self) -> u64 {
        self.bytes_per_variant
    }
}
