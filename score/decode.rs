// ========================================================================================
//
//                                 The genotype decoder
//
// ========================================================================================
//
// A packed row holds 2 bits per sample of the unfiltered universe, four samples per
// byte, least-significant pair first:
//
//     00 = homozygous reference   01 = missing   10 = heterozygous   11 = homozygous alternate
//
// Decoding is always restricted to a sample subset described by a `SampleMask`. The
// aggregate-only path never materializes per-sample values; the full path writes the
// alternate-allele dosage of every subset member into a reusable scratch buffer.

use crate::bed::BedFileSet;
use crate::error::{GenotypeError, Result};
use crate::shared::files::{BedSource, open_bed_source};
use crate::types::{BimRowIndex, FileIndex};
use bitvec::prelude::*;
use std::sync::OnceLock;

const CODE_HOM_REF: u8 = 0b00;
const CODE_MISSING: u8 = 0b01;
const CODE_HET: u8 = 0b10;
const CODE_HOM_ALT: u8 = 0b11;

/// Number of bytes one packed row occupies for `unfiltered_samples` samples.
#[inline]
pub fn row_stride(unfiltered_samples: usize) -> usize {
    unfiltered_samples.div_ceil(4)
}

// ========================================================================================
//                                   Sample subsets
// ========================================================================================

/// A subset of the unfiltered sample universe. Subset-relative index `k` is the `k`-th
/// set bit in universe order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMask {
    bits: BitVec<u64, Lsb0>,
    selected: usize,
}

impl SampleMask {
    pub fn all(unfiltered_samples: usize) -> Self {
        Self {
            bits: bitvec![u64, Lsb0; 1; unfiltered_samples],
            selected: unfiltered_samples,
        }
    }

    pub fn from_flags(flags: impl IntoIterator<Item = bool>) -> Self {
        let bits: BitVec<u64, Lsb0> = flags.into_iter().collect();
        let selected = bits.count_ones();
        Self { bits, selected }
    }

    /// Size of the universe the mask is defined over.
    #[inline]
    pub fn unfiltered_len(&self) -> usize {
        self.bits.len()
    }

    /// Number of selected samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.selected
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.selected == self.bits.len()
    }

    #[inline]
    pub fn contains(&self, sample: usize) -> bool {
        self.bits.get(sample).is_some_and(|bit| *bit)
    }

    /// Universe indices of the selected samples, ascending.
    pub fn iter_selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}

// ========================================================================================
//                                   Decode results
// ========================================================================================

/// Genotype call counts over a sample subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenotypeCounts {
    pub hom_ref: u32,
    pub het: u32,
    pub hom_alt: u32,
    pub missing: u32,
}

impl GenotypeCounts {
    #[inline]
    pub fn observed(&self) -> u32 {
        self.hom_ref + self.het + self.hom_alt
    }

    #[inline]
    fn record(&mut self, code: u8) {
        match code {
            CODE_HOM_REF => self.hom_ref += 1,
            CODE_HET => self.het += 1,
            CODE_HOM_ALT => self.hom_alt += 1,
            _ => self.missing += 1,
        }
    }
}

/// Reusable per-sample output of a full decode. One per worker.
#[derive(Debug, Default)]
pub struct DecodeScratch {
    /// Alternate-allele dosage of each subset member; 0 for missing members.
    pub values: Vec<u8>,
    /// Ascending subset-relative indices of missing members.
    pub missing: Vec<u32>,
}

impl DecodeScratch {
    pub fn with_capacity(subset_len: usize) -> Self {
        Self {
            values: Vec::with_capacity(subset_len),
            missing: Vec::new(),
        }
    }
}

/// Per-byte counts of each 2-bit code, indexed by code.
fn code_count_table() -> &'static [[u8; 4]; 256] {
    static TABLE: OnceLock<[[u8; 4]; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0u8; 4]; 256];
        for byte in 0..256usize {
            for slot in 0..4 {
                let code = (byte >> (slot * 2)) & 0b11;
                table[byte][code] += 1;
            }
        }
        table
    })
}

#[inline(always)]
fn code_at(row: &[u8], sample: usize) -> u8 {
    (row[sample >> 2] >> ((sample & 3) * 2)) & 0b11
}

fn check_row_len(row: &[u8], mask: &SampleMask) {
    debug_assert_eq!(
        row.len(),
        row_stride(mask.unfiltered_len()),
        "packed row length does not match the sample universe"
    );
}

/// Counts calls over the subset without materializing per-sample values.
pub fn decode_counts(row: &[u8], mask: &SampleMask) -> GenotypeCounts {
    check_row_len(row, mask);
    let mut counts = GenotypeCounts::default();

    if mask.is_full() {
        let unfiltered = mask.unfiltered_len();
        let whole_bytes = unfiltered / 4;
        let table = code_count_table();
        let mut tally = [0u32; 4];
        for &byte in &row[..whole_bytes] {
            let per_code = &table[byte as usize];
            for code in 0..4 {
                tally[code] += per_code[code] as u32;
            }
        }
        counts.hom_ref = tally[CODE_HOM_REF as usize];
        counts.missing = tally[CODE_MISSING as usize];
        counts.het = tally[CODE_HET as usize];
        counts.hom_alt = tally[CODE_HOM_ALT as usize];
        // The trailing byte may carry padding pairs past the last sample.
        for sample in whole_bytes * 4..unfiltered {
            counts.record(code_at(row, sample));
        }
        return counts;
    }

    for sample in mask.iter_selected() {
        counts.record(code_at(row, sample));
    }
    counts
}

/// Decodes the subset fully: counts, the missing list, and per-sample dosages.
pub fn decode_genotypes(
    row: &[u8],
    mask: &SampleMask,
    scratch: &mut DecodeScratch,
) -> GenotypeCounts {
    check_row_len(row, mask);
    scratch.values.clear();
    scratch.missing.clear();
    let mut counts = GenotypeCounts::default();

    for (subset_idx, sample) in mask.iter_selected().enumerate() {
        let code = code_at(row, sample);
        counts.record(code);
        let value = match code {
            CODE_HOM_REF => 0,
            CODE_HET => 1,
            CODE_HOM_ALT => 2,
            _ => {
                scratch.missing.push(subset_idx as u32);
                0
            }
        };
        scratch.values.push(value);
    }
    counts
}

/// Packs per-sample calls (`None` = missing, `Some(dosage)` otherwise) into one row.
pub fn pack_row(calls: &[Option<u8>]) -> Vec<u8> {
    let mut row = vec![0u8; row_stride(calls.len())];
    for (sample, call) in calls.iter().enumerate() {
        let code = match call {
            None => CODE_MISSING,
            Some(0) => CODE_HOM_REF,
            Some(1) => CODE_HET,
            Some(_) => CODE_HOM_ALT,
        };
        row[sample >> 2] |= code << ((sample & 3) * 2);
    }
    row
}

// ========================================================================================
//                                   Row retrieval
// ========================================================================================

/// Reads packed rows out of the located `.bed` files. Each worker owns one reader; the
/// underlying file is released and reopened whenever the next row lives in a different
/// file than the previous one.
pub struct BedRowReader<'a> {
    files: &'a BedFileSet,
    current: Option<(FileIndex, BedSource)>,
    buffer: Vec<u8>,
}

impl<'a> BedRowReader<'a> {
    pub fn new(files: &'a BedFileSet) -> Self {
        Self {
            files,
            current: None,
            buffer: vec![0u8; files.bytes_per_variant() as usize],
        }
    }

    /// Returns the packed row at `record` of `file`. Out-of-range records and failed
    /// reads are fatal I/O errors.
    pub fn read_row(&mut self, file: FileIndex, record: BimRowIndex) -> Result<&[u8]> {
        let descriptor = self.files.descriptor(file);
        if record.0 >= descriptor.variant_count {
            return Err(GenotypeError::io(
                &descriptor.path,
                format!(
                    "record {} requested, but the file holds only {} variants",
                    record.0, descriptor.variant_count
                ),
            ));
        }

        let needs_open = self
            .current
            .as_ref()
            .is_none_or(|(open_file, _)| *open_file != file);
        if needs_open {
            self.current = None;
            self.current = Some((file, open_bed_source(&descriptor.path)?));
        }

        let stride = self.files.bytes_per_variant();
        let offset = record
            .0
            .checked_mul(stride)
            .and_then(|row_start| row_start.checked_add(descriptor.offset))
            .ok_or_else(|| GenotypeError::io(&descriptor.path, "row offset overflow"))?;

        if let Some((_, source)) = &self.current {
            source.read_at(offset, &mut self.buffer)?;
        }
        Ok(&self.buffer)
    }

    /// Releases the currently open file, if any.
    pub fn close(&mut self) {
        self.current = None;
    }
}
