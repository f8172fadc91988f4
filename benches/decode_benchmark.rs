// ========================================================================================
//
//                         PLINKSCORE ROW DECODE BENCHMARK
//
// ========================================================================================
//
// Measures the aggregate-only and the full decode of one packed row, with and without a
// sample subset, and the cost of folding a decoded row into the score accumulator.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use plinkscore::config::ScoringConfig;
use plinkscore::decode::{DecodeScratch, SampleMask, decode_counts, decode_genotypes, pack_row};
use plinkscore::kernel::accumulate_variant;
use plinkscore::types::SampleScore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_row(samples: usize, rng: &mut StdRng) -> Vec<u8> {
    let calls: Vec<Option<u8>> = (0..samples)
        .map(|_| match rng.gen_range(0..20) {
            0 => None,
            n => Some((n % 3) as u8),
        })
        .collect();
    pack_row(&calls)
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_row");
    let mut rng = StdRng::seed_from_u64(7);

    for &samples in &[1_000usize, 50_000, 500_000] {
        let row = random_row(samples, &mut rng);
        let full = SampleMask::all(samples);
        let half = SampleMask::from_flags((0..samples).map(|i| i % 2 == 0));

        group.bench_with_input(BenchmarkId::new("counts_full", samples), &row, |b, row| {
            b.iter(|| decode_counts(black_box(row), &full))
        });
        group.bench_with_input(BenchmarkId::new("counts_subset", samples), &row, |b, row| {
            b.iter(|| decode_counts(black_box(row), &half))
        });

        let mut scratch = DecodeScratch::with_capacity(samples);
        group.bench_with_input(BenchmarkId::new("genotypes_full", samples), &row, |b, row| {
            b.iter(|| decode_genotypes(black_box(row), &full, &mut scratch))
        });

        let mut scores = vec![SampleScore::default(); samples];
        let config = ScoringConfig::default();
        group.bench_with_input(BenchmarkId::new("decode_and_score", samples), &row, |b, row| {
            b.iter(|| {
                let counts = decode_genotypes(black_box(row), &full, &mut scratch);
                accumulate_variant(counts, &scratch, 0.1, false, &config, &mut scores)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
