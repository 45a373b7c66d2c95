use std::convert::TryFrom;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use amptools::bam::CigarString;
use amptools::cigar::CigarTrim;
use amptools::consensus::{majority_consensus, ConsensusOptions};

fn trim_both_ends(cigar: &CigarString, start: u32, end: u32) -> CigarString {
    let len = cigar.read_len();
    let trimmed = cigar.trim(len - start, true).unwrap();
    trimmed.trim(len - start - end, false).unwrap()
}

fn criterion_benchmarks_trim(c: &mut Criterion) {
    let inputs = vec![
        ("300M", 20, 20),
        ("5S20M2D130M4I146M3S", 25, 20),
        ("10S30M1I20M2D40M1I30M3D50M1I40M2D60M15S", 30, 30),
    ];
    let mut group = c.benchmark_group("cigar_trim");
    group.sample_size(100);
    for (text, start, end) in inputs {
        let cigar = CigarString::try_from(text).unwrap();
        group.bench_with_input(BenchmarkId::new("trim", text), &cigar, move |b, cigar| {
            b.iter(|| trim_both_ends(black_box(cigar), start, end))
        });
    }
    group.finish();
}

fn criterion_benchmarks_consensus(c: &mut Criterion) {
    let options = ConsensusOptions::default();
    let mut group = c.benchmark_group("majority_consensus");
    for depth in [4usize, 16, 64].iter() {
        let rows: Vec<Vec<u8>> = (0..*depth)
            .map(|i| {
                let mut row = b"ACGT".repeat(75);
                row[i % 300] = b'-';
                row
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("depth", depth), &rows, |b, rows| {
            b.iter(|| majority_consensus(black_box(rows), &options))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    criterion_benchmarks_trim,
    criterion_benchmarks_consensus
);
criterion_main!(benches);
