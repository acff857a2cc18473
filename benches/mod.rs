use criterion::{criterion_group, criterion_main};

mod cache;
mod journal;

use cache::register_benchmarks as register_cache_benchmarks;
use journal::register_benchmarks as register_journal_benchmarks;

criterion_group!(benches, register_journal_benchmarks, register_cache_benchmarks);

criterion_main!(benches);
