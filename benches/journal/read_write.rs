use criterion::{BenchmarkId, Criterion, Throughput};
use journalbus::journal::{Category, Location, Locator, Mode, PUBLIC_DEST, Reader, Writer};
use journalbus::types::Quote;
use std::hint::black_box;
use std::sync::Arc;

const PAGE_SIZE: usize = 4 * 1024 * 1024;

fn quote(i: u64) -> Quote {
    Quote {
        instrument_id: format!("rb{}", 2501 + i % 8),
        exchange_id: "SHFE".to_string(),
        last_price: 3500.0 + (i % 100) as f64,
        bid_price: 3499.0,
        ask_price: 3501.0,
        volume: i,
        data_time: i as i64,
    }
}

fn writer(locator: &Arc<Locator>, name: &str) -> Writer {
    let location = Arc::new(Location::new(Mode::Live, Category::Md, "bench", name));
    Writer::open(Arc::clone(locator), location, PUBLIC_DEST, PAGE_SIZE)
        .expect("writer must open in bench setup")
}

/// Register all benchmarks for journal appends and merged reads.
pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Journal - Read/Write");
    let dir = tempfile::tempdir().expect("tempdir must be created in bench setup");
    let locator = Arc::new(Locator::new(dir.path()));

    // ─── Append ─────────────────────────────────────────────────────
    let record = quote(7);
    let mut w = writer(&locator, "append");
    group.throughput(Throughput::Elements(1));
    group.bench_function("write_quote", |b| {
        b.iter(|| w.write(0, black_box(&record)))
    });

    let payload = vec![0u8; 128];
    group.bench_function("write_raw_128b", |b| {
        b.iter(|| w.write_bytes(0, 1, black_box(&payload)))
    });

    // ─── Merged read ────────────────────────────────────────────────
    for &journals in &[1usize, 4, 16] {
        let per_journal = 2_000u64;
        let mut locations = Vec::with_capacity(journals);
        for j in 0..journals {
            let mut w = writer(&locator, &format!("merge{journals}_{j}"));
            for i in 0..per_journal {
                let _ = w.write_at(i as i64 * journals as i64 + j as i64, 0, &quote(i));
            }
            locations.push(Arc::clone(w.location()));
        }
        group.throughput(Throughput::Elements(per_journal * journals as u64));
        group.bench_with_input(
            BenchmarkId::new("merge_read", journals),
            &locations,
            |b, locations| {
                b.iter_with_setup(
                    || {
                        let mut reader = Reader::new(Arc::clone(&locator));
                        for location in locations {
                            reader
                                .join(Arc::clone(location), PUBLIC_DEST, 0)
                                .expect("join must succeed in bench setup");
                        }
                        reader
                    },
                    |mut reader| {
                        let mut count = 0u64;
                        while let Some(frame) = reader.next() {
                            black_box(frame.gen_time());
                            count += 1;
                        }
                        assert_eq!(count, per_journal * locations.len() as u64);
                    },
                );
            },
        );
    }

    group.finish();
}
