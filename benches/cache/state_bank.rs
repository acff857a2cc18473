use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput};
use journalbus::cache::{RawState, StateBank, StateKey, VecSink};
use journalbus::types::{Direction, Position, Record};
use std::hint::black_box;

fn position_state(i: u64, instruments: u64) -> RawState {
    let position = Position {
        instrument_id: format!("rb{}", i % instruments),
        exchange_id: "SHFE".to_string(),
        direction: Direction::Long,
        volume: i,
        avg_open_price: 3500.0,
        update_time: i as i64,
    };
    RawState {
        msg_type: Position::TAG,
        key: StateKey::new(1, 0, position.instance_key()),
        update_time: i as i64,
        payload: Bytes::from(position.encode().expect("position must encode in bench setup")),
    }
}

/// Register all benchmarks for state bank inserts and drains.
pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cache - State Bank");

    // Updates to a fixed set of instances replace each other.
    for &instruments in &[16u64, 1_024] {
        let states: Vec<RawState> = (0..10_000).map(|i| position_state(i, instruments)).collect();
        group.throughput(Throughput::Elements(states.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("insert_last_value", instruments),
            &states,
            |b, states| {
                b.iter(|| {
                    let mut bank = StateBank::new();
                    for state in states {
                        bank.insert(state.clone());
                    }
                    black_box(bank.len())
                });
            },
        );
    }

    for &cap in &[64usize, usize::MAX] {
        group.bench_with_input(BenchmarkId::new("drain_sorted", cap), &cap, |b, &cap| {
            b.iter_with_setup(
                || {
                    let mut bank = StateBank::new();
                    for i in 0..4_096 {
                        bank.insert(position_state(i, 4_096));
                    }
                    bank
                },
                |mut bank| {
                    let mut sink = VecSink::default();
                    black_box(bank.drain_sorted_into(&mut sink, cap))
                },
            );
        });
    }

    group.finish();
}
