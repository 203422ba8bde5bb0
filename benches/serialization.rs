//! Serialization benchmarks for the obstacle server
//!
//! Measures record encoding and full broadcast passes at various world sizes.
//!
//! Run with: cargo bench --bench serialization

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use obstacle_server::game::definitions::Definitions;
use obstacle_server::game::obstacle::DamageSource;
use obstacle_server::game::state::GameState;
use obstacle_server::net::bitstream::{BitReader, BitWriter};
use obstacle_server::net::broadcast::Broadcaster;
use obstacle_server::net::replica::decode_update;
use obstacle_server::net::wire::WireConfig;
use obstacle_server::util::vec2::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Create a world with `count` obstacles cycling through every definition
fn create_world(definitions: &Definitions, count: usize) -> GameState<'_> {
    let mut state = GameState::new(definitions, WireConfig::default()).expect("compatible wire");
    let mut rng = StdRng::seed_from_u64(1);
    let ids: Vec<_> = definitions.obstacles().map(|d| d.id).collect();
    for i in 0..count {
        let position = Vec2::new(rng.gen_range(10.0..1900.0), rng.gen_range(10.0..1900.0));
        state
            .spawn_obstacle(ids[i % ids.len()], position, &mut rng)
            .expect("spawn");
    }
    state
}

/// Benchmark partial and full record encoding
fn bench_records(c: &mut Criterion) {
    let definitions = Definitions::bundled().expect("bundled definitions");
    let state = create_world(&definitions, 1000);
    let wire = *state.wire();
    let mut buffer = vec![0u8; 64 * 1024];

    let mut group = c.benchmark_group("records");
    group.throughput(Throughput::Elements(state.obstacle_count() as u64));

    group.bench_function("partial", |b| {
        b.iter(|| {
            let mut writer = BitWriter::new(&mut buffer);
            for obstacle in state.obstacles() {
                obstacle.serialize_partial(&mut writer, &wire).expect("fits");
            }
            black_box(writer.position())
        });
    });

    group.bench_function("full", |b| {
        b.iter(|| {
            let mut writer = BitWriter::new(&mut buffer);
            for obstacle in state.obstacles() {
                obstacle.serialize_full(&mut writer, &wire).expect("fits");
            }
            black_box(writer.position())
        });
    });

    group.bench_function("read_scale", |b| {
        let mut writer = BitWriter::new(&mut buffer);
        for obstacle in state.obstacles() {
            writer.write_scale(&wire, obstacle.scale()).expect("fits");
        }
        let bits = writer.position();
        b.iter(|| {
            let mut reader = BitReader::new(&buffer);
            let mut sum = 0.0f32;
            while reader.position() + wire.scale_bits as usize <= bits {
                sum += reader.read_scale(&wire).expect("in range");
            }
            black_box(sum)
        });
    });

    group.finish();
}

/// Benchmark a broadcast pass: initial sync vs damage-only ticks
fn bench_broadcast(c: &mut Criterion) {
    let definitions = Definitions::bundled().expect("bundled definitions");
    let mut group = c.benchmark_group("broadcast");
    group.sample_size(30);

    for count in [100, 500, 1000, 2000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("initial_sync", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let state = create_world(&definitions, count);
                    let mut broadcaster = Broadcaster::new(64 * 1024);
                    for _ in 0..8 {
                        broadcaster.add_observer(Uuid::new_v4());
                    }
                    (state, broadcaster)
                },
                |(mut state, mut broadcaster)| black_box(broadcaster.broadcast(&mut state)),
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("damage_tick", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut state = create_world(&definitions, count);
                    let mut broadcaster = Broadcaster::new(64 * 1024);
                    for _ in 0..8 {
                        broadcaster.add_observer(Uuid::new_v4());
                    }
                    broadcaster.broadcast(&mut state);
                    let targets: Vec<_> = state.obstacles().map(|o| o.id()).step_by(10).collect();
                    for id in targets {
                        let _ = state.apply_damage(id, 5.0, DamageSource::World, None);
                    }
                    (state, broadcaster)
                },
                |(mut state, mut broadcaster)| black_box(broadcaster.broadcast(&mut state)),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark decoding an initial sync payload
fn bench_decode(c: &mut Criterion) {
    let definitions = Definitions::bundled().expect("bundled definitions");
    let mut state = create_world(&definitions, 1000);
    let mut broadcaster = Broadcaster::new(64 * 1024);
    broadcaster.add_observer(Uuid::new_v4());
    let update = broadcaster.broadcast(&mut state).remove(0).1;
    let wire = *state.wire();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(update.payload.len() as u64));
    group.bench_function("initial_sync_1000", |b| {
        b.iter(|| black_box(decode_update(&update.payload, &wire, &definitions).expect("valid")));
    });
    group.finish();
}

criterion_group!(benches, bench_records, bench_broadcast, bench_decode);
criterion_main!(benches);
