//! Scalability benchmarks for the Hamlet simulation
//!
//! Measures tick cost at various agent counts against the 200ms tick budget.
//!
//! Run with: cargo bench --bench scalability

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hamlet_server::net::protocol::{encode_server, ServerMessage};
use hamlet_server::sim::map::{TilePos, TownMap};
use hamlet_server::sim::route::{CachedRouter, GridRouter, RouteFinder};
use hamlet_server::sim::{OrchestratorConfig, SimulationOrchestrator};

const AGENT_COUNTS: [usize; 5] = [12, 50, 100, 250, 500];

/// Orchestrator that has run long enough for agents to spread out
fn warmed_orchestrator(agents: usize) -> (SimulationOrchestrator, u64) {
    let mut sim = SimulationOrchestrator::new(OrchestratorConfig {
        seed: 42,
        agent_count: agents,
        ..OrchestratorConfig::default()
    });
    let warmup = 120;
    for tick_id in 1..=warmup {
        sim.tick(tick_id);
    }
    (sim, warmup)
}

/// Route pairs between every location center
fn location_pairs(map: &TownMap) -> Vec<(TilePos, TilePos)> {
    let centers: Vec<TilePos> = map.locations().iter().map(|l| l.center()).collect();
    centers
        .iter()
        .flat_map(|&a| centers.iter().map(move |&b| (a, b)))
        .filter(|(a, b)| a != b)
        .collect()
}

/// Benchmark a full simulation tick at various agent counts
fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_tick");
    group.sample_size(30);

    for count in AGENT_COUNTS {
        let (mut sim, mut tick_id) = warmed_orchestrator(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("orchestrator", count), &count, |b, _| {
            b.iter(|| {
                tick_id += 1;
                black_box(sim.tick(tick_id))
            })
        });
    }
    group.finish();
}

/// Benchmark uncached route search between all locations
fn bench_routes(c: &mut Criterion) {
    let mut group = c.benchmark_group("routes");
    group.sample_size(50);

    let map = TownMap::standard();
    let pairs = location_pairs(&map);

    group.throughput(Throughput::Elements(pairs.len() as u64));
    group.bench_function("grid_bfs", |b| {
        b.iter(|| {
            for &(from, to) in &pairs {
                black_box(GridRouter.find_route(&map, from, to));
            }
        })
    });

    group.bench_function("cached_batch_cold", |b| {
        b.iter(|| {
            let mut router = CachedRouter::new(GridRouter, 4096);
            black_box(router.plan_batch(&map, &pairs))
        })
    });

    let mut warm = CachedRouter::new(GridRouter, 4096);
    warm.plan_batch(&map, &pairs);
    group.bench_function("cached_batch_warm", |b| {
        b.iter(|| black_box(warm.plan_batch(&map, &pairs)))
    });
    group.finish();
}

/// Benchmark snapshot projection plus JSON encoding
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    group.sample_size(50);

    for count in AGENT_COUNTS {
        let (sim, tick_id) = warmed_orchestrator(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("encode", count), &count, |b, _| {
            b.iter(|| {
                let message = ServerMessage::Snapshot(sim.create_snapshot_event(tick_id));
                black_box(encode_server(&message).map(|bytes| bytes.len()))
            })
        });
    }
    group.finish();
}

/// Ensures tick time stays well under the 200ms budget
fn bench_tick_budget(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_budget");
    group.sample_size(100);
    group.measurement_time(std::time::Duration::from_secs(10));

    for count in [250, 500, 1000] {
        let (mut sim, mut tick_id) = warmed_orchestrator(count);

        group.bench_with_input(BenchmarkId::new("vs_budget", count), &count, |b, _| {
            b.iter(|| {
                tick_id += 1;
                sim.tick(tick_id);
                black_box(sim.create_delta_event(tick_id))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_tick, bench_routes, bench_snapshot, bench_tick_budget);

criterion_main!(benches);
