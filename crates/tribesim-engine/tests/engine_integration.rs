//! End-to-end engine runs: real coordinator, real worker threads, real
//! migrations. Wall-clock timeouts are generous so loaded CI machines
//! do not flake.

use std::time::{Duration, Instant};

use tribesim_core::gene::GeneOverrides;
use tribesim_core::{SimConfig, SpawnConfig, SpawnPattern, TribeConfig};
use tribesim_engine::{DataEvent, Simulation};

const READY_TIMEOUT: Duration = Duration::from_secs(20);
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scattered_tribe(name: &str, count: usize, genes: GeneOverrides) -> TribeConfig {
    TribeConfig {
        name: name.to_owned(),
        color: None,
        spawn: SpawnConfig {
            count,
            position: None,
            radius: 120.0,
            pattern: SpawnPattern::Scattered,
        },
        genes,
    }
}

fn four_worker_config(seed: u64) -> SimConfig {
    let mut cfg = SimConfig::default();
    cfg.world_width = 800.0;
    cfg.world_height = 800.0;
    cfg.capacity = 1024;
    cfg.workers = 4;
    cfg.seed = seed;
    cfg.food.resolution = 48;
    cfg
}

fn wait_ready(sim: &Simulation) -> tribesim_engine::WorldMetadata {
    match sim.wait_event(READY_TIMEOUT) {
        Some(DataEvent::Ready(meta)) => *meta,
        other => panic!("expected Ready, got {other:?}"),
    }
}

/// Block until an event matching `pick` arrives, discarding the rest.
fn wait_for<T>(sim: &Simulation, timeout: Duration, mut pick: impl FnMut(DataEvent) -> Option<T>) -> T {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) {
        if let Some(event) = sim.wait_event(remaining)
            && let Some(out) = pick(event)
        {
            return out;
        }
    }
    panic!("no matching event within {timeout:?}");
}

#[test]
fn four_worker_run_streams_stats_and_peaceful_tribes_never_kill() {
    init_logs();
    let mut cfg = four_worker_config(11);
    let pacifist = GeneOverrides {
        aggression: Some(0.0),
        diet: Some(-1.0),
        ..GeneOverrides::default()
    };
    cfg.tribes = vec![
        scattered_tribe("north", 40, pacifist.clone()),
        scattered_tribe("south", 40, pacifist),
    ];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg.clone()).unwrap();

    let meta = wait_ready(&sim);
    assert_eq!(meta.workers, 4);
    assert_eq!(meta.tribes.len(), 2);
    assert_eq!(meta.slot_ranges.len(), 4);
    let covered: usize = meta.slot_ranges.iter().map(|&(_, cap)| cap).sum();
    assert_eq!(covered, cfg.capacity);
    for window in meta.slot_ranges.windows(2) {
        assert_eq!(window[0].0 + window[0].1, window[1].0, "ranges must be contiguous");
    }

    // Let the periodic cadence deliver a handful of samples.
    for _ in 0..3 {
        let stats = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
            DataEvent::Stats(stats) => Some(*stats),
            _ => None,
        });
        assert!(stats.population > 0, "pacifist herd should not vanish");
        assert_eq!(stats.by_tribe.len(), 2);
        assert_eq!(stats.by_tribe.iter().sum::<u32>(), stats.population);
        assert_eq!(stats.kills, 0, "aggression zero must mean zero kills");
    }

    sim.request_perf().unwrap();
    let perf = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Perf(perf) => Some(perf),
        _ => None,
    });
    assert!(perf.entities > 0);

    sim.shutdown().unwrap();
}

#[test]
fn population_is_conserved_across_partition_migrations() {
    init_logs();
    let mut cfg = four_worker_config(23);
    // Calm herbivores with negligible upkeep: every change in headcount
    // must come from a birth or a death, never from a migration.
    let drifter = GeneOverrides {
        aggression: Some(0.0),
        metabolism: Some(0.02),
        diet: Some(-1.0),
        ..GeneOverrides::default()
    };
    cfg.tribes = vec![
        scattered_tribe("east", 60, drifter.clone()),
        scattered_tribe("west", 60, drifter),
    ];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg).unwrap();
    wait_ready(&sim);
    sim.set_speed(4.0).unwrap();

    // Run long enough for entities to wander across region borders.
    std::thread::sleep(Duration::from_secs(2));

    // Pause, then give in-flight migration handshakes time to resolve
    // before taking the census.
    sim.pause(true).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    while sim.try_event().is_some() {}

    sim.request_stats().unwrap();
    let stats = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    let expected = 120i64 + i64::from(stats.births) - i64::from(stats.deaths);
    assert_eq!(
        i64::from(stats.population),
        expected,
        "migrations must neither duplicate nor drop entities"
    );
    assert_eq!(stats.by_tribe.iter().sum::<u32>(), stats.population);

    let frame = sim.frame();
    let buffers = frame.lock().unwrap();
    assert_eq!(buffers.capacity, 1024);
    assert!(buffers.live_count() > 0);
    drop(buffers);

    sim.shutdown().unwrap();
}

#[test]
fn starved_world_reaches_extinction() {
    init_logs();
    let mut cfg = four_worker_config(5);
    cfg.food.capacity = 0.0;
    cfg.food.initial_fill = 0.0;
    cfg.energy.start = 5.0;
    let doomed = GeneOverrides {
        aggression: Some(0.0),
        metabolism: Some(1.0),
        repro_chance: Some(0.0),
        ..GeneOverrides::default()
    };
    cfg.tribes = vec![scattered_tribe("last", 30, doomed)];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg).unwrap();
    wait_ready(&sim);
    sim.set_speed(8.0).unwrap();

    let (final_time, final_stats) = wait_for(&sim, Duration::from_secs(30), |event| match event {
        DataEvent::Extinction {
            final_time,
            final_stats,
        } => Some((final_time, final_stats)),
        _ => None,
    });
    assert_eq!(final_stats.population, 0);
    assert!(final_time > 0.0, "some simulated time must pass before the end");
    assert_eq!(final_stats.deaths, final_stats.kills + final_stats.starved);

    // Empty partitions keep ticking, but the reported clock stays frozen
    // at the last death, so a later census carries the same time.
    std::thread::sleep(Duration::from_millis(300));
    while sim.try_event().is_some() {}
    sim.request_stats().unwrap();
    let later = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    assert_eq!(later.population, 0);
    assert_eq!(later.time, final_time, "extinction time must not drift afterwards");

    sim.shutdown().unwrap();
}

#[test]
fn boundary_spawned_entity_is_counted_by_exactly_one_partition() {
    init_logs();
    let mut cfg = four_worker_config(17);
    // Flat all-land terrain so the exact corner point is spawnable.
    cfg.food.terrain.ocean_threshold = -10.0;
    cfg.food.terrain.mountain_threshold = 10.0;
    cfg.tribes = vec![TribeConfig {
        name: "walker".to_owned(),
        color: None,
        spawn: SpawnConfig {
            count: 1,
            // The shared corner of all four 400x400 regions.
            position: Some((400.0, 400.0)),
            radius: 0.0,
            pattern: SpawnPattern::Blob,
        },
        genes: GeneOverrides {
            aggression: Some(0.0),
            metabolism: Some(0.02),
            repro_chance: Some(0.0),
            diet: Some(-1.0),
            ..GeneOverrides::default()
        },
    }];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg).unwrap();
    wait_ready(&sim);
    sim.set_speed(4.0).unwrap();

    // Wander across the seams for a while, then settle the handshakes
    // before taking the census.
    std::thread::sleep(Duration::from_secs(2));
    sim.pause(true).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    while sim.try_event().is_some() {}

    sim.request_stats().unwrap();
    let stats = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    assert_eq!(stats.births, 0);
    assert_eq!(stats.deaths, 0);
    assert_eq!(
        stats.population, 1,
        "the border walker must be owned by exactly one partition"
    );

    let frame = sim.frame();
    let buffers = frame.lock().unwrap();
    assert_eq!(buffers.live_count(), 1);
    drop(buffers);

    sim.shutdown().unwrap();
}

#[test]
fn pause_requested_before_ready_keeps_the_clock_frozen() {
    init_logs();
    let mut cfg = four_worker_config(29);
    cfg.tribes = vec![scattered_tribe("frozen", 30, GeneOverrides::default())];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg).unwrap();
    // Lands while the coordinator is still waiting for worker acks; the
    // world must come up paused instead of running.
    sim.pause(true).unwrap();
    wait_ready(&sim);

    std::thread::sleep(Duration::from_millis(300));
    while sim.try_event().is_some() {}
    sim.request_stats().unwrap();
    let first = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    assert_eq!(first.time, 0.0, "no tick may run before the first unpause");

    std::thread::sleep(Duration::from_millis(300));
    sim.request_stats().unwrap();
    let second = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    assert_eq!(second.time, first.time);

    sim.pause(false).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    while sim.try_event().is_some() {}
    sim.request_stats().unwrap();
    let third = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Stats(stats) => Some(*stats),
        _ => None,
    });
    assert!(third.time > second.time, "unpausing must restart the clock");

    sim.shutdown().unwrap();
}

#[test]
fn duplicate_init_is_rejected_but_re_emits_ready() {
    init_logs();
    let mut cfg = four_worker_config(3);
    cfg.tribes = vec![scattered_tribe("only", 20, GeneOverrides::default())];

    let sim = Simulation::launch().unwrap();
    sim.init(cfg.clone()).unwrap();
    let first = wait_ready(&sim);

    sim.init(cfg).unwrap();
    let again = wait_for(&sim, EVENT_TIMEOUT, |event| match event {
        DataEvent::Ready(meta) => Some(*meta),
        _ => None,
    });
    assert_eq!(again.workers, first.workers);
    assert_eq!(again.slot_ranges, first.slot_ranges);

    sim.shutdown().unwrap();
}
