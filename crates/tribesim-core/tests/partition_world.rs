//! Scenario-level tests driving a full partition world.

use rand::{SeedableRng, rngs::SmallRng};
use tribesim_core::gene::GeneOverrides;
use tribesim_core::spawn;
use tribesim_core::{
    BiomeField, PartitionWorld, Region, SimConfig, SpawnConfig, SpawnPattern, TribeConfig,
};

fn build_world(mut cfg: SimConfig) -> PartitionWorld {
    cfg.sanitize();
    let region = Region {
        x0: 0.0,
        y0: 0.0,
        x1: cfg.world_width,
        y1: cfg.world_height,
    };
    let biome = BiomeField::generate(
        cfg.seed,
        cfg.world_width,
        cfg.world_height,
        cfg.food.resolution,
        cfg.food.terrain,
    );
    let specs = cfg.tribe_specs();
    let mut rng = SmallRng::seed_from_u64(cfg.seed);
    let mut seeds = Vec::new();
    for (t, tribe) in cfg.tribes.iter().enumerate() {
        seeds.extend(spawn::tribe_seeds(
            t as u16, tribe, &specs[t], &cfg, &biome, &mut rng,
        ));
    }
    PartitionWorld::new(&cfg, 0, region, 0, cfg.capacity, seeds).unwrap()
}

fn tribe(count: usize, pattern: SpawnPattern, genes: GeneOverrides) -> TribeConfig {
    TribeConfig {
        spawn: SpawnConfig {
            count,
            pattern,
            ..SpawnConfig::default()
        },
        genes,
        ..TribeConfig::default()
    }
}

#[test]
fn peaceful_tribes_record_zero_kills() {
    let pacifist = GeneOverrides {
        aggression: Some(0.0),
        diet: Some(-1.0),
        ..GeneOverrides::default()
    };
    let cfg = SimConfig {
        seed: 101,
        capacity: 1024,
        tribes: vec![
            tribe(60, SpawnPattern::Scattered, pacifist),
            tribe(60, SpawnPattern::Scattered, pacifist),
        ],
        ..SimConfig::default()
    };
    let mut w = build_world(cfg);
    let dt = 1.0 / 60.0;
    for _ in 0..600 {
        w.tick(dt).unwrap();
    }
    let stats = w.stats();
    assert_eq!(stats.kills, 0, "pacifists must never fight");
}

#[test]
fn no_food_no_reproduction_declines_to_extinction() {
    let sterile = GeneOverrides {
        repro_chance: Some(0.0),
        metabolism: Some(1.0),
        ..GeneOverrides::default()
    };
    let mut cfg = SimConfig {
        seed: 7,
        capacity: 256,
        tribes: vec![tribe(40, SpawnPattern::Blob, sterile)],
        ..SimConfig::default()
    };
    cfg.food.capacity = 0.0;
    cfg.food.initial_fill = 0.0;
    let mut w = build_world(cfg);
    let dt = 1.0 / 60.0;
    let mut last_population = w.stats().population;
    let mut ticks = 0u32;
    while w.stats().population > 0 && ticks < 20_000 {
        w.tick(dt).unwrap();
        let p = w.stats().population;
        assert!(p <= last_population, "population must decline monotonically");
        last_population = p;
        ticks += 1;
    }
    assert_eq!(w.stats().population, 0, "everyone starves eventually");
    let stats = w.stats();
    assert_eq!(stats.deaths, stats.kills + stats.starved);
    assert!(stats.starved >= 40 - stats.kills);
}

#[test]
fn stats_tribe_breakdown_matches_population() {
    let cfg = SimConfig {
        seed: 33,
        capacity: 512,
        tribes: vec![
            tribe(30, SpawnPattern::Herd, GeneOverrides::default()),
            tribe(30, SpawnPattern::Blob, GeneOverrides::default()),
            tribe(30, SpawnPattern::DietAdaptive, GeneOverrides::default()),
        ],
        ..SimConfig::default()
    };
    let mut w = build_world(cfg);
    let dt = 1.0 / 60.0;
    for _ in 0..180 {
        w.tick(dt).unwrap();
    }
    let stats = w.stats();
    let by_tribe_total: u32 = stats.by_tribe.iter().sum();
    assert_eq!(by_tribe_total, stats.population);
    assert_eq!(stats.by_tribe.len(), 3);
}

#[test]
fn hybridization_run_stays_coherent() {
    let cfg = SimConfig {
        seed: 55,
        capacity: 512,
        hybridization: true,
        tribes: vec![
            tribe(40, SpawnPattern::Blob, GeneOverrides::default()),
            tribe(40, SpawnPattern::Blob, GeneOverrides::default()),
        ],
        ..SimConfig::default()
    };
    let mut w = build_world(cfg);
    let dt = 1.0 / 60.0;
    for _ in 0..300 {
        let out = w.tick(dt).unwrap();
        assert_eq!(out.report.deaths, out.report.kills + out.report.starved);
    }
    // Tribe ids in the store stay within the configured range.
    let stats = w.stats();
    let by_tribe_total: u32 = stats.by_tribe.iter().sum();
    assert_eq!(by_tribe_total, stats.population);
}
