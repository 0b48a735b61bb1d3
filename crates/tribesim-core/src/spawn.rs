//! Initial tribe placement.
//!
//! All seeds are generated on the coordinator from the world seed, then
//! routed to whichever partition owns the landing point, so placement is
//! independent of the worker count.

use std::f32::consts::TAU;

use rand::{Rng, rngs::SmallRng};

use crate::biome::BiomeField;
use crate::gene::TribeSpec;
use crate::store::EntitySeed;
use crate::{SimConfig, SpawnPattern, TribeConfig, wrap_coord};

const PLACEMENT_TRIES: usize = 24;

/// Generate the spawn seeds for one tribe.
pub fn tribe_seeds(
    tribe_idx: u16,
    tribe: &TribeConfig,
    spec: &TribeSpec,
    cfg: &SimConfig,
    biome: &BiomeField,
    rng: &mut SmallRng,
) -> Vec<EntitySeed> {
    let center = tribe
        .spawn
        .position
        .map(|(x, y)| {
            (
                wrap_coord(x, cfg.world_width),
                wrap_coord(y, cfg.world_height),
            )
        })
        .filter(|&(x, y)| biome.is_traversable(x, y))
        .unwrap_or_else(|| traversable_point(biome, cfg, rng));

    let mut seeds = Vec::with_capacity(tribe.spawn.count);
    let radius = tribe.spawn.radius;
    let herbivore = spec.archetype.diet < 0.0;

    // Herd pattern: a handful of tight clusters inside the spawn radius.
    let cluster_count = (tribe.spawn.count / 16).max(1);
    let clusters: Vec<(f32, f32)> = (0..cluster_count)
        .map(|_| jitter_disc(center, radius, cfg, biome, rng))
        .collect();

    for k in 0..tribe.spawn.count {
        let (x, y) = match tribe.spawn.pattern {
            SpawnPattern::Blob => jitter_disc(center, radius, cfg, biome, rng),
            SpawnPattern::Scattered => traversable_point(biome, cfg, rng),
            SpawnPattern::Herd => {
                let c = clusters[k % clusters.len()];
                jitter_disc(c, (radius / 6.0).max(10.0), cfg, biome, rng)
            }
            SpawnPattern::DietAdaptive => {
                if herbivore {
                    fertile_point(biome, cfg, rng)
                } else {
                    traversable_point(biome, cfg, rng)
                }
            }
        };
        seeds.push(EntitySeed {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            energy: cfg.energy.start,
            age: 0.0,
            tribe: tribe_idx,
            orientation: rng.random_range(0.0..TAU),
            // Jitter the archetype, then re-pin configured overrides so a
            // tribe defined with aggression 0 really spawns at 0.
            genome: tribe.genes.apply(spec.archetype.mutated(rng, 1.0)),
        });
    }
    seeds
}

/// Uniform point in the disc around `center`, rejected onto traversable
/// land; falls back to the center after the try budget.
fn jitter_disc(
    center: (f32, f32),
    radius: f32,
    cfg: &SimConfig,
    biome: &BiomeField,
    rng: &mut SmallRng,
) -> (f32, f32) {
    for _ in 0..PLACEMENT_TRIES {
        let angle = rng.random_range(0.0..TAU);
        let r = radius * rng.random::<f32>().sqrt();
        let x = wrap_coord(center.0 + angle.cos() * r, cfg.world_width);
        let y = wrap_coord(center.1 + angle.sin() * r, cfg.world_height);
        if biome.is_traversable(x, y) {
            return (x, y);
        }
    }
    if biome.is_traversable(center.0, center.1) {
        center
    } else {
        traversable_point(biome, cfg, rng)
    }
}

/// Uniform traversable point anywhere in the world. Falls back to a
/// linear cell scan when rejection sampling runs dry (tiny landmasses).
fn traversable_point(biome: &BiomeField, cfg: &SimConfig, rng: &mut SmallRng) -> (f32, f32) {
    for _ in 0..PLACEMENT_TRIES * 4 {
        let x = rng.random_range(0.0..cfg.world_width);
        let y = rng.random_range(0.0..cfg.world_height);
        if biome.is_traversable(x, y) {
            return (x, y);
        }
    }
    let cells = (biome.cols() * biome.rows()) as usize;
    let start = rng.random_range(0..cells);
    for probe in 0..cells {
        let cell = (start + probe) % cells;
        if biome.cell_traversable(cell) {
            return biome.cell_center(cell);
        }
    }
    // Water world: nothing is traversable, drop the entity mid-map.
    (cfg.world_width * 0.5, cfg.world_height * 0.5)
}

/// Traversable point biased onto fertile biomes (grassland or better).
fn fertile_point(biome: &BiomeField, cfg: &SimConfig, rng: &mut SmallRng) -> (f32, f32) {
    for _ in 0..PLACEMENT_TRIES * 4 {
        let x = rng.random_range(0.0..cfg.world_width);
        let y = rng.random_range(0.0..cfg.world_height);
        let cell = biome.cell_of(x, y);
        if biome.cell_traversable(cell) && biome.cell_food_multiplier(cell) >= 1.0 {
            return (x, y);
        }
    }
    traversable_point(biome, cfg, rng)
}
