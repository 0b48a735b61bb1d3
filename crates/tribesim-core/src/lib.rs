//! Deterministic core of the tribes ecosystem simulation.
//!
//! This crate is pure computation: entity columns, biome and food fields,
//! the behavior/lifecycle tick stages, and per-partition statistics. It
//! owns no threads and no channels; the engine crate composes partition
//! worlds into a coordinator/worker topology on top of this.

pub mod behavior;
pub mod biome;
pub mod food;
pub mod gene;
pub mod lifecycle;
pub mod noise;
pub mod spawn;
pub mod stats;
pub mod store;
pub mod world;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use biome::{Biome, BiomeField, TerrainNoise};
pub use food::FoodField;
pub use gene::{GENE_COUNT, GENE_NAMES, GeneOverrides, Genome, TribeSpec};
pub use stats::{GeneStat, GlobalStats, PartitionStats};
pub use store::{EntitySeed, EntityStore, PARKED, SlotState};
pub use world::{PartitionWorld, TickOutcome};

/// Fatal configuration and construction errors. Recoverable config
/// problems (malformed tribes, bad spawn radii) are defaulted by
/// [`SimConfig::sanitize`] instead.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world extent must be positive (got {width}x{height})")]
    InvalidExtent { width: f32, height: f32 },
    #[error("entity capacity must be nonzero")]
    ZeroCapacity,
    #[error("worker count must be nonzero")]
    ZeroWorkers,
    #[error("food grid resolution must be nonzero")]
    ZeroFoodResolution,
    #[error("neighborhood index failure: {0}")]
    Index(#[from] tribesim_index::IndexError),
}

/// Axis-aligned partition region, half-open on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Region {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Pull a point just inside the region (used on migration refusal).
    pub fn clamp_inside(&self, x: f32, y: f32) -> (f32, f32) {
        let margin_x = (self.width() * 0.01).min(1.0);
        let margin_y = (self.height() * 0.01).min(1.0);
        (
            x.clamp(self.x0 + margin_x, self.x1 - margin_x),
            y.clamp(self.y0 + margin_y, self.y1 - margin_y),
        )
    }

    /// Shortest distance between two regions' rectangles (0 if touching).
    pub fn distance_to(&self, other: &Region) -> f32 {
        let dx = (other.x0 - self.x1).max(self.x0 - other.x1).max(0.0);
        let dy = (other.y0 - self.y1).max(self.y0 - other.y1).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}

/// Wrap a coordinate into [0, extent) on the toroidal world.
#[inline]
pub fn wrap_coord(v: f32, extent: f32) -> f32 {
    let wrapped = v.rem_euclid(extent);
    if wrapped >= extent { 0.0 } else { wrapped }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnPattern {
    /// Uniform disc around the spawn point.
    Blob,
    /// Uniform over the whole world.
    Scattered,
    /// Several tight clusters inside the spawn radius.
    Herd,
    /// Herbivores seeded onto fertile cells, carnivores scattered.
    DietAdaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub count: usize,
    /// Spawn center; `None` picks a traversable point from the seed.
    pub position: Option<(f32, f32)>,
    pub radius: f32,
    pub pattern: SpawnPattern,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            count: 50,
            position: None,
            radius: 150.0,
            pattern: SpawnPattern::Blob,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TribeConfig {
    pub name: String,
    pub color: Option<[f32; 3]>,
    pub spawn: SpawnConfig,
    pub genes: GeneOverrides,
}

impl Default for TribeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: None,
            spawn: SpawnConfig::default(),
            genes: GeneOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FoodConfig {
    /// Cells per axis of the food (and biome) grid.
    pub resolution: u32,
    /// Per-cell capacity before the biome multiplier.
    pub capacity: f32,
    /// Units regrown per second at multiplier 1.
    pub regen: f32,
    /// Fraction of capacity present at t=0.
    pub initial_fill: f32,
    pub terrain: TerrainNoise,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            resolution: 128,
            capacity: 100.0,
            regen: 4.0,
            initial_fill: 0.75,
            terrain: TerrainNoise::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub start: f32,
    pub max: f32,
    /// Minimum energy required to attempt reproduction.
    pub reproduction_threshold: f32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            start: 60.0,
            max: 100.0,
            reproduction_threshold: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub world_width: f32,
    pub world_height: f32,
    /// Total entity slots across all partitions.
    pub capacity: usize,
    pub workers: usize,
    /// Simulation ticks per second of simulated time.
    pub tick_rate: f32,
    pub seed: u64,
    pub food: FoodConfig,
    pub energy: EnergyConfig,
    pub tribes: Vec<TribeConfig>,
    /// Allow cross-tribe reproduction with gene crossover.
    pub hybridization: bool,
    /// Width of the boundary strip published to neighboring partitions.
    pub ghost_margin: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_width: 2000.0,
            world_height: 2000.0,
            capacity: 4096,
            workers: 4,
            tick_rate: 60.0,
            seed: 0,
            food: FoodConfig::default(),
            energy: EnergyConfig::default(),
            tribes: Vec::new(),
            hybridization: false,
            ghost_margin: 100.0,
        }
    }
}

const PALETTE: [[f32; 3]; 8] = [
    [0.90, 0.30, 0.25],
    [0.25, 0.55, 0.95],
    [0.30, 0.80, 0.40],
    [0.95, 0.80, 0.20],
    [0.70, 0.35, 0.90],
    [0.25, 0.85, 0.85],
    [0.95, 0.55, 0.20],
    [0.85, 0.45, 0.65],
];

impl SimConfig {
    /// Structural validation. Failures here abort initialization; softer
    /// problems are repaired by [`sanitize`](Self::sanitize).
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.world_width > 0.0) || !(self.world_height > 0.0) {
            return Err(WorldError::InvalidExtent {
                width: self.world_width,
                height: self.world_height,
            });
        }
        if self.capacity == 0 {
            return Err(WorldError::ZeroCapacity);
        }
        if self.workers == 0 {
            return Err(WorldError::ZeroWorkers);
        }
        if self.food.resolution == 0 {
            return Err(WorldError::ZeroFoodResolution);
        }
        Ok(())
    }

    /// Repair recoverable problems in place, returning a human-readable
    /// note per repair so the caller can log them.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.tribes.is_empty() {
            self.tribes.push(TribeConfig::default());
            notes.push("no tribes configured; added one default tribe".into());
        }
        if !(self.tick_rate > 0.0) || !self.tick_rate.is_finite() {
            notes.push(format!("tick_rate {} invalid; using 60", self.tick_rate));
            self.tick_rate = 60.0;
        }
        if !(self.ghost_margin > 0.0) || !self.ghost_margin.is_finite() {
            notes.push(format!(
                "ghost_margin {} invalid; using 100",
                self.ghost_margin
            ));
            self.ghost_margin = 100.0;
        }
        if !(self.food.capacity >= 0.0) || !self.food.capacity.is_finite() {
            notes.push(format!(
                "food capacity {} invalid; using default",
                self.food.capacity
            ));
            self.food.capacity = FoodConfig::default().capacity;
        }
        if !(self.food.regen >= 0.0) || !self.food.regen.is_finite() {
            notes.push(format!("food regen {} invalid; using default", self.food.regen));
            self.food.regen = FoodConfig::default().regen;
        }
        self.food.initial_fill = if self.food.initial_fill.is_finite() {
            self.food.initial_fill.clamp(0.0, 1.0)
        } else {
            FoodConfig::default().initial_fill
        };
        if !(self.energy.max > 0.0) || !self.energy.max.is_finite() {
            notes.push(format!(
                "energy max {} invalid; using default",
                self.energy.max
            ));
            self.energy.max = EnergyConfig::default().max;
        }
        self.energy.start = self.energy.start.clamp(1.0, self.energy.max);
        self.energy.reproduction_threshold =
            self.energy.reproduction_threshold.clamp(1.0, self.energy.max);

        let total: usize = self.tribes.iter().map(|t| t.spawn.count).sum();
        if total > self.capacity {
            notes.push(format!(
                "tribe spawn counts ({total}) exceed capacity ({}); scaling down",
                self.capacity
            ));
            let scale = self.capacity as f64 / total as f64;
            for tribe in &mut self.tribes {
                tribe.spawn.count = (tribe.spawn.count as f64 * scale).floor() as usize;
            }
        }
        for (i, tribe) in self.tribes.iter_mut().enumerate() {
            if tribe.name.is_empty() {
                tribe.name = format!("tribe-{i}");
            }
            // Zero is valid: spawn exactly at the configured point.
            if !(tribe.spawn.radius >= 0.0) || !tribe.spawn.radius.is_finite() {
                notes.push(format!(
                    "tribe {} spawn radius invalid; using default",
                    tribe.name
                ));
                tribe.spawn.radius = SpawnConfig::default().radius;
            }
            if let Some((x, y)) = tribe.spawn.position
                && (!x.is_finite() || !y.is_finite())
            {
                notes.push(format!(
                    "tribe {} spawn position non-finite; picking from seed",
                    tribe.name
                ));
                tribe.spawn.position = None;
            }
        }
        notes
    }

    /// Resolve tribe configs into runtime specs (palette colors filled in,
    /// overrides applied to the default archetype).
    pub fn tribe_specs(&self) -> Vec<TribeSpec> {
        self.tribes
            .iter()
            .enumerate()
            .map(|(i, t)| TribeSpec {
                name: t.name.clone(),
                color: t.color.unwrap_or(PALETTE[i % PALETTE.len()]),
                archetype: t.genes.apply(Genome::default()),
            })
            .collect()
    }

    /// Fixed simulation timestep in seconds.
    pub fn fixed_dt(&self) -> f32 {
        1.0 / self.tick_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_extent_is_fatal() {
        let cfg = SimConfig {
            world_width: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(WorldError::InvalidExtent { .. })
        ));
    }

    #[test]
    fn sanitize_repairs_empty_tribes_and_bad_food() {
        let mut cfg = SimConfig {
            tribes: Vec::new(),
            ..SimConfig::default()
        };
        cfg.food.capacity = f32::NAN;
        cfg.food.regen = -3.0;
        let notes = cfg.sanitize();
        assert_eq!(cfg.tribes.len(), 1);
        assert!(cfg.food.capacity > 0.0);
        assert!(cfg.food.regen >= 0.0);
        assert!(notes.len() >= 3);
    }

    #[test]
    fn sanitize_keeps_zero_radius_point_spawns() {
        let mut cfg = SimConfig::default();
        cfg.tribes = vec![TribeConfig {
            spawn: SpawnConfig {
                position: Some((10.0, 10.0)),
                radius: 0.0,
                ..SpawnConfig::default()
            },
            ..TribeConfig::default()
        }];
        cfg.sanitize();
        assert_eq!(cfg.tribes[0].spawn.radius, 0.0);

        cfg.tribes[0].spawn.radius = -5.0;
        let notes = cfg.sanitize();
        assert_eq!(cfg.tribes[0].spawn.radius, SpawnConfig::default().radius);
        assert!(notes.iter().any(|n| n.contains("radius")));
    }

    #[test]
    fn sanitize_scales_overcommitted_spawns() {
        let mut cfg = SimConfig {
            capacity: 100,
            ..SimConfig::default()
        };
        cfg.tribes = vec![
            TribeConfig {
                spawn: SpawnConfig {
                    count: 90,
                    ..SpawnConfig::default()
                },
                ..TribeConfig::default()
            },
            TribeConfig {
                spawn: SpawnConfig {
                    count: 90,
                    ..SpawnConfig::default()
                },
                ..TribeConfig::default()
            },
        ];
        cfg.sanitize();
        let total: usize = cfg.tribes.iter().map(|t| t.spawn.count).sum();
        assert!(total <= 100);
    }

    #[test]
    fn tribe_specs_fill_palette_colors_and_names() {
        let mut cfg = SimConfig {
            tribes: vec![TribeConfig::default(), TribeConfig::default()],
            ..SimConfig::default()
        };
        cfg.sanitize();
        let specs = cfg.tribe_specs();
        assert_eq!(specs[0].name, "tribe-0");
        assert_ne!(specs[0].color, specs[1].color);
    }

    #[test]
    fn region_geometry() {
        let a = Region {
            x0: 0.0,
            y0: 0.0,
            x1: 100.0,
            y1: 100.0,
        };
        let b = Region {
            x0: 100.0,
            y0: 0.0,
            x1: 200.0,
            y1: 100.0,
        };
        assert!(a.contains(0.0, 0.0));
        assert!(!a.contains(100.0, 50.0));
        assert_eq!(a.distance_to(&b), 0.0);
        let (cx, cy) = a.clamp_inside(250.0, -10.0);
        assert!(a.contains(cx, cy));
    }

    #[test]
    fn wrap_coord_stays_in_range() {
        assert_eq!(wrap_coord(5.0, 100.0), 5.0);
        assert_eq!(wrap_coord(-5.0, 100.0), 95.0);
        assert_eq!(wrap_coord(105.0, 100.0), 5.0);
        let w = wrap_coord(-1e-7, 100.0);
        assert!((0.0..100.0).contains(&w));
    }
}
