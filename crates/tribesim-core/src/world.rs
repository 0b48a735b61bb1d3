//! One partition's complete simulation state and staged tick.
//!
//! A `PartitionWorld` owns its entity store segment, a full biome field
//! (regenerated deterministically from the world seed), the food grid
//! restricted to its owned cells, the neighborhood index and a seeded RNG
//! stream. The engine drives one of these per worker thread; nothing in
//! here knows about threads or channels.

use rand::{SeedableRng, rngs::SmallRng};
use rayon::prelude::*;

use tribesim_index::{GridConfig, NeighborhoodIndex, SpatialHashGrid};

use crate::behavior::{self, BehaviorInputs, Decision, GhostEntity};
use crate::biome::BiomeField;
use crate::food::FoodField;
use crate::gene::TribeSpec;
use crate::lifecycle::{self, LifecycleEnv, TickReport};
use crate::stats::{self, PartitionStats};
use crate::store::{EntitySeed, EntityStore};
use crate::{Region, SimConfig, WorldError};

/// Result of one tick: the per-tick report plus migration candidates
/// (already marked in-flight, snapshots ready to route).
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub report: TickReport,
    pub departures: Vec<(usize, EntitySeed)>,
}

pub struct PartitionWorld {
    id: usize,
    region: Region,
    cfg_world_w: f32,
    cfg_world_h: f32,
    energy: crate::EnergyConfig,
    hybridization: bool,
    ghost_margin: f32,
    tribes: Vec<TribeSpec>,
    store: EntityStore,
    biome: BiomeField,
    food: FoodField,
    owned_cells: Vec<u32>,
    owned_mask: Vec<bool>,
    index: SpatialHashGrid,
    ghosts: Vec<GhostEntity>,
    decisions: Vec<Decision>,
    rng: SmallRng,
    rng_stream: u64,
    tick: u64,
    time: f64,
    /// Time at which the partition last became empty. Stats report this
    /// frozen value instead of the still-advancing clock, so the merged
    /// extinction time is the time of the last death rather than the
    /// time of the stats push that noticed it.
    empty_since: Option<f64>,
    totals: TickReport,
}

impl PartitionWorld {
    /// Build one partition. `base`/`capacity` delimit its slot range;
    /// `seeds` are the initial entities routed into this region.
    pub fn new(
        cfg: &SimConfig,
        id: usize,
        region: Region,
        base: usize,
        capacity: usize,
        seeds: Vec<EntitySeed>,
    ) -> Result<Self, WorldError> {
        cfg.validate()?;
        let biome = BiomeField::generate(
            cfg.seed,
            cfg.world_width,
            cfg.world_height,
            cfg.food.resolution,
            cfg.food.terrain,
        );
        let food = FoodField::new(&cfg.food, cfg.world_width, cfg.world_height, &biome);

        let total_cells = (food.cols() * food.rows()) as usize;
        let mut owned_cells = Vec::new();
        let mut owned_mask = vec![false; total_cells];
        for cell in 0..total_cells {
            let (cx, cy) = food.cell_center(cell);
            if region.contains(cx, cy) {
                owned_cells.push(cell as u32);
                owned_mask[cell] = true;
            }
        }

        let mut store = EntityStore::new(base, capacity);
        for seed in seeds {
            // Routed seeds beyond this partition's capacity are dropped.
            let _ = store.spawn(seed);
        }

        let index = SpatialHashGrid::new(GridConfig {
            width: cfg.world_width,
            height: cfg.world_height,
            cell_size: 50.0,
        })?;

        let rng_stream = cfg.seed ^ (id as u64).wrapping_mul(0xd134_2543_de82_ef95);
        let empty_since = (store.live_count() == 0).then_some(0.0);
        Ok(Self {
            id,
            region,
            cfg_world_w: cfg.world_width,
            cfg_world_h: cfg.world_height,
            energy: cfg.energy,
            hybridization: cfg.hybridization,
            ghost_margin: cfg.ghost_margin,
            tribes: cfg.tribe_specs(),
            store,
            biome,
            food,
            owned_cells,
            owned_mask,
            index,
            ghosts: Vec::new(),
            decisions: Vec::new(),
            rng: SmallRng::seed_from_u64(rng_stream),
            rng_stream,
            tick: 0,
            time: 0.0,
            empty_since,
            totals: TickReport::default(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn food(&self) -> &FoodField {
        &self.food
    }

    pub fn tribes(&self) -> &[TribeSpec] {
        &self.tribes
    }

    pub fn owned_cells(&self) -> &[u32] {
        &self.owned_cells
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Replace the ghost set before the next tick.
    pub fn set_ghosts(&mut self, ghosts: Vec<GhostEntity>) {
        self.ghosts = ghosts;
    }

    /// Snapshot of live entities within the ghost margin of the region
    /// boundary, for publication to neighboring partitions.
    pub fn border_snapshot(&self) -> Vec<GhostEntity> {
        let m = self.ghost_margin;
        let r = self.region;
        self.store
            .live_indices()
            .filter(|&i| {
                let x = self.store.positions_x()[i];
                let y = self.store.positions_y()[i];
                x - r.x0 < m || r.x1 - x < m || y - r.y0 < m || r.y1 - y < m
            })
            .map(|i| {
                let genome = self.store.genomes()[i];
                GhostEntity {
                    x: self.store.positions_x()[i],
                    y: self.store.positions_y()[i],
                    vx: self.store.velocities_x()[i],
                    vy: self.store.velocities_y()[i],
                    energy: self.store.energies()[i],
                    tribe: self.store.tribes()[i],
                    aggression: genome.aggression,
                    speed: genome.speed,
                }
            })
            .collect()
    }

    /// Advance one fixed timestep.
    pub fn tick(&mut self, dt: f32) -> Result<TickOutcome, WorldError> {
        let capacity = self.store.capacity();
        let live: Vec<bool> = (0..capacity).map(|i| self.store.is_live(i)).collect();
        self.index
            .rebuild(self.store.positions_x(), self.store.positions_y(), &live)?;

        // Parallel pure decision pass over a snapshot of the columns.
        let inputs = BehaviorInputs {
            store: &self.store,
            index: &self.index,
            ghosts: &self.ghosts,
            biome: &self.biome,
            world_w: self.cfg_world_w,
            world_h: self.cfg_world_h,
            energy_max: self.energy.max,
            tick: self.tick,
            stream: self.rng_stream,
        };
        let decisions: Vec<Decision> = (0..capacity)
            .into_par_iter()
            .map(|i| {
                if live[i] {
                    behavior::decide(i, &inputs, dt)
                } else {
                    Decision::default()
                }
            })
            .collect();
        self.decisions = decisions;

        // Sequential commit.
        let env = LifecycleEnv {
            region: self.region,
            world_w: self.cfg_world_w,
            world_h: self.cfg_world_h,
            energy: self.energy,
            hybridization: self.hybridization,
            owned_cells: &self.owned_mask,
        };
        let (report, departed) = lifecycle::apply(
            &mut self.store,
            &self.decisions,
            &self.index,
            &mut self.food,
            &self.biome,
            &env,
            dt,
            &mut self.rng,
        );

        self.food.regen_cells(&self.owned_cells, dt);

        let mut departures = Vec::with_capacity(departed.len());
        for slot in departed {
            if let Some(snapshot) = self.store.begin_migration(slot) {
                departures.push((slot, snapshot));
            }
        }

        self.totals.births += report.births;
        self.totals.deaths += report.deaths;
        self.totals.kills += report.kills;
        self.totals.starved += report.starved;
        self.totals.defections += report.defections;
        self.tick += 1;
        self.time += f64::from(dt);
        if self.store.live_count() == 0 {
            if self.empty_since.is_none() {
                self.empty_since = Some(self.time);
            }
        } else {
            self.empty_since = None;
        }

        Ok(TickOutcome {
            report,
            departures,
        })
    }

    /// Admit a migrating entity. `None` means no free slot (refusal).
    pub fn admit(&mut self, seed: EntitySeed) -> Option<usize> {
        let slot = self.store.spawn(seed);
        if slot.is_some() {
            self.empty_since = None;
        }
        slot
    }

    /// The destination accepted our departure: free the slot for reuse.
    pub fn release(&mut self, slot: usize) {
        self.store.complete_release(slot);
    }

    /// The destination refused: clamp the entity back inside the region
    /// and resume ticking it.
    pub fn reinstate(&mut self, slot: usize) {
        let x = self.store.positions_x()[slot];
        let y = self.store.positions_y()[slot];
        let (cx, cy) = self.region.clamp_inside(x, y);
        self.store.reinstate(slot, cx, cy);
        self.empty_since = None;
    }

    pub fn update_food_params(&mut self, capacity: Option<f32>, regen: Option<f32>) {
        self.food.update_params(capacity, regen);
    }

    /// Current stats snapshot; lifecycle totals accumulate since startup.
    pub fn stats(&self) -> PartitionStats {
        stats::partition_stats(
            self.id,
            &self.store,
            self.tribes.len(),
            &self.totals,
            self.food.occupancy(&self.owned_cells),
            self.empty_since.unwrap_or(self.time),
            self.tick,
        )
    }
}
