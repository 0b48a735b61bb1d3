//! Per-entity decision pass.
//!
//! `decide` is a pure function of the previous tick's state: it reads the
//! entity columns, the neighborhood index, the ghost snapshots from
//! adjacent partitions and the biome field, and produces a `Decision`
//! without touching any of them. That makes the pass trivially
//! parallelizable; the lifecycle stage commits the decisions afterwards.
//!
//! Randomness comes from a splitmix64 stream keyed on (partition stream,
//! tick, entity), so decisions are deterministic for a seed and identical
//! regardless of rayon's scheduling.

use serde::{Deserialize, Serialize};
use tribesim_index::{NeighborhoodIndex, SpatialHashGrid};

use crate::biome::BiomeField;
use crate::store::EntityStore;
use crate::wrap_coord;

const MAX_NEIGHBORS: usize = 20;
/// Squared distance under which ally separation kicks in.
const SEPARATION_DIST_SQ: f32 = 400.0;
const SEPARATION_WEIGHT: f32 = 2.0;
const ALIGNMENT_WEIGHT: f32 = 0.5;
const COHESION_WEIGHT: f32 = 0.3;
const FLEE_WEIGHT: f32 = 1.5;
const WANDER_WEIGHT: f32 = 0.1;
const STEER_RATE: f32 = 10.0;
/// Energy fraction under which an entity is desperate: flees sooner,
/// ignores food pickiness, considers defecting.
pub const DESPERATION_FRACTION: f32 = 0.3;
/// Minimum target energy for a fight to be worth starting.
const MIN_FIGHT_ENERGY: f32 = 5.0;

/// Read-only snapshot of a boundary entity from a neighboring partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GhostEntity {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub energy: f32,
    pub tribe: u16,
    pub aggression: f32,
    pub speed: f32,
}

/// Everything the decision pass may read.
pub struct BehaviorInputs<'a> {
    pub store: &'a EntityStore,
    pub index: &'a SpatialHashGrid,
    pub ghosts: &'a [GhostEntity],
    pub biome: &'a BiomeField,
    pub world_w: f32,
    pub world_h: f32,
    pub energy_max: f32,
    pub tick: u64,
    /// Per-partition salt for the decision RNG stream.
    pub stream: u64,
}

/// Intent produced for one entity; committed by the lifecycle stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decision {
    pub vx: f32,
    pub vy: f32,
    /// Local slot of an enemy to attack this tick.
    pub fight_target: Option<usize>,
    /// Tribe to switch allegiance to.
    pub defect_to: Option<u16>,
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Deterministic uniform sample stream for one (entity, tick).
struct DecisionRng {
    state: u64,
}

impl DecisionRng {
    fn new(stream: u64, tick: u64, entity: usize) -> Self {
        let state = splitmix64(stream ^ tick.wrapping_mul(0xa076_1d64_78bd_642f))
            ^ splitmix64(entity as u64 ^ 0xe703_7ed1_a0b4_28db);
        Self { state }
    }

    fn u01(&mut self) -> f32 {
        self.state = splitmix64(self.state);
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

struct NeighborTally {
    allies: u32,
    enemies: u32,
    align_x: f32,
    align_y: f32,
    cohere_x: f32,
    cohere_y: f32,
    separate_x: f32,
    separate_y: f32,
    flee_x: f32,
    flee_y: f32,
    // dominant enemy tribe, tracked with a small fixed histogram
    enemy_tribes: [(u16, u32); 4],
    best_prey: Option<(f32, f32)>,
    best_prey_score: f32,
    nearest_enemy: Option<usize>,
    nearest_enemy_dist_sq: f32,
    stored: usize,
}

impl NeighborTally {
    fn new() -> Self {
        Self {
            allies: 0,
            enemies: 0,
            align_x: 0.0,
            align_y: 0.0,
            cohere_x: 0.0,
            cohere_y: 0.0,
            separate_x: 0.0,
            separate_y: 0.0,
            flee_x: 0.0,
            flee_y: 0.0,
            enemy_tribes: [(0, 0); 4],
            best_prey: None,
            best_prey_score: f32::MAX,
            nearest_enemy: None,
            nearest_enemy_dist_sq: f32::MAX,
            stored: 0,
        }
    }

    fn note_enemy_tribe(&mut self, tribe: u16) {
        for slot in &mut self.enemy_tribes {
            if slot.1 > 0 && slot.0 == tribe {
                slot.1 += 1;
                return;
            }
        }
        for slot in &mut self.enemy_tribes {
            if slot.1 == 0 {
                *slot = (tribe, 1);
                return;
            }
        }
    }

    fn dominant_enemy_tribe(&self) -> Option<u16> {
        self.enemy_tribes
            .iter()
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(_, n)| *n)
            .map(|(t, _)| *t)
    }
}

struct Perception {
    px: f32,
    py: f32,
    my_tribe: u16,
    my_aggression: f32,
    effective_speed: f32,
    vision_sq: f32,
    hunt_vision_sq: f32,
    should_hunt: bool,
    hunting_threshold: f32,
    view_dir: (f32, f32),
    view_cos: f32,
    desperate: f32,
}

impl Perception {
    /// Shared per-neighbor bookkeeping for local and ghost entities.
    /// `local_slot` is `None` for ghosts, which can be fled from, flocked
    /// with and hunted, but never chosen as a fight target.
    #[allow(clippy::too_many_arguments)]
    fn observe(
        &self,
        tally: &mut NeighborTally,
        local_slot: Option<usize>,
        x: f32,
        y: f32,
        vx: f32,
        vy: f32,
        energy: f32,
        tribe: u16,
        aggression: f32,
        speed: f32,
    ) {
        let dx = x - self.px;
        let dy = y - self.py;
        let dist_sq = dx * dx + dy * dy;
        if dist_sq > self.hunt_vision_sq || dist_sq <= 1e-6 {
            return;
        }
        let dist = dist_sq.sqrt();
        let dot = (dx * self.view_dir.0 + dy * self.view_dir.1) / dist;
        let in_view = dot > self.view_cos;
        // Outside the view cone only very close neighbors register.
        if !in_view && dist_sq > self.vision_sq * 0.25 {
            return;
        }

        let is_ally = tribe == self.my_tribe;
        if dist_sq < self.vision_sq && tally.stored < MAX_NEIGHBORS {
            tally.stored += 1;
            if is_ally {
                tally.allies += 1;
                tally.align_x += vx;
                tally.align_y += vy;
                tally.cohere_x += x;
                tally.cohere_y += y;
                if dist_sq < SEPARATION_DIST_SQ {
                    let sep = 1.0 / dist;
                    tally.separate_x -= dx * sep;
                    tally.separate_y -= dy * sep;
                }
            } else {
                tally.enemies += 1;
                tally.note_enemy_tribe(tribe);
                let threat = aggression * (energy / 100.0);
                if threat > self.my_aggression * 0.7 || self.desperate > 0.0 {
                    tally.flee_x -= dx / dist * threat.max(0.3);
                    tally.flee_y -= dy / dist * threat.max(0.3);
                }
                if let Some(slot) = local_slot
                    && energy > MIN_FIGHT_ENERGY
                    && dist_sq < tally.nearest_enemy_dist_sq
                {
                    tally.nearest_enemy = Some(slot);
                    tally.nearest_enemy_dist_sq = dist_sq;
                }
            }
        }

        if self.should_hunt && !is_ally && in_view {
            let catch_probability = if speed > 0.0 {
                (self.effective_speed / speed).min(1.0)
            } else {
                1.0
            };
            let score = dist_sq / (energy * catch_probability + 1.0);
            if score < tally.best_prey_score {
                tally.best_prey_score = score;
                tally.best_prey = Some((dx, dy));
            }
        }
    }
}

/// Decide one entity's next velocity and discrete intents. Pure.
pub fn decide(i: usize, ctx: &BehaviorInputs<'_>, dt: f32) -> Decision {
    let store = ctx.store;
    let px = store.positions_x()[i];
    let py = store.positions_y()[i];
    let vx = store.velocities_x()[i];
    let vy = store.velocities_y()[i];
    let genome = store.genomes()[i];
    let my_energy = store.energies()[i];
    let my_tribe = store.tribes()[i];

    let effective_speed = genome.effective_speed();
    let carnivore = genome.diet.max(0.0);
    let hunting_threshold = 95.0 - carnivore * 35.0;
    let should_hunt = carnivore > 0.2 && my_energy < hunting_threshold;
    let vision = genome.vision;
    let hunt_vision = if should_hunt { vision * 1.5 } else { vision };

    let orientation = if vx != 0.0 || vy != 0.0 {
        vy.atan2(vx)
    } else {
        store.genomes()[i].view_angle // arbitrary but deterministic
    };
    let desperate = if my_energy < DESPERATION_FRACTION * ctx.energy_max {
        1.0
    } else {
        0.0
    };

    let view = Perception {
        px,
        py,
        my_tribe,
        my_aggression: genome.aggression,
        effective_speed,
        vision_sq: vision * vision,
        hunt_vision_sq: hunt_vision * hunt_vision,
        should_hunt,
        hunting_threshold,
        view_dir: (orientation.cos(), orientation.sin()),
        view_cos: (genome.view_angle_radians() / 2.0).cos(),
        desperate,
    };

    let mut tally = NeighborTally::new();
    ctx.index.neighbors_within((px, py), hunt_vision, &mut |j, _| {
        if j == i || !store.is_live(j) {
            return;
        }
        view.observe(
            &mut tally,
            Some(j),
            store.positions_x()[j],
            store.positions_y()[j],
            store.velocities_x()[j],
            store.velocities_y()[j],
            store.energies()[j],
            store.tribes()[j],
            store.genomes()[j].aggression,
            store.genomes()[j].speed,
        );
    });
    for ghost in ctx.ghosts {
        view.observe(
            &mut tally,
            None,
            ghost.x,
            ghost.y,
            ghost.vx,
            ghost.vy,
            ghost.energy,
            ghost.tribe,
            ghost.aggression,
            ghost.speed,
        );
    }

    let mut steer_x = 0.0;
    let mut steer_y = 0.0;

    if tally.allies > 0 {
        if tally.allies > 1 {
            let ax = tally.align_x / tally.allies as f32;
            let ay = tally.align_y / tally.allies as f32;
            let mag = (ax * ax + ay * ay).sqrt();
            if mag > 1e-3 {
                steer_x += ax / mag * genome.cohesion * ALIGNMENT_WEIGHT;
                steer_y += ay / mag * genome.cohesion * ALIGNMENT_WEIGHT;
            }
        }
        let cx = tally.cohere_x / tally.allies as f32 - px;
        let cy = tally.cohere_y / tally.allies as f32 - py;
        let mag = (cx * cx + cy * cy).sqrt();
        if mag > 1e-3 {
            steer_x += cx / mag * genome.cohesion * COHESION_WEIGHT;
            steer_y += cy / mag * genome.cohesion * COHESION_WEIGHT;
        }
    }

    let sep_mag = (tally.separate_x * tally.separate_x + tally.separate_y * tally.separate_y).sqrt();
    if sep_mag > 1e-3 {
        steer_x += tally.separate_x / sep_mag * SEPARATION_WEIGHT;
        steer_y += tally.separate_y / sep_mag * SEPARATION_WEIGHT;
    }

    let flee_mag = (tally.flee_x * tally.flee_x + tally.flee_y * tally.flee_y).sqrt();
    if flee_mag > 1e-3 {
        steer_x += tally.flee_x / flee_mag * FLEE_WEIGHT;
        steer_y += tally.flee_y / flee_mag * FLEE_WEIGHT;
    }

    if let Some((dx, dy)) = tally.best_prey {
        let dist = (dx * dx + dy * dy).sqrt();
        if dist > 1e-3 {
            let desperation =
                ((view.hunting_threshold - my_energy) / view.hunting_threshold).max(0.0);
            let force = 3.0 + desperation * 2.0;
            steer_x += dx / dist * force;
            steer_y += dy / dist * force;
        }
    }

    let mut rng = DecisionRng::new(ctx.stream, ctx.tick, i);
    // Wander fades as the flock thickens.
    let wander = WANDER_WEIGHT / (1.0 + tally.allies as f32 * 0.25);
    let wander_angle = rng.u01() * std::f32::consts::TAU;
    steer_x += wander_angle.cos() * wander;
    steer_y += wander_angle.sin() * wander;

    let mut nvx = vx + steer_x * dt * STEER_RATE;
    let mut nvy = vy + steer_y * dt * STEER_RATE;
    let mag = (nvx * nvx + nvy * nvy).sqrt();
    if mag > effective_speed && mag > 0.0 {
        nvx = nvx / mag * effective_speed;
        nvy = nvy / mag * effective_speed;
    }

    (nvx, nvy) = deflect(ctx, px, py, nvx, nvy, dt);

    // Discrete intents.
    let mut fight_target = None;
    if let Some(enemy) = tally.nearest_enemy {
        let ally_ratio = tally.allies as f32 / tally.enemies.max(1) as f32;
        let p = genome.aggression * (my_energy / 100.0) * ally_ratio.min(3.0) * dt;
        if rng.u01() < p {
            fight_target = Some(enemy);
        }
    }

    let mut defect_to = None;
    if desperate > 0.0
        && tally.enemies > tally.allies * 2
        && let Some(tribe) = tally.dominant_enemy_tribe()
        && rng.u01() < 0.01 * dt
    {
        defect_to = Some(tribe);
    }

    Decision {
        vx: nvx,
        vy: nvy,
        fight_target,
        defect_to,
    }
}

/// Reject candidate positions that land in impassable terrain: try the
/// full step, then each axis alone, then a reversal.
fn deflect(ctx: &BehaviorInputs<'_>, px: f32, py: f32, vx: f32, vy: f32, dt: f32) -> (f32, f32) {
    let step = |vx: f32, vy: f32| {
        (
            wrap_coord(px + vx * dt, ctx.world_w),
            wrap_coord(py + vy * dt, ctx.world_h),
        )
    };
    let (nx, ny) = step(vx, vy);
    if ctx.biome.is_traversable(nx, ny) {
        return (vx, vy);
    }
    let (nx, _) = step(vx, 0.0);
    if ctx.biome.is_traversable(nx, py) {
        return (vx, 0.0);
    }
    let (_, ny) = step(0.0, vy);
    if ctx.biome.is_traversable(px, ny) {
        return (0.0, vy);
    }
    let (nx, ny) = step(-vx, -vy);
    if ctx.biome.is_traversable(nx, ny) {
        return (-vx, -vy);
    }
    (0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::Genome;
    use crate::store::EntitySeed;
    use crate::{SimConfig, TerrainNoise};
    use tribesim_index::GridConfig;

    struct Fixture {
        store: EntityStore,
        index: SpatialHashGrid,
        biome: BiomeField,
        cfg: SimConfig,
    }

    fn open_spot(biome: &BiomeField) -> (f32, f32) {
        // A cell whose 3x3 neighborhood is fully traversable, so movement
        // tests are not confounded by terrain deflection.
        let cols = biome.cols() as usize;
        let rows = biome.rows() as usize;
        for row in 1..rows - 1 {
            for col in 1..cols - 1 {
                let ok = (0..3).all(|dr| {
                    (0..3).all(|dc| {
                        biome.cell_traversable((row + dr - 1) * cols + (col + dc - 1))
                    })
                });
                if ok {
                    return biome.cell_center(row * cols + col);
                }
            }
        }
        panic!("no open terrain in fixture biome");
    }

    fn fixture(seeds: &[EntitySeed]) -> Fixture {
        let cfg = SimConfig::default();
        let biome = BiomeField::generate(
            cfg.seed,
            cfg.world_width,
            cfg.world_height,
            cfg.food.resolution,
            TerrainNoise::default(),
        );
        let mut store = EntityStore::new(0, 64);
        for &seed in seeds {
            store.spawn(seed).unwrap();
        }
        let mut index = SpatialHashGrid::new(GridConfig {
            width: cfg.world_width,
            height: cfg.world_height,
            cell_size: 50.0,
        })
        .unwrap();
        let live: Vec<bool> = (0..store.capacity()).map(|i| store.is_live(i)).collect();
        index
            .rebuild(store.positions_x(), store.positions_y(), &live)
            .unwrap();
        Fixture {
            store,
            index,
            biome,
            cfg,
        }
    }

    fn entity(x: f32, y: f32, tribe: u16, energy: f32, genome: Genome) -> EntitySeed {
        EntitySeed {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            energy,
            age: 0.0,
            tribe,
            orientation: 0.0,
            genome,
        }
    }

    fn inputs<'a>(f: &'a Fixture, ghosts: &'a [GhostEntity]) -> BehaviorInputs<'a> {
        BehaviorInputs {
            store: &f.store,
            index: &f.index,
            ghosts,
            biome: &f.biome,
            world_w: f.cfg.world_width,
            world_h: f.cfg.world_height,
            energy_max: f.cfg.energy.max,
            tick: 5,
            stream: 42,
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let g = Genome::default();
        let probe = fixture(&[]);
        let (x, y) = open_spot(&probe.biome);
        let f = fixture(&[
            entity(x, y, 0, 60.0, g),
            entity(x + 8.0, y, 0, 60.0, g),
            entity(x, y + 8.0, 1, 60.0, g),
        ]);
        let a = decide(0, &inputs(&f, &[]), 1.0 / 60.0);
        let b = decide(0, &inputs(&f, &[]), 1.0 / 60.0);
        assert_eq!(a.vx, b.vx);
        assert_eq!(a.vy, b.vy);
        assert_eq!(a.fight_target, b.fight_target);
    }

    #[test]
    fn close_allies_are_pushed_apart() {
        let g = Genome {
            cohesion: 0.0,
            ..Genome::default()
        };
        let probe = fixture(&[]);
        let (x, y) = open_spot(&probe.biome);
        let f = fixture(&[entity(x, y, 0, 60.0, g), entity(x + 4.0, y, 0, 60.0, g)]);
        let d = decide(0, &inputs(&f, &[]), 1.0 / 60.0);
        // Neighbor sits at +x; separation should dominate and push -x.
        assert!(d.vx < 0.0, "expected separation push, got vx={}", d.vx);
    }

    #[test]
    fn zero_aggression_never_fights() {
        let g = Genome {
            aggression: 0.0,
            ..Genome::default()
        };
        let probe = fixture(&[]);
        let (x, y) = open_spot(&probe.biome);
        let f = fixture(&[entity(x, y, 0, 90.0, g), entity(x + 6.0, y, 1, 90.0, g)]);
        for tick in 0..200 {
            let mut ctx = inputs(&f, &[]);
            ctx.tick = tick;
            assert!(decide(0, &ctx, 1.0 / 60.0).fight_target.is_none());
        }
    }

    #[test]
    fn ghosts_are_seen_but_not_fightable() {
        let g = Genome {
            aggression: 1.0,
            ..Genome::default()
        };
        let probe = fixture(&[]);
        let (x, y) = open_spot(&probe.biome);
        let f = fixture(&[entity(x, y, 0, 90.0, g)]);
        let ghosts = vec![GhostEntity {
            x: x + 10.0,
            y,
            vx: 0.0,
            vy: 0.0,
            energy: 90.0,
            tribe: 1,
            aggression: 1.0,
            speed: 20.0,
        }];
        for tick in 0..300 {
            let mut ctx = inputs(&f, &ghosts);
            ctx.tick = tick;
            let d = decide(0, &ctx, 1.0 / 60.0);
            assert!(
                d.fight_target.is_none(),
                "ghost entities must never be fight targets"
            );
        }
    }

    #[test]
    fn velocity_is_clamped_to_effective_speed() {
        let g = Genome::default();
        let probe = fixture(&[]);
        let (x, y) = open_spot(&probe.biome);
        let mut seeds = vec![entity(x, y, 0, 60.0, g)];
        // Crowd of enemies to maximize steering forces.
        for k in 0..10 {
            seeds.push(entity(x + 5.0 + k as f32, y, 1, 90.0, g));
        }
        let f = fixture(&seeds);
        let d = decide(0, &inputs(&f, &[]), 1.0 / 60.0);
        let speed = (d.vx * d.vx + d.vy * d.vy).sqrt();
        assert!(speed <= g.effective_speed() + 1e-3);
    }

    #[test]
    fn candidate_positions_avoid_impassable_terrain() {
        let probe = fixture(&[]);
        let biome = &probe.biome;
        // Find a traversable cell bordering an impassable one.
        let cols = biome.cols() as usize;
        let total = cols * biome.rows() as usize;
        let pair = (0..total).find_map(|c| {
            if biome.cell_traversable(c) && c % cols < cols - 1 && !biome.cell_traversable(c + 1) {
                Some(c)
            } else {
                None
            }
        });
        let Some(cell) = pair else {
            return; // seed produced no coastline; nothing to test
        };
        let (px, py) = biome.cell_center(cell);
        let (bx, _) = biome.cell_center(cell + 1);
        let toward_wall = bx - px; // positive x means wall to the right
        let ctx_fixture = fixture(&[entity(px, py, 0, 60.0, Genome::default())]);
        let ctx = inputs(&ctx_fixture, &[]);
        // Big velocity straight at the wall, one-second step.
        let (vx, vy) = deflect(&ctx, px, py, toward_wall * 2.0, 0.0, 1.0);
        let nx = wrap_coord(px + vx * 1.0, ctx.world_w);
        let ny = wrap_coord(py + vy * 1.0, ctx.world_h);
        assert!(biome.is_traversable(nx, ny));
    }
}
