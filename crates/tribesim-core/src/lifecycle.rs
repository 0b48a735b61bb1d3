//! Commit stage: the only writer of entity columns during a tick.
//!
//! Runs after the parallel decision pass and applies everything in a fixed
//! pass order (movement/metabolism/eating, fights, starvation, defection,
//! reproduction, departures) so results are deterministic for a seed.

use rand::{Rng, rngs::SmallRng};
use tribesim_index::{NeighborhoodIndex, SpatialHashGrid};

use crate::behavior::Decision;
use crate::biome::BiomeField;
use crate::food::FoodField;
use crate::gene::{Genome, gaussian};
use crate::store::{EntitySeed, EntityStore};
use crate::{EnergyConfig, Region, wrap_coord};

/// Energy drained per second per point of metabolism.
const BASE_DRAIN_RATE: f32 = 8.0;
/// Energy drained per second per unit of speed actually moved.
const MOVE_DRAIN_RATE: f32 = 0.02;
/// Food units an entity can take from its cell per second.
const BITE_RATE: f32 = 30.0;
/// Energy gained per food unit eaten, before the diet penalty.
const EAT_EFFICIENCY: f32 = 0.8;
/// Energy fraction below which pickiness is ignored.
const STARVING_FRACTION: f32 = 0.25;
/// Reproduction offspring placement jitter, world units.
const BIRTH_JITTER: f32 = 6.0;

/// Per-tick population accounting. `deaths == kills + starved`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub births: u32,
    pub deaths: u32,
    pub kills: u32,
    pub starved: u32,
    pub defections: u32,
}

/// Static context for the commit stage.
pub struct LifecycleEnv<'a> {
    pub region: Region,
    pub world_w: f32,
    pub world_h: f32,
    pub energy: EnergyConfig,
    pub hybridization: bool,
    /// Food cells this partition owns; entities never eat from cells
    /// another partition regenerates.
    pub owned_cells: &'a [bool],
}

/// Apply one tick's decisions. Returns the report and the local slots
/// that ended the tick outside the partition region (migration
/// candidates; their slots are still `Live` here).
pub fn apply(
    store: &mut EntityStore,
    decisions: &[Decision],
    index: &SpatialHashGrid,
    food: &mut FoodField,
    biome: &BiomeField,
    env: &LifecycleEnv<'_>,
    dt: f32,
    rng: &mut SmallRng,
) -> (TickReport, Vec<usize>) {
    let mut report = TickReport::default();
    let capacity = store.capacity();

    // Movement, metabolism, eating, aging.
    for i in 0..capacity {
        if !store.is_live(i) {
            continue;
        }
        let d = decisions[i];
        store.set_velocity(i, d.vx, d.vy);
        let px = store.positions_x()[i];
        let py = store.positions_y()[i];
        let nx = wrap_coord(px + d.vx * dt, env.world_w);
        let ny = wrap_coord(py + d.vy * dt, env.world_h);
        if biome.is_traversable(nx, ny) {
            store.set_position(i, nx, ny);
        } else {
            // The decision pass already deflected; this is the last-ditch
            // guard against corner clips.
            store.set_velocity(i, 0.0, 0.0);
        }

        let genome = store.genomes()[i];
        let speed_moved = (d.vx * d.vx + d.vy * d.vy).sqrt();
        let drain = (genome.metabolism * BASE_DRAIN_RATE + speed_moved * MOVE_DRAIN_RATE) * dt;
        let mut energy = store.energies()[i] - drain;

        let cell = food.cell_of(store.positions_x()[i], store.positions_y()[i]);
        if env.owned_cells.get(cell).copied().unwrap_or(false) {
            let starving = energy < STARVING_FRACTION * env.energy.max;
            if starving || food.density(cell) >= genome.pickiness {
                let taken = food.consume(cell, BITE_RATE * dt);
                energy += taken * EAT_EFFICIENCY * (1.0 - genome.diet.max(0.0));
            }
        }
        store.set_energy(i, energy.min(env.energy.max));
        store.add_age(i, dt);
    }

    // Fights. Both parties must still be alive when the blow lands.
    for i in 0..capacity {
        if !store.is_live(i) {
            continue;
        }
        let Some(j) = decisions[i].fight_target else {
            continue;
        };
        if j == i || j >= capacity || !store.is_live(j) {
            continue;
        }
        let (ei, ej) = (store.energies()[i], store.energies()[j]);
        if ei <= 0.0 || ej <= 0.0 {
            continue;
        }
        let gi = store.genomes()[i];
        let gj = store.genomes()[j];
        let power_i = ei * (0.5 + gi.aggression);
        let power_j = ej * (0.5 + gj.aggression);
        let attacker_wins = rng.random::<f32>() < power_i / (power_i + power_j);
        let (winner, loser) = if attacker_wins { (i, j) } else { (j, i) };
        let damage = rng.random_range(20.0..40.0);
        let loser_energy = store.energies()[loser] - damage;
        if loser_energy <= 0.0 {
            store.kill(loser);
            report.kills += 1;
            report.deaths += 1;
            let carnivore = store.genomes()[winner].carnivory();
            let bonus = 15.0 + 25.0 * carnivore;
            store.set_energy(
                winner,
                (store.energies()[winner] + bonus).min(env.energy.max),
            );
        } else {
            store.set_energy(loser, loser_energy);
            store.set_energy(
                winner,
                (store.energies()[winner] + 5.0).min(env.energy.max),
            );
        }
    }

    // Starvation sweep. Nothing below leaves a live entity with
    // non-positive energy.
    for i in 0..capacity {
        if store.is_live(i) && store.energies()[i] <= 0.0 {
            store.kill(i);
            report.starved += 1;
            report.deaths += 1;
        }
    }

    // Defections.
    for i in 0..capacity {
        if !store.is_live(i) {
            continue;
        }
        if let Some(tribe) = decisions[i].defect_to
            && tribe != store.tribes()[i]
        {
            store.set_tribe(i, tribe);
            report.defections += 1;
        }
    }

    // Reproduction. Free-slot exhaustion drops the birth without charging
    // the parent.
    for i in 0..capacity {
        if !store.is_live(i) {
            continue;
        }
        let parent_energy = store.energies()[i];
        if parent_energy < env.energy.reproduction_threshold {
            continue;
        }
        let genome = store.genomes()[i];
        if rng.random::<f32>() >= genome.repro_chance * dt {
            continue;
        }
        let (child_genome, child_tribe) = conceive(store, index, i, env, rng);
        let px = store.positions_x()[i];
        let py = store.positions_y()[i];
        let cx = wrap_coord(px + gaussian(rng) * BIRTH_JITTER, env.world_w);
        let cy = wrap_coord(py + gaussian(rng) * BIRTH_JITTER, env.world_h);
        let (cx, cy) = if biome.is_traversable(cx, cy) {
            (cx, cy)
        } else {
            (px, py)
        };
        let seed = EntitySeed {
            x: cx,
            y: cy,
            vx: 0.0,
            vy: 0.0,
            energy: parent_energy * 0.5,
            age: 0.0,
            tribe: child_tribe,
            orientation: rng.random_range(0.0..std::f32::consts::TAU),
            genome: child_genome,
        };
        if store.spawn(seed).is_some() {
            store.set_energy(i, parent_energy * 0.5);
            report.births += 1;
        }
    }

    // Departures: live entities that drifted out of the region.
    let departures: Vec<usize> = store
        .live_indices()
        .filter(|&i| {
            !env.region
                .contains(store.positions_x()[i], store.positions_y()[i])
        })
        .collect();

    (report, departures)
}

/// Pick the child's genome and tribe. With hybridization on, a nearby
/// well-fed entity of any tribe can contribute genes via crossover and
/// the child may take either parent's tribe.
fn conceive(
    store: &EntityStore,
    index: &SpatialHashGrid,
    parent: usize,
    env: &LifecycleEnv<'_>,
    rng: &mut SmallRng,
) -> (Genome, u16) {
    let genome = store.genomes()[parent];
    let tribe = store.tribes()[parent];
    if !env.hybridization {
        return (genome.mutated(rng, 1.0), tribe);
    }
    let origin = (store.positions_x()[parent], store.positions_y()[parent]);
    let min_energy = env.energy.reproduction_threshold * 0.5;
    let mut partner: Option<usize> = None;
    let mut best = f32::MAX;
    index.neighbors_within(origin, genome.vision * 3.0, &mut |j, dist_sq| {
        let dist_sq = dist_sq.into_inner();
        if j != parent && store.is_live(j) && store.energies()[j] >= min_energy && dist_sq < best {
            best = dist_sq;
            partner = Some(j);
        }
    });
    match partner {
        Some(j) => {
            let child = Genome::crossover(&genome, &store.genomes()[j], rng).mutated(rng, 1.0);
            let child_tribe = if rng.random::<f32>() < 0.5 {
                tribe
            } else {
                store.tribes()[j]
            };
            (child, child_tribe)
        }
        None => (genome.mutated(rng, 1.0), tribe),
    }
}
