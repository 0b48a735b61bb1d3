//! Fixed-capacity structure-of-arrays entity storage.
//!
//! All columns are allocated once at construction and never grow or
//! compact, so a slot index is stable for the lifetime of the partition.
//! Dead and unspawned slots are reclaimed in place; their positions are
//! parked far outside the world so neighbor queries and render consumers
//! never see them clustered at the origin.

use serde::{Deserialize, Serialize};

use crate::gene::Genome;

/// Position written into freed slots.
pub const PARKED: f32 = -1.0e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Live,
    /// In-flight to another partition: still occupied (the entity exists
    /// exactly once), but excluded from ticking until the handshake
    /// resolves with a release or a reinstate.
    Migrating,
}

/// Everything needed to recreate an entity in another store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntitySeed {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub energy: f32,
    pub age: f32,
    pub tribe: u16,
    pub orientation: f32,
    pub genome: Genome,
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    base: usize,
    pos_x: Vec<f32>,
    pos_y: Vec<f32>,
    vel_x: Vec<f32>,
    vel_y: Vec<f32>,
    energy: Vec<f32>,
    age: Vec<f32>,
    orientation: Vec<f32>,
    tribe: Vec<u16>,
    genome: Vec<Genome>,
    state: Vec<SlotState>,
    alive: Vec<bool>,
    live_count: usize,
    cursor: usize,
}

impl EntityStore {
    pub fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            pos_x: vec![PARKED; capacity],
            pos_y: vec![PARKED; capacity],
            vel_x: vec![0.0; capacity],
            vel_y: vec![0.0; capacity],
            energy: vec![0.0; capacity],
            age: vec![0.0; capacity],
            orientation: vec![0.0; capacity],
            tribe: vec![0; capacity],
            genome: vec![Genome::default(); capacity],
            state: vec![SlotState::Free; capacity],
            alive: vec![false; capacity],
            live_count: 0,
            cursor: 0,
        }
    }

    /// Global index offset of slot 0; global id of local slot `i` is
    /// `base + i`.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.state.len()
    }

    /// Slots currently in `Live` state (excludes in-flight migrations).
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Occupied slots: live plus in-flight.
    pub fn occupied_count(&self) -> usize {
        self.state
            .iter()
            .filter(|s| !matches!(s, SlotState::Free))
            .count()
    }

    /// Claim a free slot and populate it. Returns the local slot, or
    /// `None` when the partition is full.
    pub fn spawn(&mut self, seed: EntitySeed) -> Option<usize> {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }
        for probe in 0..capacity {
            let i = (self.cursor + probe) % capacity;
            if self.state[i] == SlotState::Free {
                self.cursor = (i + 1) % capacity;
                self.write_seed(i, seed);
                self.state[i] = SlotState::Live;
                self.alive[i] = true;
                self.live_count += 1;
                self.assert_coherent();
                return Some(i);
            }
        }
        None
    }

    fn write_seed(&mut self, i: usize, seed: EntitySeed) {
        self.pos_x[i] = seed.x;
        self.pos_y[i] = seed.y;
        self.vel_x[i] = seed.vx;
        self.vel_y[i] = seed.vy;
        self.energy[i] = seed.energy;
        self.age[i] = seed.age;
        self.orientation[i] = seed.orientation;
        self.tribe[i] = seed.tribe;
        self.genome[i] = seed.genome;
    }

    /// Free a live slot (death). Parks the position.
    pub fn kill(&mut self, i: usize) {
        debug_assert_eq!(self.state[i], SlotState::Live);
        self.state[i] = SlotState::Free;
        self.alive[i] = false;
        self.pos_x[i] = PARKED;
        self.pos_y[i] = PARKED;
        self.vel_x[i] = 0.0;
        self.vel_y[i] = 0.0;
        self.live_count = self.live_count.saturating_sub(1);
        self.assert_coherent();
    }

    /// Snapshot a live slot and mark it in-flight. The slot stays
    /// occupied until `complete_release` or `reinstate`.
    pub fn begin_migration(&mut self, i: usize) -> Option<EntitySeed> {
        if self.state[i] != SlotState::Live {
            return None;
        }
        self.state[i] = SlotState::Migrating;
        self.live_count -= 1;
        self.assert_coherent();
        Some(self.snapshot(i))
    }

    /// The destination accepted: free the in-flight slot.
    pub fn complete_release(&mut self, i: usize) {
        if self.state[i] != SlotState::Migrating {
            return;
        }
        self.state[i] = SlotState::Free;
        self.alive[i] = false;
        self.pos_x[i] = PARKED;
        self.pos_y[i] = PARKED;
        self.vel_x[i] = 0.0;
        self.vel_y[i] = 0.0;
        self.assert_coherent();
    }

    /// The destination refused: resume ticking the slot at the given
    /// position (already clamped back inside the region by the caller).
    pub fn reinstate(&mut self, i: usize, x: f32, y: f32) {
        if self.state[i] != SlotState::Migrating {
            return;
        }
        self.pos_x[i] = x;
        self.pos_y[i] = y;
        self.vel_x[i] = 0.0;
        self.vel_y[i] = 0.0;
        self.state[i] = SlotState::Live;
        self.live_count += 1;
        self.assert_coherent();
    }

    pub fn snapshot(&self, i: usize) -> EntitySeed {
        EntitySeed {
            x: self.pos_x[i],
            y: self.pos_y[i],
            vx: self.vel_x[i],
            vy: self.vel_y[i],
            energy: self.energy[i],
            age: self.age[i],
            tribe: self.tribe[i],
            orientation: self.orientation[i],
            genome: self.genome[i],
        }
    }

    #[inline]
    pub fn is_live(&self, i: usize) -> bool {
        self.state[i] == SlotState::Live
    }

    #[inline]
    pub fn slot_state(&self, i: usize) -> SlotState {
        self.state[i]
    }

    pub fn live_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(|&i| self.state[i] == SlotState::Live)
    }

    pub fn positions_x(&self) -> &[f32] {
        &self.pos_x
    }

    pub fn positions_y(&self) -> &[f32] {
        &self.pos_y
    }

    pub fn velocities_x(&self) -> &[f32] {
        &self.vel_x
    }

    pub fn velocities_y(&self) -> &[f32] {
        &self.vel_y
    }

    pub fn energies(&self) -> &[f32] {
        &self.energy
    }

    pub fn ages(&self) -> &[f32] {
        &self.age
    }

    pub fn tribes(&self) -> &[u16] {
        &self.tribe
    }

    pub fn genomes(&self) -> &[Genome] {
        &self.genome
    }

    pub fn alive_flags(&self) -> &[bool] {
        &self.alive
    }

    // Single-writer mutation surface used by the lifecycle stage.

    #[inline]
    pub fn set_position(&mut self, i: usize, x: f32, y: f32) {
        self.pos_x[i] = x;
        self.pos_y[i] = y;
    }

    #[inline]
    pub fn set_velocity(&mut self, i: usize, vx: f32, vy: f32) {
        self.vel_x[i] = vx;
        self.vel_y[i] = vy;
        if vx != 0.0 || vy != 0.0 {
            self.orientation[i] = vy.atan2(vx);
        }
    }

    #[inline]
    pub fn set_energy(&mut self, i: usize, energy: f32) {
        self.energy[i] = energy;
    }

    #[inline]
    pub fn add_age(&mut self, i: usize, dt: f32) {
        self.age[i] += dt;
    }

    #[inline]
    pub fn set_tribe(&mut self, i: usize, tribe: u16) {
        self.tribe[i] = tribe;
    }

    #[inline]
    fn assert_coherent(&self) {
        debug_assert_eq!(
            self.live_count,
            self.state
                .iter()
                .filter(|s| matches!(s, SlotState::Live))
                .count()
        );
        debug_assert!(
            self.state
                .iter()
                .zip(&self.alive)
                .all(|(s, &a)| a == !matches!(s, SlotState::Free))
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_at(x: f32, y: f32) -> EntitySeed {
        EntitySeed {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            energy: 50.0,
            age: 0.0,
            tribe: 0,
            orientation: 0.0,
            genome: Genome::default(),
        }
    }

    #[test]
    fn spawn_fills_and_reports_capacity_exhaustion() {
        let mut s = EntityStore::new(0, 3);
        assert!(s.spawn(seed_at(1.0, 1.0)).is_some());
        assert!(s.spawn(seed_at(2.0, 2.0)).is_some());
        assert!(s.spawn(seed_at(3.0, 3.0)).is_some());
        assert!(s.spawn(seed_at(4.0, 4.0)).is_none());
        assert_eq!(s.live_count(), 3);
    }

    #[test]
    fn kill_parks_and_slot_is_reused() {
        let mut s = EntityStore::new(10, 2);
        let a = s.spawn(seed_at(5.0, 5.0)).unwrap();
        s.spawn(seed_at(6.0, 6.0)).unwrap();
        s.kill(a);
        assert_eq!(s.live_count(), 1);
        assert_eq!(s.positions_x()[a], PARKED);
        assert!(!s.alive_flags()[a]);
        let c = s.spawn(seed_at(7.0, 7.0)).unwrap();
        assert_eq!(c, a, "freed slot should be reclaimed in place");
        assert_eq!(s.positions_x()[c], 7.0);
    }

    #[test]
    fn migration_excludes_slot_until_resolution() {
        let mut s = EntityStore::new(0, 2);
        let i = s.spawn(seed_at(9.0, 9.0)).unwrap();
        let snap = s.begin_migration(i).unwrap();
        assert_eq!(snap.x, 9.0);
        assert_eq!(s.live_count(), 0);
        assert_eq!(s.occupied_count(), 1);
        assert!(s.alive_flags()[i], "in-flight slot is still occupied");
        assert!(s.live_indices().next().is_none());

        s.reinstate(i, 8.0, 8.0);
        assert_eq!(s.live_count(), 1);
        assert_eq!(s.positions_x()[i], 8.0);

        let _ = s.begin_migration(i).unwrap();
        s.complete_release(i);
        assert_eq!(s.occupied_count(), 0);
        assert_eq!(s.positions_x()[i], PARKED);
    }

    #[test]
    fn double_migration_of_same_slot_is_ignored() {
        let mut s = EntityStore::new(0, 1);
        let i = s.spawn(seed_at(1.0, 1.0)).unwrap();
        assert!(s.begin_migration(i).is_some());
        assert!(s.begin_migration(i).is_none());
    }

    #[test]
    fn zero_capacity_store_never_spawns() {
        let mut s = EntityStore::new(0, 0);
        assert!(s.spawn(seed_at(0.0, 0.0)).is_none());
    }
}
