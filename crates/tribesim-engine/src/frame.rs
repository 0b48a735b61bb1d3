//! Shared render mirror.
//!
//! A single set of flat buffers sized for the whole world, behind a
//! mutex. Each worker writes only its own slot range and its own food
//! cells after a tick, so writers never overlap; external consumers lock,
//! copy what they need, and must tolerate sparse `alive` flags.

use std::sync::{Arc, Mutex};

use tribesim_core::{PARKED, PartitionWorld};

#[derive(Debug, Clone)]
pub struct FrameBuffers {
    pub capacity: usize,
    pub pos_x: Vec<f32>,
    pub pos_y: Vec<f32>,
    pub color: Vec<[f32; 3]>,
    pub energy: Vec<f32>,
    pub age: Vec<f32>,
    pub alive: Vec<u8>,
    pub food_cols: u32,
    pub food_rows: u32,
    pub food: Vec<f32>,
    /// Latest tick written per partition, for staleness checks.
    pub partition_ticks: Vec<u64>,
}

impl FrameBuffers {
    /// Placeholder before `Init` arrives.
    pub fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    pub fn new(capacity: usize, food_cols: u32, food_rows: u32, partitions: usize) -> Self {
        Self {
            capacity,
            pos_x: vec![PARKED; capacity],
            pos_y: vec![PARKED; capacity],
            color: vec![[0.0; 3]; capacity],
            energy: vec![0.0; capacity],
            age: vec![0.0; capacity],
            alive: vec![0; capacity],
            food_cols,
            food_rows,
            food: vec![0.0; (food_cols * food_rows) as usize],
            partition_ticks: vec![0; partitions],
        }
    }

    pub fn live_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a != 0).count()
    }
}

pub type SharedFrame = Arc<Mutex<FrameBuffers>>;

/// Mirror one partition's slot range and owned food cells into the
/// shared buffers. Caller holds the lock.
pub fn write_partition(frame: &mut FrameBuffers, world: &PartitionWorld) {
    let store = world.store();
    let base = store.base();
    let tribes = world.tribes();
    for i in 0..store.capacity() {
        let g = base + i;
        if g >= frame.capacity {
            break;
        }
        let occupied = store.alive_flags()[i];
        frame.alive[g] = u8::from(occupied);
        frame.pos_x[g] = store.positions_x()[i];
        frame.pos_y[g] = store.positions_y()[i];
        frame.energy[g] = store.energies()[i];
        frame.age[g] = store.ages()[i];
        frame.color[g] = tribes
            .get(store.tribes()[i] as usize)
            .map(|t| t.color)
            .unwrap_or([1.0; 3]);
    }
    let food = world.food();
    for &cell in world.owned_cells() {
        let cell = cell as usize;
        if cell < frame.food.len() {
            frame.food[cell] = food.current(cell);
        }
    }
    if let Some(t) = frame.partition_ticks.get_mut(world.id()) {
        *t = world.tick_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_has_no_live_entities() {
        let f = FrameBuffers::empty();
        assert_eq!(f.live_count(), 0);
        assert_eq!(f.capacity, 0);
    }

    #[test]
    fn new_frame_parks_all_positions() {
        let f = FrameBuffers::new(8, 4, 4, 2);
        assert!(f.pos_x.iter().all(|&x| x == PARKED));
        assert_eq!(f.food.len(), 16);
        assert_eq!(f.partition_ticks, vec![0, 0]);
    }
}
