//! Regrowing food layer with per-cell biome multipliers.
//!
//! Each partition holds a full-size grid but only regrows and serves the
//! cells whose centers fall inside its region, so cell values are written
//! by exactly one worker.

use crate::FoodConfig;
use crate::biome::BiomeField;

#[derive(Debug, Clone)]
pub struct FoodField {
    cols: u32,
    rows: u32,
    cell_w: f32,
    cell_h: f32,
    capacity: f32,
    regen: f32,
    current: Vec<f32>,
    multiplier: Vec<f32>,
}

impl FoodField {
    pub fn new(cfg: &FoodConfig, world_w: f32, world_h: f32, biome: &BiomeField) -> Self {
        let cols = cfg.resolution.max(1);
        let rows = cfg.resolution.max(1);
        let cell_w = world_w / cols as f32;
        let cell_h = world_h / rows as f32;
        let n = (cols * rows) as usize;
        let mut multiplier = Vec::with_capacity(n);
        let mut current = Vec::with_capacity(n);
        for cell in 0..n {
            let mult = biome.cell_food_multiplier(cell);
            multiplier.push(mult);
            current.push(cfg.capacity * mult * cfg.initial_fill);
        }
        Self {
            cols,
            rows,
            cell_w,
            cell_h,
            capacity: cfg.capacity,
            regen: cfg.regen,
            current,
            multiplier,
        }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    pub fn cell_of(&self, x: f32, y: f32) -> usize {
        let col = ((x / self.cell_w) as i64).clamp(0, i64::from(self.cols) - 1) as u32;
        let row = ((y / self.cell_h) as i64).clamp(0, i64::from(self.rows) - 1) as u32;
        (row * self.cols + col) as usize
    }

    pub fn cell_center(&self, cell: usize) -> (f32, f32) {
        let col = cell as u32 % self.cols;
        let row = cell as u32 / self.cols;
        (
            (col as f32 + 0.5) * self.cell_w,
            (row as f32 + 0.5) * self.cell_h,
        )
    }

    #[inline]
    pub fn max_for(&self, cell: usize) -> f32 {
        self.capacity * self.multiplier[cell]
    }

    /// Fill level in [0, 1]; barren cells report 0.
    #[inline]
    pub fn density(&self, cell: usize) -> f32 {
        let max = self.max_for(cell);
        if max > 0.0 { self.current[cell] / max } else { 0.0 }
    }

    #[inline]
    pub fn current(&self, cell: usize) -> f32 {
        self.current[cell]
    }

    pub fn values(&self) -> &[f32] {
        &self.current
    }

    /// Take up to `bite` units from a cell, returning the amount removed.
    pub fn consume(&mut self, cell: usize, bite: f32) -> f32 {
        let taken = bite.max(0.0).min(self.current[cell]);
        self.current[cell] -= taken;
        taken
    }

    /// Regrow the given cells toward their biome-scaled capacity.
    pub fn regen_cells(&mut self, cells: &[u32], dt: f32) {
        for &cell in cells {
            let cell = cell as usize;
            let max = self.capacity * self.multiplier[cell];
            if max <= 0.0 {
                continue;
            }
            let grown = self.current[cell] + self.regen * self.multiplier[cell] * dt;
            self.current[cell] = grown.min(max);
        }
    }

    /// Hot parameter update. Shrinking capacity clamps cells down so the
    /// per-cell invariant holds immediately.
    pub fn update_params(&mut self, capacity: Option<f32>, regen: Option<f32>) {
        if let Some(cap) = capacity
            && cap.is_finite()
            && cap >= 0.0
        {
            self.capacity = cap;
            for cell in 0..self.current.len() {
                let max = self.capacity * self.multiplier[cell];
                if self.current[cell] > max {
                    self.current[cell] = max;
                }
            }
        }
        if let Some(r) = regen
            && r.is_finite()
            && r >= 0.0
        {
            self.regen = r;
        }
    }

    /// Mean fill level over the given cells (occupancy stat).
    pub fn occupancy(&self, cells: &[u32]) -> f32 {
        if cells.is_empty() {
            return 0.0;
        }
        let sum: f32 = cells.iter().map(|&c| self.density(c as usize)).sum();
        sum / cells.len() as f32
    }
}
