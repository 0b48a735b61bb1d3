//! Static biome layer generated from seeded noise.
//!
//! Two fbm fields (elevation, moisture) classify each cell; ocean and
//! mountain cells are impassable. After classification the largest
//! traversable component is kept and every disconnected traversable pocket
//! is sealed, so spawning and wandering can never strand an entity.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::noise::SimplexNoise;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Biome {
    Ocean,
    Mountain,
    Forest,
    Grassland,
    Savanna,
    Desert,
}

impl Biome {
    pub fn traversable(self) -> bool {
        !matches!(self, Biome::Ocean | Biome::Mountain)
    }

    /// Multiplier applied to food capacity and regrowth in this biome.
    pub fn food_multiplier(self) -> f32 {
        match self {
            Biome::Forest => 1.5,
            Biome::Grassland => 1.0,
            Biome::Savanna => 0.7,
            Biome::Desert => 0.2,
            Biome::Ocean | Biome::Mountain => 0.0,
        }
    }
}

/// Noise shaping knobs for terrain generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TerrainNoise {
    /// World units per noise unit; larger values give larger landmasses.
    pub scale: f64,
    /// Elevation below this is ocean.
    pub ocean_threshold: f64,
    /// Elevation above this is mountain.
    pub mountain_threshold: f64,
}

impl Default for TerrainNoise {
    fn default() -> Self {
        Self {
            scale: 600.0,
            ocean_threshold: -0.35,
            mountain_threshold: 0.55,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiomeField {
    cols: u32,
    rows: u32,
    cell_w: f32,
    cell_h: f32,
    cells: Vec<Biome>,
    traversable: Vec<bool>,
}

impl BiomeField {
    /// Deterministic for a given (seed, extent, resolution, noise) tuple;
    /// every worker regenerates its own identical copy.
    pub fn generate(
        seed: u64,
        world_w: f32,
        world_h: f32,
        resolution: u32,
        noise: TerrainNoise,
    ) -> Self {
        let cols = resolution.max(1);
        let rows = resolution.max(1);
        let cell_w = world_w / cols as f32;
        let cell_h = world_h / rows as f32;
        let elevation = SimplexNoise::new(seed);
        let moisture = SimplexNoise::new(seed.wrapping_add(0x9e37_79b9_7f4a_7c15));
        let inv_scale = 1.0 / noise.scale.max(1.0);

        let mut cells = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let x = (col as f64 + 0.5) * cell_w as f64 * inv_scale;
                let y = (row as f64 + 0.5) * cell_h as f64 * inv_scale;
                let e = elevation.fbm(x, y, 4, 0.5, 2.0);
                let m = moisture.fbm(x, y, 3, 0.5, 2.0);
                cells.push(classify(e, m, noise));
            }
        }

        let traversable = seal_disconnected(&cells, cols, rows);
        Self {
            cols,
            rows,
            cell_w,
            cell_h,
            cells,
            traversable,
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

    #[inline]
    pub fn biome_at(&self, x: f32, y: f32) -> Biome {
        self.cells[self.cell_of(x, y)]
    }

    /// Traversability after sealing: false for ocean, mountain, and any
    /// land pocket unreachable from the main landmass.
    #[inline]
    pub fn is_traversable(&self, x: f32, y: f32) -> bool {
        self.traversable[self.cell_of(x, y)]
    }

    #[inline]
    pub fn cell_traversable(&self, cell: usize) -> bool {
        self.traversable[cell]
    }

    #[inline]
    pub fn cell_food_multiplier(&self, cell: usize) -> f32 {
        if self.traversable[cell] {
            self.cells[cell].food_multiplier()
        } else {
            0.0
        }
    }

    pub fn cell_center(&self, cell: usize) -> (f32, f32) {
        let col = cell as u32 % self.cols;
        let row = cell as u32 / self.cols;
        (
            (col as f32 + 0.5) * self.cell_w,
            (row as f32 + 0.5) * self.cell_h,
        )
    }

    pub fn traversable_fraction(&self) -> f32 {
        let open = self.traversable.iter().filter(|&&t| t).count();
        open as f32 / self.traversable.len() as f32
    }
}

fn classify(elevation: f64, moisture: f64, noise: TerrainNoise) -> Biome {
    if elevation < noise.ocean_threshold {
        Biome::Ocean
    } else if elevation > noise.mountain_threshold {
        Biome::Mountain
    } else if moisture > 0.25 {
        Biome::Forest
    } else if moisture > -0.1 {
        Biome::Grassland
    } else if moisture > -0.35 {
        Biome::Savanna
    } else {
        Biome::Desert
    }
}

/// Keep only the largest 4-connected traversable component.
fn seal_disconnected(cells: &[Biome], cols: u32, rows: u32) -> Vec<bool> {
    let n = cells.len();
    let mut component = vec![u32::MAX; n];
    let mut sizes: Vec<u32> = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..n {
        if !cells[start].traversable() || component[start] != u32::MAX {
            continue;
        }
        let id = sizes.len() as u32;
        let mut size = 0u32;
        component[start] = id;
        queue.push_back(start as u32);
        while let Some(cell) = queue.pop_front() {
            size += 1;
            let col = cell % cols;
            let row = cell / cols;
            let mut visit = |c: u32| {
                let c = c as usize;
                if cells[c].traversable() && component[c] == u32::MAX {
                    component[c] = id;
                    queue.push_back(c as u32);
                }
            };
            if col > 0 {
                visit(cell - 1);
            }
            if col + 1 < cols {
                visit(cell + 1);
            }
            if row > 0 {
                visit(cell - cols);
            }
            if row + 1 < rows {
                visit(cell + cols);
            }
        }
        sizes.push(size);
    }

    let keep = sizes
        .iter()
        .enumerate()
        .max_by_key(|&(_, &s)| s)
        .map(|(i, _)| i as u32);
    (0..n)
        .map(|i| Some(component[i]) == keep && component[i] != u32::MAX)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(seed: u64) -> BiomeField {
        BiomeField::generate(seed, 2000.0, 2000.0, 64, TerrainNoise::default())
    }

    #[test]
    fn generation_is_deterministic() {
        let a = field(11);
        let b = field(11);
        for cell in 0..(a.cols() * a.rows()) as usize {
            assert_eq!(a.cells[cell], b.cells[cell]);
            assert_eq!(a.traversable[cell], b.traversable[cell]);
        }
    }

    #[test]
    fn impassable_biomes_are_never_traversable() {
        let f = field(3);
        for cell in 0..f.cells.len() {
            if matches!(f.cells[cell], Biome::Ocean | Biome::Mountain) {
                assert!(!f.cell_traversable(cell));
                assert_eq!(f.cell_food_multiplier(cell), 0.0);
            }
        }
    }

    #[test]
    fn traversable_cells_form_one_component() {
        let f = field(17);
        // Pick any traversable cell and flood from it; every traversable
        // cell must be reached.
        let start = (0..f.cells.len()).find(|&c| f.cell_traversable(c));
        let Some(start) = start else {
            return;
        };
        let mut seen = vec![false; f.cells.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(cell) = queue.pop_front() {
            let col = cell as u32 % f.cols();
            let row = cell as u32 / f.cols();
            let mut visit = |c: usize| {
                if f.cell_traversable(c) && !seen[c] {
                    seen[c] = true;
                    queue.push_back(c);
                }
            };
            if col > 0 {
                visit(cell - 1);
            }
            if col + 1 < f.cols() {
                visit(cell + 1);
            }
            if row > 0 {
                visit(cell - f.cols() as usize);
            }
            if row + 1 < f.rows() {
                visit(cell + f.cols() as usize);
            }
        }
        for cell in 0..f.cells.len() {
            assert_eq!(seen[cell], f.cell_traversable(cell));
        }
    }

    #[test]
    fn world_has_usable_land() {
        let f = field(5);
        assert!(f.traversable_fraction() > 0.1, "seed produced a water world");
    }

    #[test]
    fn cell_lookup_clamps_out_of_range_points() {
        let f = field(1);
        // Points outside the extent resolve to the nearest edge cell
        // instead of panicking.
        let _ = f.biome_at(-10.0, -10.0);
        let _ = f.biome_at(1e6, 1e6);
    }
}
