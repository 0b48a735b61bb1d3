//! Static world decomposition.
//!
//! The world is tiled into a near-square cols x rows grid of regions, one
//! per worker, fixed for the lifetime of the run. Entity slots are split
//! into contiguous per-partition ranges so a global slot id maps to its
//! owning partition by range lookup alone.

use smallvec::SmallVec;

use tribesim_core::{Region, SimConfig, wrap_coord};

/// Regions this far apart (relative to region size) still exchange
/// ghosts; diagonal neighbors qualify, far tiles do not.
const NEIGHBOR_REACH: f32 = 1.5;

#[derive(Debug, Clone)]
pub struct Layout {
    cols: usize,
    rows: usize,
    world_w: f32,
    world_h: f32,
    regions: Vec<Region>,
    ranges: Vec<(usize, usize)>,
}

/// Factor pair of `n` closest to a square, wider than tall.
fn near_square_factors(n: usize) -> (usize, usize) {
    let mut best = (n, 1);
    let mut d = 1;
    while d * d <= n {
        if n % d == 0 {
            best = (n / d, d);
        }
        d += 1;
    }
    best
}

impl Layout {
    pub fn new(cfg: &SimConfig) -> Self {
        let (cols, rows) = near_square_factors(cfg.workers.max(1));
        let tile_w = cfg.world_width / cols as f32;
        let tile_h = cfg.world_height / rows as f32;
        let mut regions = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                regions.push(Region {
                    x0: col as f32 * tile_w,
                    y0: row as f32 * tile_h,
                    x1: if col + 1 == cols {
                        cfg.world_width
                    } else {
                        (col + 1) as f32 * tile_w
                    },
                    y1: if row + 1 == rows {
                        cfg.world_height
                    } else {
                        (row + 1) as f32 * tile_h
                    },
                });
            }
        }

        let n = regions.len();
        let per = cfg.capacity / n;
        let mut ranges = Vec::with_capacity(n);
        let mut base = 0;
        for p in 0..n {
            let cap = if p + 1 == n { cfg.capacity - base } else { per };
            ranges.push((base, cap));
            base += cap;
        }

        Self {
            cols,
            rows,
            world_w: cfg.world_width,
            world_h: cfg.world_height,
            regions,
            ranges,
        }
    }

    pub fn partitions(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, p: usize) -> Region {
        self.regions[p]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// (base, capacity) of partition `p`'s slot range.
    pub fn range(&self, p: usize) -> (usize, usize) {
        self.ranges[p]
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    /// Partition owning the (wrapped) point.
    pub fn resolve(&self, x: f32, y: f32) -> usize {
        let x = wrap_coord(x, self.world_w);
        let y = wrap_coord(y, self.world_h);
        let tile_w = self.world_w / self.cols as f32;
        let tile_h = self.world_h / self.rows as f32;
        let col = ((x / tile_w) as usize).min(self.cols - 1);
        let row = ((y / tile_h) as usize).min(self.rows - 1);
        row * self.cols + col
    }

    /// Partition owning a global slot id.
    pub fn owner_of_slot(&self, slot: usize) -> Option<usize> {
        self.ranges
            .iter()
            .position(|&(base, cap)| slot >= base && slot < base + cap)
    }

    /// Partitions whose regions lie within ghost-exchange reach of `p`.
    pub fn neighbors(&self, p: usize) -> SmallVec<[usize; 8]> {
        let region = self.regions[p];
        let reach = NEIGHBOR_REACH * region.width().max(region.height());
        let mut out = SmallVec::new();
        for (q, other) in self.regions.iter().enumerate() {
            if q != p && region.distance_to(other) <= reach {
                out.push(q);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(workers: usize) -> Layout {
        Layout::new(&SimConfig {
            workers,
            capacity: 1000,
            ..SimConfig::default()
        })
    }

    #[test]
    fn factor_pairs_prefer_square() {
        assert_eq!(near_square_factors(1), (1, 1));
        assert_eq!(near_square_factors(4), (2, 2));
        assert_eq!(near_square_factors(6), (3, 2));
        assert_eq!(near_square_factors(7), (7, 1));
        assert_eq!(near_square_factors(12), (4, 3));
    }

    #[test]
    fn regions_tile_the_world_exactly() {
        let l = layout(6);
        let area: f32 = l.regions().iter().map(|r| r.width() * r.height()).sum();
        assert!((area - 2000.0 * 2000.0).abs() < 1.0);
        // Every point resolves to the region that contains it.
        for p in 0..l.partitions() {
            let r = l.region(p);
            let cx = (r.x0 + r.x1) * 0.5;
            let cy = (r.y0 + r.y1) * 0.5;
            assert_eq!(l.resolve(cx, cy), p);
            assert!(r.contains(cx, cy));
        }
    }

    #[test]
    fn slot_ranges_cover_capacity_contiguously() {
        let l = layout(3);
        let mut expected_base = 0;
        for &(base, cap) in l.ranges() {
            assert_eq!(base, expected_base);
            expected_base += cap;
        }
        assert_eq!(expected_base, 1000);
        assert_eq!(l.owner_of_slot(0), Some(0));
        assert_eq!(l.owner_of_slot(999), Some(l.partitions() - 1));
        assert_eq!(l.owner_of_slot(1000), None);
    }

    #[test]
    fn resolve_wraps_out_of_range_points() {
        let l = layout(4);
        assert_eq!(l.resolve(-1.0, 10.0), l.resolve(1999.0, 10.0));
        assert_eq!(l.resolve(2001.0, 10.0), l.resolve(1.0, 10.0));
    }

    #[test]
    fn four_workers_are_mutual_neighbors() {
        let l = layout(4);
        for p in 0..4 {
            let n = l.neighbors(p);
            assert_eq!(n.len(), 3, "2x2 tiling: everyone touches everyone");
            assert!(!n.contains(&p));
        }
    }

    #[test]
    fn distant_tiles_are_not_neighbors() {
        let l = layout(16);
        // Corner tile in a 4x4 grid reaches only its 3 surrounding tiles.
        let n = l.neighbors(0);
        assert!(n.contains(&1));
        assert!(n.contains(&4));
        assert!(n.contains(&5));
        assert!(!n.contains(&15));
        assert!(!n.contains(&3));
    }

    #[test]
    fn single_worker_has_no_neighbors() {
        let l = layout(1);
        assert!(l.neighbors(0).is_empty());
    }
}
