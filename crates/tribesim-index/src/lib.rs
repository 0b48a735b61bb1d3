//! Spatial neighborhood queries used by the behavior pass.
//!
//! The index is rebuilt once per tick from the live entity positions and
//! then queried read-only (and in parallel) by every deciding entity. The
//! implementation is a bucket-list spatial hash: one head pointer per cell
//! plus an intrusive `next` list threaded through the entity slots, so a
//! rebuild is two passes over the position columns with no per-cell
//! allocation.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by index construction or rebuild.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index extent must be positive (got {width}x{height})")]
    InvalidExtent { width: f32, height: f32 },
    #[error("index cell size must be positive (got {0})")]
    InvalidCellSize(f32),
    #[error("position column length {positions} does not match alive column length {alive}")]
    ColumnMismatch { positions: usize, alive: usize },
}

/// Abstraction over neighborhood lookup strategies.
///
/// `neighbors_within` visits every indexed slot whose position lies within
/// `radius` of `origin`, passing the slot and its squared distance. The
/// visitor receives `OrderedFloat` so callers can feed the distances
/// straight into ordering-sensitive selections.
pub trait NeighborhoodIndex {
    fn rebuild(&mut self, xs: &[f32], ys: &[f32], alive: &[bool]) -> Result<(), IndexError>;

    fn neighbors_within(
        &self,
        origin: (f32, f32),
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

/// Tuning knobs for the hash grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub width: f32,
    pub height: f32,
    /// Edge length of one hash cell in world units. Queries degrade toward
    /// a linear scan when this is much larger than typical query radii.
    pub cell_size: f32,
}

const NIL: u32 = u32::MAX;

/// Bucket-list spatial hash over a fixed world extent.
#[derive(Debug, Clone)]
pub struct SpatialHashGrid {
    cols: u32,
    rows: u32,
    cell_size: f32,
    heads: Vec<u32>,
    next: Vec<u32>,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl SpatialHashGrid {
    pub fn new(config: GridConfig) -> Result<Self, IndexError> {
        if !(config.width > 0.0) || !(config.height > 0.0) {
            return Err(IndexError::InvalidExtent {
                width: config.width,
                height: config.height,
            });
        }
        if !(config.cell_size > 0.0) {
            return Err(IndexError::InvalidCellSize(config.cell_size));
        }
        let cols = (config.width / config.cell_size).ceil().max(1.0) as u32;
        let rows = (config.height / config.cell_size).ceil().max(1.0) as u32;
        Ok(Self {
            cols,
            rows,
            cell_size: config.cell_size,
            heads: vec![NIL; (cols * rows) as usize],
            next: Vec::new(),
            xs: Vec::new(),
            ys: Vec::new(),
        })
    }

    #[inline]
    fn cell_coords(&self, x: f32, y: f32) -> (u32, u32) {
        let cx = ((x / self.cell_size) as i64).clamp(0, i64::from(self.cols) - 1) as u32;
        let cy = ((y / self.cell_size) as i64).clamp(0, i64::from(self.rows) - 1) as u32;
        (cx, cy)
    }

    #[inline]
    fn bucket(&self, cx: u32, cy: u32) -> usize {
        (cy * self.cols + cx) as usize
    }

    /// Number of slots currently linked into buckets.
    pub fn indexed(&self) -> usize {
        self.next.len()
    }
}

impl NeighborhoodIndex for SpatialHashGrid {
    fn rebuild(&mut self, xs: &[f32], ys: &[f32], alive: &[bool]) -> Result<(), IndexError> {
        if xs.len() != alive.len() || ys.len() != alive.len() {
            return Err(IndexError::ColumnMismatch {
                positions: xs.len().min(ys.len()),
                alive: alive.len(),
            });
        }
        self.heads.fill(NIL);
        self.next.clear();
        self.next.resize(xs.len(), NIL);
        self.xs.clear();
        self.xs.extend_from_slice(xs);
        self.ys.clear();
        self.ys.extend_from_slice(ys);
        for i in 0..xs.len() {
            if !alive[i] {
                continue;
            }
            let (cx, cy) = self.cell_coords(xs[i], ys[i]);
            let bucket = self.bucket(cx, cy);
            self.next[i] = self.heads[bucket];
            self.heads[bucket] = i as u32;
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        origin: (f32, f32),
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if !(radius > 0.0) {
            return;
        }
        let radius_sq = radius * radius;
        let (min_cx, min_cy) = self.cell_coords(origin.0 - radius, origin.1 - radius);
        let (max_cx, max_cy) = self.cell_coords(origin.0 + radius, origin.1 + radius);
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                let mut cursor = self.heads[self.bucket(cx, cy)];
                while cursor != NIL {
                    let i = cursor as usize;
                    let dx = self.xs[i] - origin.0;
                    let dy = self.ys[i] - origin.1;
                    let dist_sq = dx * dx + dy * dy;
                    if dist_sq <= radius_sq {
                        visitor(i, OrderedFloat(dist_sq));
                    }
                    cursor = self.next[i];
                }
            }
        }
    }
}
