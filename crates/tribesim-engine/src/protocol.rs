//! Message surface of the engine.
//!
//! Three channels, three tagged unions: `ControlRequest` rides the public
//! crossfire bus into the coordinator, `WorkerCommand`/`WorkerReport`
//! ride std mpsc between coordinator and workers, and `DataEvent` is what
//! external consumers receive back. Every match over these is exhaustive,
//! so adding a variant is a compile-time TODO list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tribesim_core::behavior::GhostEntity;
use tribesim_core::stats::{GlobalStats, PartitionStats};
use tribesim_core::{EntitySeed, SimConfig, TribeSpec};

/// External control, consumed only by the coordinator thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    Init(Box<SimConfig>),
    Pause(bool),
    SetSpeed(f32),
    RequestStats,
    RequestPerf,
    UpdateFoodParams {
        capacity: Option<f32>,
        regen: Option<f32>,
    },
    Shutdown,
}

/// Coordinator-to-worker commands.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Pause(bool),
    SetSpeed(f32),
    /// Publish a border snapshot for ghost routing.
    SyncGhosts,
    /// Ghost entities from one adjacent partition.
    Ghosts {
        from: usize,
        entities: Arc<Vec<GhostEntity>>,
    },
    PushStats,
    PushPerf,
    /// Try to accept a migrating entity.
    Admit { ticket: u64, seed: EntitySeed },
    /// Migration accepted downstream: free the in-flight slot.
    Release { slot: usize },
    /// Migration refused downstream: resume ticking the in-flight slot.
    Reinstate { slot: usize },
    UpdateFood {
        capacity: Option<f32>,
        regen: Option<f32>,
    },
    Shutdown,
}

/// Worker-to-coordinator reports.
#[derive(Debug, Clone)]
pub enum WorkerReport {
    /// Partition world built and ready to run.
    Ready { partition: usize },
    /// Partition world construction failed; the run cannot proceed.
    Failed { partition: usize, message: String },
    /// Border snapshot in response to `SyncGhosts`.
    Border {
        partition: usize,
        entities: Arc<Vec<GhostEntity>>,
    },
    /// A live entity left the region; its slot is now in-flight.
    Departure {
        partition: usize,
        slot: usize,
        seed: EntitySeed,
    },
    Admitted {
        partition: usize,
        ticket: u64,
        slot: usize,
    },
    Refused { partition: usize, ticket: u64 },
    Stats(Box<PartitionStats>),
    Perf(PerfSample),
    /// A tick panicked and was isolated; the worker keeps running.
    TickPanicked { partition: usize, message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerfSample {
    pub partition: usize,
    pub ticks_per_sec: f32,
    pub avg_tick_ms: f32,
    pub max_tick_ms: f32,
    pub entities: u32,
}

/// Aggregated performance over all partitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerfReport {
    /// Slowest partition's simulated ticks per second.
    pub ticks_per_sec: f32,
    pub avg_tick_ms: f32,
    pub max_tick_ms: f32,
    pub entities: u32,
}

impl PerfReport {
    pub fn merge(samples: &[PerfSample]) -> Self {
        let mut out = Self {
            ticks_per_sec: f32::MAX,
            avg_tick_ms: 0.0,
            max_tick_ms: 0.0,
            entities: 0,
        };
        if samples.is_empty() {
            out.ticks_per_sec = 0.0;
            return out;
        }
        let mut weighted_avg = 0.0f64;
        for s in samples {
            out.ticks_per_sec = out.ticks_per_sec.min(s.ticks_per_sec);
            out.max_tick_ms = out.max_tick_ms.max(s.max_tick_ms);
            out.entities += s.entities;
            weighted_avg += f64::from(s.avg_tick_ms);
        }
        out.avg_tick_ms = (weighted_avg / samples.len() as f64) as f32;
        out
    }
}

/// Static world description emitted once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub world_width: f32,
    pub world_height: f32,
    pub capacity: usize,
    pub workers: usize,
    pub food_cols: u32,
    pub food_rows: u32,
    pub tribes: Vec<TribeSpec>,
    /// Per-partition (base, capacity) slot ranges.
    pub slot_ranges: Vec<(usize, usize)>,
}

/// Events pushed to external consumers.
#[derive(Debug, Clone)]
pub enum DataEvent {
    Ready(Box<WorldMetadata>),
    Stats(Box<GlobalStats>),
    Perf(PerfReport),
    /// The last entity died; the run keeps accepting control but nothing
    /// will ever move again.
    Extinction {
        final_time: f64,
        final_stats: Box<GlobalStats>,
    },
}
