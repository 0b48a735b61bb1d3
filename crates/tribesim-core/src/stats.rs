//! Per-partition statistics and the global merge.
//!
//! The merge is deliberately conservative for spread: counts sum and
//! means are population-weighted, but the merged std is the max of the
//! partition stds rather than a pooled recomputation. Consumers read it
//! as an upper bound on within-partition spread.

use serde::{Deserialize, Serialize};

use crate::gene::{GENE_COUNT, GENE_NAMES};
use crate::lifecycle::TickReport;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GeneStat {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    pub std: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: usize,
    pub time: f64,
    pub tick: u64,
    pub population: u32,
    pub by_tribe: Vec<u32>,
    pub births: u32,
    pub deaths: u32,
    pub kills: u32,
    pub starved: u32,
    pub defections: u32,
    pub genes: [GeneStat; GENE_COUNT],
    /// Mean food fill level over the partition's owned cells.
    pub food_occupancy: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub time: f64,
    pub population: u32,
    pub by_tribe: Vec<u32>,
    pub births: u32,
    pub deaths: u32,
    pub kills: u32,
    pub starved: u32,
    pub defections: u32,
    pub genes: [GeneStat; GENE_COUNT],
    pub food_occupancy: f32,
}

impl GlobalStats {
    pub fn empty() -> Self {
        Self {
            time: 0.0,
            population: 0,
            by_tribe: Vec::new(),
            births: 0,
            deaths: 0,
            kills: 0,
            starved: 0,
            defections: 0,
            genes: [GeneStat::default(); GENE_COUNT],
            food_occupancy: 0.0,
        }
    }

    /// Name/value pairs of gene means, for logging.
    pub fn gene_means(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        GENE_NAMES
            .iter()
            .zip(self.genes.iter())
            .map(|(name, stat)| (*name, stat.mean))
    }
}

/// Summarize one partition's live entities plus its cumulative lifecycle
/// totals since startup.
pub fn partition_stats(
    partition: usize,
    store: &EntityStore,
    tribe_count: usize,
    totals: &TickReport,
    food_occupancy: f32,
    time: f64,
    tick: u64,
) -> PartitionStats {
    let mut by_tribe = vec![0u32; tribe_count];
    let mut population = 0u32;
    let mut sums = [0.0f64; GENE_COUNT];
    let mut sq_sums = [0.0f64; GENE_COUNT];
    let mut mins = [f32::MAX; GENE_COUNT];
    let mut maxs = [f32::MIN; GENE_COUNT];

    for i in store.live_indices() {
        population += 1;
        let tribe = store.tribes()[i] as usize;
        if tribe < by_tribe.len() {
            by_tribe[tribe] += 1;
        }
        let values = store.genomes()[i].as_array();
        for (g, &v) in values.iter().enumerate() {
            sums[g] += f64::from(v);
            sq_sums[g] += f64::from(v) * f64::from(v);
            mins[g] = mins[g].min(v);
            maxs[g] = maxs[g].max(v);
        }
    }

    let mut genes = [GeneStat::default(); GENE_COUNT];
    if population > 0 {
        let n = f64::from(population);
        for g in 0..GENE_COUNT {
            let mean = sums[g] / n;
            let variance = (sq_sums[g] / n - mean * mean).max(0.0);
            genes[g] = GeneStat {
                mean: mean as f32,
                min: mins[g],
                max: maxs[g],
                std: variance.sqrt() as f32,
            };
        }
    }

    PartitionStats {
        partition,
        time,
        tick,
        population,
        by_tribe,
        births: totals.births,
        deaths: totals.deaths,
        kills: totals.kills,
        starved: totals.starved,
        defections: totals.defections,
        genes,
        food_occupancy,
    }
}

/// Merge partition reports into a world view. Means are weighted by
/// partition population; min/max are elementwise; std takes the max.
pub fn merge(parts: &[PartitionStats]) -> GlobalStats {
    let mut out = GlobalStats::empty();
    if parts.is_empty() {
        return out;
    }
    let tribe_count = parts.iter().map(|p| p.by_tribe.len()).max().unwrap_or(0);
    out.by_tribe = vec![0; tribe_count];
    let mut weighted = [0.0f64; GENE_COUNT];
    let mut mins = [f32::MAX; GENE_COUNT];
    let mut maxs = [f32::MIN; GENE_COUNT];
    let mut stds = [0.0f32; GENE_COUNT];
    let mut occupancy = 0.0f64;

    for p in parts {
        out.time = out.time.max(p.time);
        out.population += p.population;
        out.births += p.births;
        out.deaths += p.deaths;
        out.kills += p.kills;
        out.starved += p.starved;
        out.defections += p.defections;
        for (t, &n) in p.by_tribe.iter().enumerate() {
            out.by_tribe[t] += n;
        }
        occupancy += f64::from(p.food_occupancy);
        if p.population > 0 {
            for g in 0..GENE_COUNT {
                weighted[g] += f64::from(p.genes[g].mean) * f64::from(p.population);
                mins[g] = mins[g].min(p.genes[g].min);
                maxs[g] = maxs[g].max(p.genes[g].max);
                stds[g] = stds[g].max(p.genes[g].std);
            }
        }
    }

    out.food_occupancy = (occupancy / parts.len() as f64) as f32;
    if out.population > 0 {
        for g in 0..GENE_COUNT {
            out.genes[g] = GeneStat {
                mean: (weighted[g] / f64::from(out.population)) as f32,
                min: mins[g],
                max: maxs[g],
                std: stds[g],
            };
        }
    }
    out
}
