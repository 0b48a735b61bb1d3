//! Genomes, tribe archetypes, mutation and crossover.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

pub const GENE_COUNT: usize = 9;

/// Display names, in the same order as [`Genome::as_array`].
pub const GENE_NAMES: [&str; GENE_COUNT] = [
    "speed",
    "vision",
    "metabolism",
    "repro_chance",
    "aggression",
    "cohesion",
    "pickiness",
    "diet",
    "view_angle",
];

/// Heritable per-entity traits. `diet` spans herbivore (-1) to carnivore
/// (+1); `view_angle` is stored in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub speed: f32,
    pub vision: f32,
    pub metabolism: f32,
    pub repro_chance: f32,
    pub aggression: f32,
    pub cohesion: f32,
    pub pickiness: f32,
    pub diet: f32,
    pub view_angle: f32,
}

impl Default for Genome {
    fn default() -> Self {
        Self {
            speed: 20.0,
            vision: 50.0,
            metabolism: 0.15,
            repro_chance: 0.02,
            aggression: 0.5,
            cohesion: 0.5,
            pickiness: 0.3,
            diet: -0.5,
            view_angle: 120.0,
        }
    }
}

/// (low, high, mutation sigma) per gene, matching `GENE_NAMES` order.
const GENE_BOUNDS: [(f32, f32, f32); GENE_COUNT] = [
    (1.0, 80.0, 2.0),     // speed
    (5.0, 200.0, 4.0),    // vision
    (0.01, 1.0, 0.02),    // metabolism
    (0.0, 0.5, 0.004),    // repro_chance
    (0.0, 1.0, 0.05),     // aggression
    (0.0, 1.0, 0.05),     // cohesion
    (0.0, 1.0, 0.04),     // pickiness
    (-1.0, 1.0, 0.06),    // diet
    (30.0, 330.0, 6.0),   // view_angle
];

impl Genome {
    pub fn as_array(&self) -> [f32; GENE_COUNT] {
        [
            self.speed,
            self.vision,
            self.metabolism,
            self.repro_chance,
            self.aggression,
            self.cohesion,
            self.pickiness,
            self.diet,
            self.view_angle,
        ]
    }

    pub fn from_array(values: [f32; GENE_COUNT]) -> Self {
        Self {
            speed: values[0],
            vision: values[1],
            metabolism: values[2],
            repro_chance: values[3],
            aggression: values[4],
            cohesion: values[5],
            pickiness: values[6],
            diet: values[7],
            view_angle: values[8],
        }
    }

    pub fn clamped(self) -> Self {
        let mut values = self.as_array();
        for (v, (lo, hi, _)) in values.iter_mut().zip(GENE_BOUNDS) {
            *v = v.clamp(lo, hi);
        }
        Self::from_array(values)
    }

    /// Gaussian-perturb every gene. `scale` multiplies the per-gene sigma;
    /// 1.0 is the normal birth mutation rate.
    pub fn mutated(self, rng: &mut dyn RngCore, scale: f32) -> Self {
        let mut values = self.as_array();
        for (v, (lo, hi, sigma)) in values.iter_mut().zip(GENE_BOUNDS) {
            *v = (*v + gaussian(rng) * sigma * scale).clamp(lo, hi);
        }
        Self::from_array(values)
    }

    /// Per-gene blend of two parents with independent random weights.
    pub fn crossover(a: &Genome, b: &Genome, mut rng: &mut dyn RngCore) -> Self {
        let av = a.as_array();
        let bv = b.as_array();
        let mut child = [0.0f32; GENE_COUNT];
        for i in 0..GENE_COUNT {
            let t: f32 = rng.random();
            child[i] = av[i] * (1.0 - t) + bv[i] * t;
        }
        Self::from_array(child).clamped()
    }

    /// Speed after the metabolism-efficiency penalty: a slow metabolism
    /// cannot power a fast body.
    #[inline]
    pub fn effective_speed(&self) -> f32 {
        self.speed * (self.metabolism / 0.15).min(1.0)
    }

    #[inline]
    pub fn view_angle_radians(&self) -> f32 {
        self.view_angle.to_radians()
    }

    /// Carnivory in [0, 1]; zero for herbivores and omnivores below the
    /// hunting threshold.
    #[inline]
    pub fn carnivory(&self) -> f32 {
        ((self.diet - 0.2) / 0.8).clamp(0.0, 1.0)
    }
}

/// Standard normal sample via Box-Muller.
pub fn gaussian(mut rng: &mut dyn RngCore) -> f32 {
    let u1: f32 = rng.random::<f32>().max(f32::EPSILON);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Optional per-tribe deviations from the default archetype.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneOverrides {
    pub speed: Option<f32>,
    pub vision: Option<f32>,
    pub metabolism: Option<f32>,
    pub repro_chance: Option<f32>,
    pub aggression: Option<f32>,
    pub cohesion: Option<f32>,
    pub pickiness: Option<f32>,
    pub diet: Option<f32>,
    pub view_angle: Option<f32>,
}

impl GeneOverrides {
    pub fn apply(&self, base: Genome) -> Genome {
        Genome {
            speed: self.speed.unwrap_or(base.speed),
            vision: self.vision.unwrap_or(base.vision),
            metabolism: self.metabolism.unwrap_or(base.metabolism),
            repro_chance: self.repro_chance.unwrap_or(base.repro_chance),
            aggression: self.aggression.unwrap_or(base.aggression),
            cohesion: self.cohesion.unwrap_or(base.cohesion),
            pickiness: self.pickiness.unwrap_or(base.pickiness),
            diet: self.diet.unwrap_or(base.diet),
            view_angle: self.view_angle.unwrap_or(base.view_angle),
        }
        .clamped()
    }
}

/// Resolved tribe definition used at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TribeSpec {
    pub name: String,
    pub color: [f32; 3],
    pub archetype: Genome,
}
