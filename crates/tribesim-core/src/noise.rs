//! Seeded 2D simplex noise with fractal Brownian motion stacking.
//!
//! Biome generation needs every worker to reproduce the exact same field
//! from the world seed, so the permutation table is shuffled with the same
//! seeded `SmallRng` stream everywhere.

use rand::{Rng, SeedableRng, rngs::SmallRng};

const GRAD: [(f64, f64); 8] = [
    (1.0, 1.0),
    (-1.0, 1.0),
    (1.0, -1.0),
    (-1.0, -1.0),
    (1.0, 0.0),
    (-1.0, 0.0),
    (0.0, 1.0),
    (0.0, -1.0),
];

const F2: f64 = 0.366_025_403_784_438_6; // (sqrt(3) - 1) / 2
const G2: f64 = 0.211_324_865_405_187_1; // (3 - sqrt(3)) / 6

#[derive(Debug, Clone)]
pub struct SimplexNoise {
    perm: [u8; 512],
}

impl SimplexNoise {
    pub fn new(seed: u64) -> Self {
        let mut base: [u8; 256] = [0; 256];
        for (i, v) in base.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        // Fisher-Yates over the byte table.
        for i in (1..256).rev() {
            let j = rng.random_range(0..=i);
            base.swap(i, j);
        }
        let mut perm = [0u8; 512];
        for i in 0..512 {
            perm[i] = base[i & 255];
        }
        Self { perm }
    }

    #[inline]
    fn grad(&self, ix: i64, iy: i64) -> (f64, f64) {
        let h = self.perm[((ix & 255) as usize) + self.perm[(iy & 255) as usize] as usize];
        GRAD[(h & 7) as usize]
    }

    /// Raw simplex sample, roughly in [-1, 1].
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let s = (x + y) * F2;
        let i = (x + s).floor();
        let j = (y + s).floor();
        let t = (i + j) * G2;
        let x0 = x - (i - t);
        let y0 = y - (j - t);

        let (i1, j1) = if x0 > y0 { (1.0, 0.0) } else { (0.0, 1.0) };
        let x1 = x0 - i1 + G2;
        let y1 = y0 - j1 + G2;
        let x2 = x0 - 1.0 + 2.0 * G2;
        let y2 = y0 - 1.0 + 2.0 * G2;

        let ii = i as i64;
        let jj = j as i64;

        let mut total = 0.0;
        for &(cx, cy, gx, gy) in &[
            (x0, y0, ii, jj),
            (x1, y1, ii + i1 as i64, jj + j1 as i64),
            (x2, y2, ii + 1, jj + 1),
        ] {
            let falloff = 0.5 - cx * cx - cy * cy;
            if falloff > 0.0 {
                let (dx, dy) = self.grad(gx, gy);
                total += falloff.powi(4) * (dx * cx + dy * cy);
            }
        }
        // Scale chosen so output stays within roughly [-1, 1].
        70.0 * total
    }

    /// Fractal Brownian motion: stacked octaves with decaying amplitude.
    pub fn fbm(&self, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut total = 0.0;
        let mut norm = 0.0;
        for _ in 0..octaves.max(1) {
            total += amplitude * self.sample(x * frequency, y * frequency);
            norm += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }
        total / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_field() {
        let a = SimplexNoise::new(42);
        let b = SimplexNoise::new(42);
        for i in 0..50 {
            let x = i as f64 * 0.173;
            let y = i as f64 * 0.311;
            assert_eq!(a.sample(x, y), b.sample(x, y));
            assert_eq!(a.fbm(x, y, 4, 0.5, 2.0), b.fbm(x, y, 4, 0.5, 2.0));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let a = SimplexNoise::new(1);
        let b = SimplexNoise::new(2);
        let mut diffs = 0;
        for i in 0..100 {
            let x = i as f64 * 0.29;
            let y = i as f64 * 0.41;
            if (a.sample(x, y) - b.sample(x, y)).abs() > 1e-9 {
                diffs += 1;
            }
        }
        assert!(diffs > 50);
    }

    #[test]
    fn output_stays_bounded() {
        let n = SimplexNoise::new(99);
        for i in 0..500 {
            let x = i as f64 * 0.123;
            let y = i as f64 * 0.457;
            let v = n.fbm(x, y, 5, 0.5, 2.0);
            assert!(v.is_finite() && v.abs() <= 1.5, "fbm out of range: {v}");
        }
    }
}
