//! Scenario builders: initial-state producers that populate the particle
//! store before integration.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{sphere_volume, Bounds, ParticleStore};
use crate::interaction::{HarmonicAngleChain, HarmonicBond};

/// Radius distribution for a fill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusSpec {
    Uniform(f32),
    Range { lo: f32, hi: f32 },
}

impl RadiusSpec {
    fn sample<R: Rng>(&self, rng: &mut R) -> f32 {
        match *self {
            RadiusSpec::Uniform(r) => r,
            RadiusSpec::Range { lo, hi } => rng.gen_range(lo..hi),
        }
    }
}

/// Fill a rectangular region with randomly placed spheres.
///
/// Inverse mass is derived from the material density and the d-dimensional
/// sphere volume; velocities are thermal (normal per component).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillArea {
    pub region: Bounds,
    pub count: usize,
    pub radius: RadiusSpec,
    #[serde(default = "default_density")]
    pub density: f32,
    #[serde(default)]
    pub ptype: i32,
    #[serde(default)]
    pub thermal_speed: f32,
}

fn default_density() -> f32 {
    1.0
}

impl FillArea {
    /// Add `count` particles, returning their global ids.
    pub fn apply<R: Rng>(&self, store: &mut ParticleStore, rng: &mut R) -> Vec<i32> {
        let dims = store.dims();
        assert_eq!(self.region.dims(), dims, "fill region dimension mismatch");
        store.reserve(store.size() + self.count);

        let mut x = vec![0.0f32; dims];
        let mut v = vec![0.0f32; dims];
        let mut ids = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            let sg = self.radius.sample(rng);
            for d in 0..dims {
                let lo = self.region.min[d] + sg;
                let hi = (self.region.max[d] - sg).max(lo);
                x[d] = if hi > lo { rng.gen_range(lo..hi) } else { lo };
                v[d] = self.thermal_speed * standard_normal(rng);
            }
            let im = if self.density > 0.0 {
                1.0 / (self.density * sphere_volume(sg, dims) as f32)
            } else {
                0.0
            };
            ids.push(store.add(&x, &v, sg, im, self.ptype));
        }
        ids
    }
}

/// A straight chain of particles joined by harmonic bonds, with an optional
/// straightening stiffness on consecutive triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymerChain {
    pub start: Vec<f32>,
    pub direction: Vec<f32>,
    pub count: usize,
    pub spacing: f32,
    pub radius: f32,
    #[serde(default = "default_density")]
    pub density: f32,
    #[serde(default)]
    pub ptype: i32,
    pub bond_stiffness: f32,
    #[serde(default)]
    pub angle_stiffness: f32,
}

impl PolymerChain {
    /// Add the chain and build its bonded interactions. Returns the global
    /// ids, the bond set, and the angle chain when an angle stiffness was
    /// requested.
    pub fn apply(
        &self,
        store: &mut ParticleStore,
    ) -> (Vec<i32>, HarmonicBond, Option<HarmonicAngleChain>) {
        let dims = store.dims();
        assert_eq!(self.start.len(), dims, "chain start dimension mismatch");
        assert_eq!(self.direction.len(), dims, "chain direction dimension mismatch");
        let norm: f32 = self.direction.iter().map(|d| d * d).sum::<f32>().sqrt();
        assert!(norm > 0.0, "chain direction must be non-zero");

        let im = if self.density > 0.0 {
            1.0 / (self.density * sphere_volume(self.radius, dims) as f32)
        } else {
            0.0
        };
        let zero_v = vec![0.0f32; dims];
        let mut x = vec![0.0f32; dims];
        let mut ids = Vec::with_capacity(self.count);
        for n in 0..self.count {
            for d in 0..dims {
                x[d] = self.start[d] + self.direction[d] / norm * self.spacing * n as f32;
            }
            ids.push(store.add(&x, &zero_v, self.radius, im, self.ptype));
        }

        let mut bonds = HarmonicBond::new(self.bond_stiffness);
        for pair in ids.windows(2) {
            bonds.add_bond(pair[0], pair[1], self.spacing);
        }
        let angles = if self.angle_stiffness > 0.0 && self.count >= 3 {
            let mut chain = HarmonicAngleChain::new(self.angle_stiffness);
            for triple in ids.windows(3) {
                chain.add_angle(triple[0], triple[1], triple[2]);
            }
            Some(chain)
        } else {
            None
        };
        (ids, bonds, angles)
    }
}

/// Box-Muller standard normal sample.
fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
