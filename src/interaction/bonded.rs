//! Bonded interactions: harmonic bonds and angle chains.
//!
//! Bonds reference particles by global id and resolve local indices through
//! the id map at evaluation time, so they survive compaction and removals; a
//! bond whose endpoint no longer exists is silently skipped.

use crate::core::bounds::displacement;
use crate::core::{BcFlag, Bounds, ParticleStore};
use crate::interaction::AccumFlags;

/// A bonded interaction evaluated after the pair interactions each step.
pub trait Bonded {
    fn interact(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag], flags: AccumFlags);

    fn potential_energy(&self) -> f32 {
        0.0
    }
}

struct BondSpec {
    a: i32,
    b: i32,
    rest: f32,
}

/// Harmonic springs between particle pairs.
pub struct HarmonicBond {
    stiffness: f32,
    bonds: Vec<BondSpec>,
    potential: f32,
    scratch: Vec<f32>,
}

impl HarmonicBond {
    pub fn new(stiffness: f32) -> Self {
        Self {
            stiffness,
            bonds: Vec::new(),
            potential: 0.0,
            scratch: Vec::new(),
        }
    }

    /// Bond two particles (by global id) with the given rest length.
    pub fn add_bond(&mut self, gid_a: i32, gid_b: i32, rest: f32) {
        self.bonds.push(BondSpec {
            a: gid_a,
            b: gid_b,
            rest,
        });
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }
}

impl Bonded for HarmonicBond {
    fn interact(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag], flags: AccumFlags) {
        self.potential = 0.0;
        let dims = store.dims();
        self.scratch.resize(dims, 0.0);

        for bond in &self.bonds {
            let (Some(i), Some(j)) = (store.local_of(bond.a), store.local_of(bond.b)) else {
                continue;
            };
            let dis = &mut self.scratch;
            displacement(store.position(i), store.position(j), dis, bounds, bcs);
            let r2: f32 = dis.iter().map(|d| d * d).sum();
            let r = r2.sqrt();
            if r < f32::EPSILON {
                continue;
            }
            let stretch = r - bond.rest;
            let fmag = -self.stiffness * stretch;
            let inv_r = 1.0 / r;
            let f = store.f_mut();
            let (bi, bj) = (i * dims, j * dims);
            for k in 0..dims {
                let fk = fmag * dis[k] * inv_r;
                f[bi + k] += fk;
                f[bj + k] -= fk;
            }
            if flags.potential {
                self.potential += 0.5 * self.stiffness * stretch * stretch;
            }
        }
    }

    fn potential_energy(&self) -> f32 {
        self.potential
    }
}

/// Straightening potential `U = k (1 + cos theta)` on consecutive particle
/// triples, minimized when the chain is straight.
pub struct HarmonicAngleChain {
    stiffness: f32,
    triples: Vec<(i32, i32, i32)>,
    potential: f32,
}

impl HarmonicAngleChain {
    pub fn new(stiffness: f32) -> Self {
        Self {
            stiffness,
            triples: Vec::new(),
            potential: 0.0,
        }
    }

    /// Add an angle centered on `gid_b`.
    pub fn add_angle(&mut self, gid_a: i32, gid_b: i32, gid_c: i32) {
        self.triples.push((gid_a, gid_b, gid_c));
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

impl Bonded for HarmonicAngleChain {
    fn interact(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag], flags: AccumFlags) {
        self.potential = 0.0;
        let dims = store.dims();
        let mut a = vec![0.0f32; dims];
        let mut b = vec![0.0f32; dims];

        for &(g1, g2, g3) in &self.triples {
            let (Some(i1), Some(i2), Some(i3)) =
                (store.local_of(g1), store.local_of(g2), store.local_of(g3))
            else {
                continue;
            };
            displacement(store.position(i1), store.position(i2), &mut a, bounds, bcs);
            displacement(store.position(i3), store.position(i2), &mut b, bounds, bcs);
            let la2: f32 = a.iter().map(|v| v * v).sum();
            let lb2: f32 = b.iter().map(|v| v * v).sum();
            let (la, lb) = (la2.sqrt(), lb2.sqrt());
            if la < f32::EPSILON || lb < f32::EPSILON {
                continue;
            }
            let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
            let cos_theta = (dot / (la * lb)).clamp(-1.0, 1.0);

            // F = -k grad(cos theta); the center picks up the reaction force.
            let k = self.stiffness;
            let f = store.f_mut();
            let (b1, b2, b3) = (i1 * dims, i2 * dims, i3 * dims);
            for d in 0..dims {
                let grad1 = b[d] / (la * lb) - cos_theta * a[d] / la2;
                let grad3 = a[d] / (la * lb) - cos_theta * b[d] / lb2;
                let f1 = -k * grad1;
                let f3 = -k * grad3;
                f[b1 + d] += f1;
                f[b3 + d] += f3;
                f[b2 + d] -= f1 + f3;
            }
            if flags.potential {
                self.potential += k * (1.0 + cos_theta);
            }
        }
    }

    fn potential_energy(&self) -> f32 {
        self.potential
    }
}
