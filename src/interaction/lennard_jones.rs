//! Lennard-Jones pair interaction.

use crate::config::DEFAULT_LENNARD_JONES_CUTOFF;
use crate::core::bounds::displacement;
use crate::core::{BcFlag, Bounds, ParticleStore};
use crate::interaction::{AccumFlags, Interaction};

/// Truncated and shifted 12-6 Lennard-Jones potential.
///
/// The pair diameter is `sigma = sg_i + sg_j`; the interaction is cut off at
/// `cutoff * sigma` and the potential shifted so it vanishes there.
pub struct LennardJones {
    strength: f32,
    cutoff: f32,
    pairs: Vec<(u32, u32)>,
    virial: f32,
    potential: f32,
    scratch: Vec<f32>,
}

impl LennardJones {
    pub fn new(strength: f32) -> Self {
        Self {
            strength,
            cutoff: DEFAULT_LENNARD_JONES_CUTOFF,
            pairs: Vec::new(),
            virial: 0.0,
            potential: 0.0,
            scratch: Vec::new(),
        }
    }

    pub fn with_cutoff(mut self, cutoff: f32) -> Self {
        assert!(cutoff > 0.0);
        self.cutoff = cutoff;
        self
    }
}

impl Interaction for LennardJones {
    fn cutoff_factor(&self) -> f32 {
        self.cutoff
    }

    fn add_pair(&mut self, i: usize, j: usize) {
        self.pairs.push((i as u32, j as u32));
    }

    fn clear_pairs(&mut self) {
        self.pairs.clear();
    }

    fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    fn compute(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag], flags: AccumFlags) {
        self.virial = 0.0;
        self.potential = 0.0;
        let dims = store.dims();
        self.scratch.resize(dims, 0.0);
        let dis = &mut self.scratch;

        let fields = store.fields_mut();
        let (x, f, sg, types) = (&*fields.x, fields.f, fields.sg, fields.types);

        for &(i, j) in &self.pairs {
            let (i, j) = (i as usize, j as usize);
            if types[i] < 0 || types[j] < 0 {
                continue;
            }
            let (bi, bj) = (i * dims, j * dims);
            displacement(&x[bi..bi + dims], &x[bj..bj + dims], dis, bounds, bcs);
            let r2: f32 = dis.iter().map(|d| d * d).sum();
            let sigma = sg[i] + sg[j];
            let rc = self.cutoff * sigma;
            if r2 >= rc * rc {
                continue;
            }
            let r = r2.sqrt();
            if r < f32::EPSILON {
                continue;
            }
            let s6 = (sigma / r).powi(6);
            let s12 = s6 * s6;
            // F = 24 eps / r * (2 (sigma/r)^12 - (sigma/r)^6), repulsive outward.
            let fmag = 24.0 * self.strength / r * (2.0 * s12 - s6);
            let inv_r = 1.0 / r;
            for k in 0..dims {
                let fk = fmag * dis[k] * inv_r;
                f[bi + k] += fk;
                f[bj + k] -= fk;
            }
            if flags.virial {
                self.virial += fmag * r;
            }
            if flags.potential {
                let sc6 = (1.0 / self.cutoff).powi(6);
                let shift = 4.0 * self.strength * (sc6 * sc6 - sc6);
                self.potential += 4.0 * self.strength * (s12 - s6) - shift;
            }
        }
    }

    fn virial(&self) -> f32 {
        self.virial
    }

    fn potential_energy(&self) -> f32 {
        self.potential
    }
}
