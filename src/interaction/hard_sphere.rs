//! Hard-sphere overlap repulsion.

use crate::core::bounds::displacement;
use crate::core::{BcFlag, Bounds, ParticleStore};
use crate::interaction::{AccumFlags, Interaction};

/// Linear spring repulsion between overlapping spheres.
///
/// Two particles interact when `r < sg_i + sg_j`; the force magnitude is
/// `repulsion * (sg_i + sg_j - r)` along the center line.
pub struct HardSphere {
    repulsion: f32,
    pairs: Vec<(u32, u32)>,
    virial: f32,
    potential: f32,
    scratch: Vec<f32>,
}

impl HardSphere {
    pub fn new(repulsion: f32) -> Self {
        Self {
            repulsion,
            pairs: Vec::new(),
            virial: 0.0,
            potential: 0.0,
            scratch: Vec::new(),
        }
    }

    pub fn set_repulsion(&mut self, repulsion: f32) {
        self.repulsion = repulsion;
    }
}

impl Interaction for HardSphere {
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
            if r2 >= sigma * sigma {
                continue;
            }
            let r = r2.sqrt();
            if r < f32::EPSILON {
                continue;
            }
            let overlap = sigma - r;
            let fmag = self.repulsion * overlap;
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
                self.potential += 0.5 * self.repulsion * overlap * overlap;
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
