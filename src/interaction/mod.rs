//! Interaction plugins and the type-pair registry.
//!
//! The domain enumerates candidate pairs once per rebuild and routes each one
//! to the plugin registered for that ordered type pair; plugins keep the
//! routed pairs in their own verlet lists and evaluate forces from them every
//! step until the next rebuild.

pub mod bonded;
pub mod hard_sphere;
pub mod lennard_jones;

pub use bonded::{Bonded, HarmonicAngleChain, HarmonicBond};
pub use hard_sphere::HardSphere;
pub use lennard_jones::LennardJones;

use crate::core::{BcFlag, Bounds, ParticleStore};

/// Which scalar accumulators plugins should maintain this step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccumFlags {
    pub virial: bool,
    pub potential: bool,
}

/// A short-range pair interaction.
///
/// Forces accumulated by `compute` must be commutative adds into the force
/// field and symmetric in the momentum-transfer sense: whatever is added to
/// `F[i]` is subtracted from `F[j]`.
pub trait Interaction {
    /// Interaction range as a multiple of a particle's radius. Declared
    /// before first use; drives cell sizing.
    fn cutoff_factor(&self) -> f32 {
        1.0
    }

    /// Accept a candidate pair from the domain's enumeration.
    fn add_pair(&mut self, i: usize, j: usize);

    /// Drop all accumulated pairs (called at every rebuild).
    fn clear_pairs(&mut self);

    /// Current verlet-list length.
    fn pair_count(&self) -> usize;

    /// Evaluate forces over the accumulated pairs.
    fn compute(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag], flags: AccumFlags);

    /// Virial accumulated by the last `compute`.
    fn virial(&self) -> f32 {
        0.0
    }

    /// Potential energy accumulated by the last `compute`.
    fn potential_energy(&self) -> f32 {
        0.0
    }
}

/// Maps ordered type pairs to interaction plugins and owns the per-type
/// cutoff table that drives the domain's cell sizing.
pub struct InteractionRegistry {
    ntypes: usize,
    /// `ntypes * ntypes` table of plugin indices; `None` means the pair does
    /// not interact.
    table: Vec<Option<usize>>,
    plugins: Vec<Box<dyn Interaction>>,
    /// Per-type maximum cutoff factor over all plugins handling `(t, _)`.
    max_cutoffs: Vec<f32>,
    do_virial: bool,
    do_potential: bool,
    virial: f32,
    potential: f32,
}

impl InteractionRegistry {
    pub fn new(ntypes: usize) -> Self {
        let ntypes = ntypes.max(1);
        Self {
            ntypes,
            table: vec![None; ntypes * ntypes],
            plugins: Vec::new(),
            max_cutoffs: vec![1.0; ntypes],
            do_virial: true,
            do_potential: true,
            virial: 0.0,
            potential: 0.0,
        }
    }

    pub fn ntypes(&self) -> usize {
        self.ntypes
    }

    /// Grow the type table to hold at least `ntypes` types.
    pub fn set_ntypes(&mut self, ntypes: usize) {
        if ntypes <= self.ntypes {
            return;
        }
        let mut table = vec![None; ntypes * ntypes];
        for t1 in 0..self.ntypes {
            for t2 in 0..self.ntypes {
                table[t1 * ntypes + t2] = self.table[t1 * self.ntypes + t2];
            }
        }
        self.table = table;
        self.max_cutoffs.resize(ntypes, 1.0);
        self.ntypes = ntypes;
    }

    /// Register a plugin instance and return its handle for
    /// [`set_interaction`](Self::set_interaction).
    pub fn add_plugin(&mut self, plugin: Box<dyn Interaction>) -> usize {
        self.plugins.push(plugin);
        self.plugins.len() - 1
    }

    /// Assign a plugin to the type pair `(t1, t2)` and its mirror.
    pub fn set_interaction(&mut self, t1: i32, t2: i32, plugin: usize) {
        assert!(t1 >= 0 && t2 >= 0, "interaction types must be non-negative");
        assert!(plugin < self.plugins.len(), "unknown plugin handle {plugin}");
        let needed = (t1.max(t2) as usize) + 1;
        self.set_ntypes(needed);
        let (a, b) = (t1 as usize, t2 as usize);
        self.table[a * self.ntypes + b] = Some(plugin);
        self.table[b * self.ntypes + a] = Some(plugin);
        self.refresh_cutoffs();
    }

    /// Recompute the per-type cutoff table from the registered plugins.
    pub fn refresh_cutoffs(&mut self) {
        for t in 0..self.ntypes {
            let mut cut = 1.0f32;
            for other in 0..self.ntypes {
                if let Some(p) = self.table[t * self.ntypes + other] {
                    cut = cut.max(self.plugins[p].cutoff_factor());
                }
            }
            self.max_cutoffs[t] = cut;
        }
    }

    /// Maximum cutoff factor declared by any plugin handling `(t, _)`.
    pub fn max_cutoff_factor(&self, t: i32) -> f32 {
        if t < 0 || t as usize >= self.ntypes {
            return 1.0;
        }
        self.max_cutoffs[t as usize]
    }

    /// Whether any plugin handles pairs of this type.
    pub fn type_interacts(&self, t: i32) -> bool {
        if t < 0 || t as usize >= self.ntypes {
            return false;
        }
        let t = t as usize;
        (0..self.ntypes).any(|o| self.table[t * self.ntypes + o].is_some())
    }

    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Drop every plugin's verlet list (called at each rebuild).
    pub fn clear_pair_lists(&mut self) {
        for plugin in &mut self.plugins {
            plugin.clear_pairs();
        }
    }

    /// Route one candidate pair to the plugin registered for its type pair.
    pub fn route_pair(&mut self, t1: i32, t2: i32, i: usize, j: usize) {
        if t1 < 0 || t2 < 0 {
            return;
        }
        let (a, b) = (t1 as usize, t2 as usize);
        if a >= self.ntypes || b >= self.ntypes {
            return;
        }
        if let Some(p) = self.table[a * self.ntypes + b] {
            self.plugins[p].add_pair(i, j);
        }
    }

    /// Evaluate all plugins over their verlet lists. The virial and potential
    /// accumulators are reset at this step boundary.
    pub fn interact(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]) {
        self.virial = 0.0;
        self.potential = 0.0;
        let flags = AccumFlags {
            virial: self.do_virial,
            potential: self.do_potential,
        };
        for plugin in &mut self.plugins {
            plugin.compute(store, bounds, bcs, flags);
            if self.do_virial {
                self.virial += plugin.virial();
            }
            if self.do_potential {
                self.potential += plugin.potential_energy();
            }
        }
    }

    /// The accumulator toggles, for collaborators that honor the same flags.
    pub fn accum_flags(&self) -> AccumFlags {
        AccumFlags {
            virial: self.do_virial,
            potential: self.do_potential,
        }
    }

    pub fn set_do_virial(&mut self, on: bool) {
        self.do_virial = on;
    }

    pub fn set_do_potential(&mut self, on: bool) {
        self.do_potential = on;
    }

    /// Virial accumulated over the last `interact` call.
    pub fn virial(&self) -> f32 {
        self.virial
    }

    /// Potential energy accumulated over the last `interact` call.
    pub fn potential_energy(&self) -> f32 {
        self.potential
    }

    /// Total verlet-list length over all plugins.
    pub fn pair_count(&self) -> usize {
        self.plugins.iter().map(|p| p.pair_count()).sum()
    }

    /// Per-plugin verlet-list lengths, for run summaries.
    pub fn pair_counts(&self) -> Vec<usize> {
        self.plugins.iter().map(|p| p.pair_count()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_by_ordered_type_pair() {
        let mut registry = InteractionRegistry::new(2);
        let hs = registry.add_plugin(Box::new(HardSphere::new(10.0)));
        registry.set_interaction(0, 1, hs);

        registry.route_pair(0, 1, 3, 4);
        registry.route_pair(1, 0, 5, 6);
        registry.route_pair(0, 0, 7, 8); // no plugin for (0,0)
        assert_eq!(registry.pair_count(), 2);

        registry.clear_pair_lists();
        assert_eq!(registry.pair_count(), 0);
    }

    #[test]
    fn cutoff_table_tracks_largest_plugin() {
        let mut registry = InteractionRegistry::new(2);
        let hs = registry.add_plugin(Box::new(HardSphere::new(10.0)));
        let lj = registry.add_plugin(Box::new(LennardJones::new(0.01)));
        registry.set_interaction(0, 0, hs);
        registry.set_interaction(0, 1, lj);
        assert!((registry.max_cutoff_factor(0) - 2.5).abs() < 1e-6);
        assert!((registry.max_cutoff_factor(1) - 2.5).abs() < 1e-6);
        assert!(registry.type_interacts(0));
        assert!(!registry.type_interacts(5));
    }

    #[test]
    fn set_interaction_grows_type_table() {
        let mut registry = InteractionRegistry::new(1);
        let hs = registry.add_plugin(Box::new(HardSphere::new(10.0)));
        registry.set_interaction(2, 3, hs);
        assert_eq!(registry.ntypes(), 4);
        registry.route_pair(3, 2, 0, 1);
        assert_eq!(registry.pair_count(), 1);
    }
}
