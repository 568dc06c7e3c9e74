//! Cell grid and verlet-pair machinery.
//!
//! The domain bins particles into a regular grid of cells whose widths are at
//! least the interaction cutoff plus skin, enumerates every candidate pair
//! within that range into the interaction registry, and decides when the pair
//! lists have to be rebuilt — either from observed particle motion against a
//! position snapshot, or on a fixed step cadence.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_MAX_UPDATE_DELAY, DEFAULT_MOTION_FACTOR, DEFAULT_MV_RATIO_TOLERANCE,
    DEFAULT_SKIN_DEPTH, DEFAULT_UPDATE_DELAY_STEPS,
};
use crate::core::bounds::{displacement, distance_sqr_no_wrap};
use crate::core::{BcFlag, Bounds, ParticleStore};
use crate::engine::boundary;
use crate::error::{GrainError, Result};
use crate::interaction::InteractionRegistry;

/// How the domain decides that the pair lists are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateDecision {
    /// Compare sampled particle motion against the skin depth.
    #[default]
    ByMotion,
    /// Rebuild unconditionally every `update_delay_steps` steps.
    ByStepCount,
}

/// Cell grid over the simulation bounds plus the rebuild controller.
pub struct Domain {
    sim_dims: usize,

    /// Cells per axis.
    dims: Vec<usize>,
    /// Cell width per axis; `dims[k] * widths[k]` spans the axis exactly.
    widths: Vec<f32>,
    inv_widths: Vec<f32>,
    /// Linear-index strides, last axis fastest.
    products: Vec<usize>,

    // Cell contents in CSR form, rebuilt from scratch at every construct.
    cell_start: Vec<u32>,
    cell_items: Vec<u32>,

    // Per-particle scratch, refilled at construct.
    cell_of: Vec<u32>,
    reach: Vec<f32>,
    is_large: Vec<bool>,
    large: Vec<u32>,

    /// Radius threshold separating small from large particles.
    max_small_sigma: f32,
    /// Cell width floor: `2 * max_small_sigma + skin_depth`.
    min_small_cutoff: f32,

    pub skin_depth: f32,
    pub motion_factor: f32,
    pub mv_ratio_tolerance: f32,
    pub max_update_delay: f64,
    pub update_decision: UpdateDecision,
    pub update_delay_steps: u32,
    /// If positive, the motion test inspects only this many particles.
    pub sample_size: usize,

    update_delay: f64,
    last_check: f64,
    last_update: f64,
    steps_since_last_remake: u32,

    /// Positions at the last rebuild, sampled from the tail of the range.
    snapshot: Vec<f32>,
    snapshot_len: usize,

    number_of_remakes: u32,
    missed_target: u32,
    ave_miss: f32,

    initialized: bool,
}

impl Domain {
    pub fn new(sim_dims: usize) -> Self {
        Self {
            sim_dims,
            dims: vec![1; sim_dims],
            widths: vec![0.0; sim_dims],
            inv_widths: vec![0.0; sim_dims],
            products: vec![1; sim_dims],
            cell_start: Vec::new(),
            cell_items: Vec::new(),
            cell_of: Vec::new(),
            reach: Vec::new(),
            is_large: Vec::new(),
            large: Vec::new(),
            max_small_sigma: 0.0,
            min_small_cutoff: 0.0,
            skin_depth: DEFAULT_SKIN_DEPTH,
            motion_factor: DEFAULT_MOTION_FACTOR,
            mv_ratio_tolerance: DEFAULT_MV_RATIO_TOLERANCE,
            max_update_delay: DEFAULT_MAX_UPDATE_DELAY,
            update_decision: UpdateDecision::ByMotion,
            update_delay_steps: DEFAULT_UPDATE_DELAY_STEPS,
            sample_size: 0,
            update_delay: 1e-4,
            last_check: -1.0,
            last_update: -1.0,
            steps_since_last_remake: 0,
            snapshot: Vec::new(),
            snapshot_len: 0,
            number_of_remakes: 0,
            missed_target: 0,
            ave_miss: 0.0,
            initialized: false,
        }
    }

    // --- Accessors used by run summaries and tests.

    pub fn grid_dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn cell_widths(&self) -> &[f32] {
        &self.widths
    }

    pub fn num_cells(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn cutoff(&self) -> f32 {
        self.min_small_cutoff
    }

    pub fn number_of_remakes(&self) -> u32 {
        self.number_of_remakes
    }

    pub fn missed_target(&self) -> u32 {
        self.missed_target
    }

    pub fn average_miss(&self) -> f32 {
        if self.missed_target > 0 {
            self.ave_miss / self.missed_target as f32
        } else {
            0.0
        }
    }

    /// Reset the rebuild clock for a new run.
    pub fn pre_integrate(&mut self) {
        self.last_check = -1.0;
        self.last_update = -1.0;
        self.update_delay = 1e-4;
        self.steps_since_last_remake = 0;
    }

    /// Size the cell grid from the current radius distribution and the
    /// per-type cutoff table. Called once the store is populated.
    pub fn initialize(
        &mut self,
        store: &ParticleStore,
        registry: &InteractionRegistry,
        bounds: &Bounds,
    ) -> Result<()> {
        if bounds.dims() != self.sim_dims {
            return Err(GrainError::Config(format!(
                "bounds are {}-dimensional, domain is {}-dimensional",
                bounds.dims(),
                self.sim_dims
            )));
        }
        for d in 0..self.sim_dims {
            if !(bounds.wd(d) > 0.0) {
                return Err(GrainError::Config(format!(
                    "bounds have zero width on axis {d}"
                )));
            }
        }

        self.calculate_max_small_sigma(store, registry);
        self.min_small_cutoff = 2.0 * self.max_small_sigma + self.skin_depth;

        for d in 0..self.sim_dims {
            let mut cells = (bounds.wd(d) / self.min_small_cutoff).floor() as usize;
            cells = cells.max(1);
            // Two cells on a wrapping axis make each cell its own forward
            // neighbor twice over; collapse to one.
            if cells == 2 {
                cells = 1;
            }
            self.dims[d] = cells;
            self.widths[d] = bounds.wd(d) / cells as f32;
            self.inv_widths[d] = 1.0 / self.widths[d];
        }
        let mut prod = 1;
        for d in (0..self.sim_dims).rev() {
            self.products[d] = prod;
            prod *= self.dims[d];
        }
        self.cell_start = vec![0; self.num_cells() + 1];
        self.initialized = true;
        debug!(
            "domain grid: dims {:?}, widths {:?}, cutoff {}, skin {}",
            self.dims, self.widths, self.min_small_cutoff, self.skin_depth
        );
        Ok(())
    }

    /// The threshold below which a particle only inspects adjacent cells:
    /// ~1.025 x the largest `sg * cutoff` below the midpoint of the mean and
    /// the maximum.
    fn calculate_max_small_sigma(&mut self, store: &ParticleStore, registry: &InteractionRegistry) {
        let mut sum = 0.0f32;
        let mut max = 0.0f32;
        let mut count = 0usize;
        for i in 0..store.size() {
            let t = store.types()[i];
            if t < 0 || !registry.type_interacts(t) {
                continue;
            }
            let s = store.sg()[i] * registry.max_cutoff_factor(t);
            sum += s;
            if s > max {
                max = s;
            }
            count += 1;
        }
        let mean;
        if count > 0 {
            mean = sum / count as f32;
        } else if store.size() > 0 {
            mean = store.sg()[0] * registry.max_cutoff_factor(store.types()[0]);
            max = mean;
        } else {
            self.max_small_sigma = 0.0;
            return;
        }

        let threshold = 0.5 * (mean + max);
        let mut max_under = mean;
        if threshold != mean {
            for i in 0..store.size() {
                let t = store.types()[i];
                if t < 0 || !registry.type_interacts(t) {
                    continue;
                }
                let s = store.sg()[i] * registry.max_cutoff_factor(t);
                if s < threshold && s > max_under {
                    max_under = s;
                }
            }
        }
        self.max_small_sigma = 1.025 * max_under;
    }

    /// Per-step entry point: rebuild if the store demands it, otherwise
    /// apply the configured rebuild decision.
    pub fn pre_forces(
        &mut self,
        store: &mut ParticleStore,
        registry: &mut InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
        elapsed: f64,
    ) -> Result<()> {
        self.steps_since_last_remake += 1;
        if store.number() < 1 {
            return Ok(());
        }
        if store.needs_rebuild() {
            return self.construct(store, registry, bounds, bcs, elapsed);
        }
        match self.update_decision {
            UpdateDecision::ByMotion => {
                if elapsed - self.last_update > self.update_delay {
                    if registry.has_plugins() && self.check_needs_remake(store, elapsed) {
                        return self.construct(store, registry, bounds, bcs, elapsed);
                    }
                    boundary::wrap_positions(store, bounds, bcs);
                }
            }
            UpdateDecision::ByStepCount => {
                if self.update_delay_steps <= self.steps_since_last_remake {
                    return self.construct(store, registry, bounds, bcs, elapsed);
                }
            }
        }
        Ok(())
    }

    /// Rebuild the cell grid and every plugin's pair list.
    pub fn construct(
        &mut self,
        store: &mut ParticleStore,
        registry: &mut InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
        elapsed: f64,
    ) -> Result<()> {
        assert!(self.initialized, "Domain::initialize must run first");
        store.remove_halo_particles();
        store.compact();
        boundary::wrap_positions(store, bounds, bcs);

        self.last_update = elapsed;
        self.steps_since_last_remake = 0;
        self.number_of_remakes += 1;

        self.bin_particles(store, registry, bounds)?;
        registry.clear_pair_lists();
        self.enumerate_pairs(store, registry, bounds, bcs);

        if self.update_decision == UpdateDecision::ByMotion {
            self.fill_snapshot(store);
        }
        store.set_needs_rebuild(false);
        Ok(())
    }

    /// Compute per-particle cell indices and build the CSR cell table.
    fn bin_particles(
        &mut self,
        store: &ParticleStore,
        registry: &InteractionRegistry,
        bounds: &Bounds,
    ) -> Result<()> {
        let n = store.size();
        let d = self.sim_dims;
        self.cell_of.clear();
        self.cell_of.resize(n, 0);
        self.reach.clear();
        self.reach.resize(n, 0.0);
        self.is_large.clear();
        self.is_large.resize(n, false);
        self.large.clear();

        let ncells = self.num_cells();
        self.cell_start.clear();
        self.cell_start.resize(ncells + 1, 0);

        for i in 0..n {
            let t = store.types()[i];
            debug_assert!(t >= 0, "tombstone after compaction");
            let x = store.position(i);
            let mut linear = 0usize;
            for k in 0..d {
                let mut c = ((x[k] - bounds.min[k]) * self.inv_widths[k]).floor() as isize;
                // Tolerate particles up to one cell outside on open-style
                // axes; beyond the extended bounds is fatal.
                if c < 0 {
                    if x[k] >= bounds.min[k] - self.widths[k] {
                        c = 0;
                    } else {
                        return Err(GrainError::BoundaryViolation {
                            index: i,
                            axis: k,
                            position: x[k],
                        });
                    }
                } else if c >= self.dims[k] as isize {
                    if x[k] <= bounds.max[k] + self.widths[k] {
                        c = self.dims[k] as isize - 1;
                    } else {
                        return Err(GrainError::BoundaryViolation {
                            index: i,
                            axis: k,
                            position: x[k],
                        });
                    }
                }
                linear += c as usize * self.products[k];
            }
            self.cell_of[i] = linear as u32;
            self.cell_start[linear + 1] += 1;

            let reach = store.sg()[i] * registry.max_cutoff_factor(t);
            self.reach[i] = reach;
            if reach > self.max_small_sigma {
                self.is_large[i] = true;
                self.large.push(i as u32);
            }
        }

        for c in 0..ncells {
            self.cell_start[c + 1] += self.cell_start[c];
        }
        self.cell_items.clear();
        self.cell_items.resize(n, 0);
        let mut fill = self.cell_start.clone();
        for i in 0..n {
            let c = self.cell_of[i] as usize;
            self.cell_items[fill[c] as usize] = i as u32;
            fill[c] += 1;
        }
        Ok(())
    }

    /// Emit every candidate pair within cutoff + skin into the registry.
    fn enumerate_pairs(
        &mut self,
        store: &ParticleStore,
        registry: &mut InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
    ) {
        let d = self.sim_dims;
        let ncells = self.num_cells();
        let mut dis = vec![0.0f32; d];
        let mut tuple = vec![0usize; d];
        let mut ntuple = vec![0usize; d];

        // Forward half of the 3^d neighborhood, excluding the center.
        let half = 3usize.pow(d as u32) / 2;

        for cell in 0..ncells {
            let (lo, hi) = (self.cell_start[cell] as usize, self.cell_start[cell + 1] as usize);
            let items = &self.cell_items[lo..hi];

            // Pairs within the cell.
            for (a, &i) in items.iter().enumerate() {
                if self.is_large[i as usize] {
                    continue;
                }
                for &j in &items[a + 1..] {
                    if self.is_large[j as usize] {
                        continue;
                    }
                    self.try_pair(store, registry, bounds, bcs, &mut dis, i as usize, j as usize);
                }
            }

            // Pairs against the forward half of the neighbor cells.
            self.linear_to_tuple(cell, &mut tuple);
            'offsets: for c in 0..half {
                let mut c0 = c;
                for k in 0..d {
                    let off = (c0 % 3) as isize - 1;
                    c0 /= 3;
                    if off != 0 && self.dims[k] == 1 {
                        continue 'offsets;
                    }
                    let mut idx = tuple[k] as isize + off;
                    if idx < 0 || idx >= self.dims[k] as isize {
                        if bcs[k] == BcFlag::Wrap {
                            idx = idx.rem_euclid(self.dims[k] as isize);
                        } else {
                            continue 'offsets;
                        }
                    }
                    ntuple[k] = idx as usize;
                }
                let ncell = self.tuple_to_linear(&ntuple);
                if ncell == cell {
                    continue;
                }
                let (nlo, nhi) = (
                    self.cell_start[ncell] as usize,
                    self.cell_start[ncell + 1] as usize,
                );
                for &i in items {
                    if self.is_large[i as usize] {
                        continue;
                    }
                    for &j in &self.cell_items[nlo..nhi] {
                        if self.is_large[j as usize] {
                            continue;
                        }
                        self.try_pair(store, registry, bounds, bcs, &mut dis, i as usize, j as usize);
                    }
                }
            }
        }

        self.enumerate_large_pairs(store, registry, bounds, bcs, &mut dis);
    }

    /// Pairs involving at least one large particle. The member with the
    /// larger reach walks a widened neighborhood so the pair cutoff is
    /// covered; ties break on index so nothing is emitted twice.
    fn enumerate_large_pairs(
        &mut self,
        store: &ParticleStore,
        registry: &mut InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
        dis: &mut [f32],
    ) {
        if self.large.is_empty() {
            return;
        }
        let d = self.sim_dims;
        let mut tuple = vec![0usize; d];
        // Distinct cell indices to visit, per axis.
        let mut axis_cells: Vec<Vec<usize>> = vec![Vec::new(); d];
        let large = std::mem::take(&mut self.large);

        for &li in &large {
            let i = li as usize;
            let reach_i = self.reach[i];
            let span = reach_i + reach_i.max(self.max_small_sigma) + self.skin_depth;
            self.linear_to_tuple(self.cell_of[i] as usize, &mut tuple);

            for k in 0..d {
                let r = (span * self.inv_widths[k]).ceil() as isize;
                let cells = &mut axis_cells[k];
                cells.clear();
                let dk = self.dims[k] as isize;
                if 2 * r + 1 >= dk && bcs[k] == BcFlag::Wrap {
                    cells.extend(0..self.dims[k]);
                } else {
                    for off in -r..=r {
                        let mut idx = tuple[k] as isize + off;
                        if idx < 0 || idx >= dk {
                            if bcs[k] == BcFlag::Wrap {
                                idx = idx.rem_euclid(dk);
                            } else {
                                continue;
                            }
                        }
                        let idx = idx as usize;
                        if !cells.contains(&idx) {
                            cells.push(idx);
                        }
                    }
                }
            }

            // Odometer over the per-axis cell lists.
            let mut cursor = vec![0usize; d];
            loop {
                let mut linear = 0;
                for k in 0..d {
                    linear += axis_cells[k][cursor[k]] * self.products[k];
                }
                let (lo, hi) = (
                    self.cell_start[linear] as usize,
                    self.cell_start[linear + 1] as usize,
                );
                for &j in &self.cell_items[lo..hi] {
                    let j = j as usize;
                    if j == i {
                        continue;
                    }
                    if self.is_large[j] {
                        let reach_j = self.reach[j];
                        // Emitted by the larger-reach member only.
                        if !(reach_i > reach_j || (reach_i == reach_j && i > j)) {
                            continue;
                        }
                    }
                    self.try_pair(store, registry, bounds, bcs, dis, i, j);
                }

                // Advance the odometer.
                let mut rolled_over = false;
                let mut k = d;
                while k > 0 {
                    k -= 1;
                    cursor[k] += 1;
                    if cursor[k] < axis_cells[k].len() {
                        break;
                    }
                    cursor[k] = 0;
                    if k == 0 {
                        rolled_over = true;
                    }
                }
                if rolled_over {
                    break;
                }
            }
        }
        self.large = large;
    }

    /// Route `(i, j)` to the registry if the pair lies within cutoff + skin.
    #[allow(clippy::too_many_arguments)]
    fn try_pair(
        &self,
        store: &ParticleStore,
        registry: &mut InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
        dis: &mut [f32],
        i: usize,
        j: usize,
    ) {
        displacement(store.position(i), store.position(j), dis, bounds, bcs);
        let r2: f32 = dis.iter().map(|v| v * v).sum();
        let cut = self.reach[i] + self.reach[j] + self.skin_depth;
        if r2 < cut * cut {
            registry.route_pair(store.types()[i], store.types()[j], i, j);
        }
    }

    fn linear_to_tuple(&self, mut linear: usize, tuple: &mut [usize]) {
        for k in 0..self.sim_dims {
            tuple[k] = linear / self.products[k];
            linear %= self.products[k];
        }
    }

    fn tuple_to_linear(&self, tuple: &[usize]) -> usize {
        tuple
            .iter()
            .zip(&self.products)
            .map(|(t, p)| t * p)
            .sum()
    }

    /// Record sampled positions for the motion test, from the tail of the
    /// particle range so late additions are included.
    fn fill_snapshot(&mut self, store: &ParticleStore) {
        let number = store.number();
        let samples = if self.sample_size > 0 {
            self.sample_size.min(number)
        } else {
            number
        };
        self.snapshot_len = samples;
        self.snapshot.clear();
        for s in 0..samples {
            self.snapshot
                .extend_from_slice(store.position(number - 1 - s));
        }
        // With few samples the worst mover is often missed; check earlier.
        if samples < 10 {
            self.mv_ratio_tolerance = self.mv_ratio_tolerance.min(0.9);
        }
    }

    /// Compare sampled positions against the snapshot and decide whether the
    /// skin may be breached. Also recomputes the next check delay.
    fn check_needs_remake(&mut self, store: &ParticleStore, elapsed: f64) -> bool {
        self.last_check = elapsed;
        if self.last_check - self.last_update > self.max_update_delay {
            return true;
        }
        let max_motion = self.max_motion(store);
        let motion_ratio = max_motion / self.skin_depth;

        let interval = self.last_check - self.last_update;
        let target = (self.mv_ratio_tolerance * self.motion_factor) as f64;
        let proposed = if motion_ratio > 0.0 {
            target * interval / motion_ratio as f64
        } else {
            self.max_update_delay
        };
        // Cap growth so one quiet interval cannot push the delay out
        // arbitrarily far.
        self.update_delay = proposed
            .min(self.update_delay * 4.0)
            .min(self.max_update_delay);

        if motion_ratio > self.motion_factor {
            self.missed_target += 1;
            self.ave_miss += motion_ratio;
            warn!(
                "rebuild target missed: motion ratio {motion_ratio:.3} (factor {})",
                self.motion_factor
            );
        }
        motion_ratio > self.mv_ratio_tolerance * self.motion_factor
    }

    /// Worst-case approach speed proxy: twice the largest sampled
    /// displacement since the snapshot. Straight subtraction is used;
    /// displacements beyond `(10 skin)^2` are wrap artifacts and dropped.
    fn max_motion(&self, store: &ParticleStore) -> f32 {
        let max_plausible = (10.0 * self.skin_depth) * (10.0 * self.skin_depth);
        let number = store.number();
        let mut max_sqr = 0.0f32;
        for s in 0..self.snapshot_len.min(number) {
            let old = &self.snapshot[s * self.sim_dims..(s + 1) * self.sim_dims];
            let now = store.position(number - 1 - s);
            let dsqr = distance_sqr_no_wrap(old, now);
            if dsqr < max_plausible && dsqr > max_sqr {
                max_sqr = dsqr;
            }
        }
        2.0 * max_sqr.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::HardSphere;

    fn setup(
        n_side: usize,
        radius: f32,
        box_len: f32,
    ) -> (ParticleStore, InteractionRegistry, Domain, Bounds, [BcFlag; 2]) {
        let bounds = Bounds::new(vec![0.0, 0.0], vec![box_len, box_len]);
        let bcs = [BcFlag::Wrap, BcFlag::Wrap];
        let mut store = ParticleStore::new(2);
        let gap = box_len / n_side as f32;
        for i in 0..n_side {
            for j in 0..n_side {
                store.add(
                    &[(i as f32 + 0.5) * gap, (j as f32 + 0.5) * gap],
                    &[0.0, 0.0],
                    radius,
                    1.0,
                    0,
                );
            }
        }
        let mut registry = InteractionRegistry::new(1);
        let hs = registry.add_plugin(Box::new(HardSphere::new(10.0)));
        registry.set_interaction(0, 0, hs);
        let domain = Domain::new(2);
        (store, registry, domain, bounds, bcs)
    }

    /// All pairs within cutoff by brute force, as (min, max) tuples.
    fn brute_force_pairs(
        store: &ParticleStore,
        registry: &InteractionRegistry,
        bounds: &Bounds,
        bcs: &[BcFlag],
        skin: f32,
    ) -> std::collections::BTreeSet<(usize, usize)> {
        let mut dis = vec![0.0; store.dims()];
        let mut pairs = std::collections::BTreeSet::new();
        for i in 0..store.size() {
            for j in (i + 1)..store.size() {
                displacement(store.position(i), store.position(j), &mut dis, bounds, bcs);
                let r2: f32 = dis.iter().map(|v| v * v).sum();
                let cut = store.sg()[i] * registry.max_cutoff_factor(store.types()[i])
                    + store.sg()[j] * registry.max_cutoff_factor(store.types()[j])
                    + skin;
                if r2 < cut * cut {
                    pairs.insert((i, j));
                }
            }
        }
        pairs
    }

    /// Test plugin that only records its pair list.
    struct CapturePairs {
        pairs: Vec<(usize, usize)>,
    }

    impl crate::interaction::Interaction for CapturePairs {
        fn add_pair(&mut self, i: usize, j: usize) {
            self.pairs.push((i.min(j), i.max(j)));
        }
        fn clear_pairs(&mut self) {
            self.pairs.clear();
        }
        fn pair_count(&self) -> usize {
            self.pairs.len()
        }
        fn compute(
            &mut self,
            _store: &mut ParticleStore,
            _bounds: &Bounds,
            _bcs: &[BcFlag],
            _flags: crate::interaction::AccumFlags,
        ) {
        }
    }

    fn capture_registry() -> InteractionRegistry {
        let mut registry = InteractionRegistry::new(1);
        let cap = registry.add_plugin(Box::new(CapturePairs { pairs: Vec::new() }));
        registry.set_interaction(0, 0, cap);
        registry
    }

    #[test]
    fn grid_widths_tile_the_axes() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(8, 0.05, 4.0);
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        for d in 0..2 {
            let dims = domain.grid_dims()[d];
            let w = domain.cell_widths()[d];
            assert!(w >= domain.cutoff());
            assert!((dims as f32 * w - bounds.wd(d)).abs() < 1e-4);
            assert_ne!(dims, 2, "two-cell axes must collapse");
        }
    }

    #[test]
    fn every_live_particle_lands_in_exactly_one_cell() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(8, 0.05, 4.0);
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        assert_eq!(domain.cell_items.len(), store.number());
        let mut seen = vec![false; store.number()];
        for &i in &domain.cell_items {
            assert!(!seen[i as usize], "particle binned twice");
            seen[i as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        // Cell index matches the binning formula.
        for i in 0..store.number() {
            let x = store.position(i);
            let mut linear = 0;
            for k in 0..2 {
                let c = ((x[k] - bounds.min[k]) / domain.cell_widths()[k]).floor() as usize;
                linear += c.min(domain.grid_dims()[k] - 1) * domain.products[k];
            }
            assert_eq!(domain.cell_of[i], linear as u32);
        }
    }

    #[test]
    fn enumeration_matches_brute_force() {
        let (mut store, _, mut domain, bounds, bcs) = setup(10, 0.2, 4.0);
        let mut registry = capture_registry();
        domain.skin_depth = 0.05;
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();

        let expected = brute_force_pairs(&store, &registry, &bounds, &bcs, domain.skin_depth);
        assert!(!expected.is_empty());
        assert_eq!(registry.pair_count(), expected.len());
    }

    #[test]
    fn enumeration_handles_large_particles() {
        let bounds = Bounds::new(vec![0.0, 0.0], vec![4.0, 4.0]);
        let bcs = [BcFlag::Wrap, BcFlag::Wrap];
        let mut store = ParticleStore::new(2);
        // A sea of small particles plus one much larger intruder.
        for i in 0..10 {
            for j in 0..10 {
                store.add(
                    &[0.2 + 0.38 * i as f32, 0.2 + 0.38 * j as f32],
                    &[0.0, 0.0],
                    0.05,
                    1.0,
                    0,
                );
            }
        }
        store.add(&[2.0, 2.0], &[0.0, 0.0], 0.6, 1.0, 0);

        let mut registry = capture_registry();
        let mut domain = Domain::new(2);
        domain.skin_depth = 0.05;
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();

        let expected = brute_force_pairs(&store, &registry, &bounds, &bcs, domain.skin_depth);
        assert_eq!(registry.pair_count(), expected.len());
    }

    #[test]
    fn construct_twice_is_idempotent() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(6, 0.05, 4.0);
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        let items1 = domain.cell_items.clone();
        let starts1 = domain.cell_start.clone();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        assert_eq!(domain.cell_items, items1);
        assert_eq!(domain.cell_start, starts1);
    }

    #[test]
    fn motion_test_triggers_rebuild_only_past_the_skin_fraction() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(10, 0.05, 4.0);
        domain.skin_depth = 0.05;
        domain.motion_factor = 1.0;
        domain.mv_ratio_tolerance = 1.0;
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();

        // Move the last particle (snapshots sample from the tail) by less
        // than half the skin: 2 * 0.02 / 0.05 = 0.8 <= 1.0, no rebuild.
        let last = store.number() - 1;
        store.x_mut()[last * 2] += 0.02;
        assert!(!domain.check_needs_remake(&store, 1e-3));

        // Move it past half the skin: 2 * 0.03 / 0.05 = 1.2 > 1.0.
        store.x_mut()[last * 2] += 0.01;
        assert!(domain.check_needs_remake(&store, 2e-3));
        assert_eq!(domain.missed_target(), 1);
        assert!(domain.average_miss() > 1.0);
    }

    #[test]
    fn by_motion_pre_forces_rebuilds_and_counts() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(10, 0.05, 4.0);
        domain.skin_depth = 0.05;
        domain.motion_factor = 1.0;
        domain.mv_ratio_tolerance = 1.0;
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain.pre_integrate();
        // First pre_forces constructs because the store is fresh.
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        let remakes = domain.number_of_remakes();
        assert_eq!(remakes, 1);

        // Fast particle breaches the skin; the delayed check rebuilds.
        let last = store.number() - 1;
        store.x_mut()[last * 2] += 0.06;
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.01)
            .unwrap();
        assert_eq!(domain.number_of_remakes(), remakes + 1);
    }

    #[test]
    fn by_step_count_rebuilds_on_cadence() {
        let (mut store, mut registry, mut domain, bounds, bcs) = setup(6, 0.05, 4.0);
        domain.update_decision = UpdateDecision::ByStepCount;
        domain.update_delay_steps = 3;
        domain.initialize(&store, &registry, &bounds).unwrap();
        domain.pre_integrate();
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        assert_eq!(domain.number_of_remakes(), 1);
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        assert_eq!(domain.number_of_remakes(), 1);
        domain
            .pre_forces(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        assert_eq!(domain.number_of_remakes(), 2);
    }

    #[test]
    fn two_cell_axes_collapse_and_wrap_pairs_stay_unique() {
        // Radius 0.4 in a 2.0 box gives floor(2.0 / cutoff) == 2 cells,
        // which must collapse to one; a pair straddling the wrap seam is
        // then enumerated exactly once by the in-cell pass.
        let bounds = Bounds::new(vec![0.0, 0.0], vec![2.0, 2.0]);
        let bcs = [BcFlag::Wrap, BcFlag::Wrap];
        let mut store = ParticleStore::new(2);
        store.add(&[0.1, 1.0], &[0.0, 0.0], 0.4, 1.0, 0);
        store.add(&[1.9, 1.0], &[0.0, 0.0], 0.4, 1.0, 0);

        let mut registry = capture_registry();
        let mut domain = Domain::new(2);
        domain.initialize(&store, &registry, &bounds).unwrap();
        assert_eq!(domain.grid_dims(), &[1, 1]);

        domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap();
        // Minimum image separation is 0.2 < 0.8 + skin: exactly one pair.
        assert_eq!(registry.pair_count(), 1);
    }

    #[test]
    fn out_of_bounds_particle_is_fatal() {
        let bounds = Bounds::new(vec![0.0, 0.0], vec![4.0, 4.0]);
        let bcs = [BcFlag::Open, BcFlag::Open];
        let mut store = ParticleStore::new(2);
        store.add(&[1.0, 1.0], &[0.0, 0.0], 0.05, 1.0, 0);
        store.add(&[9.0, 1.0], &[0.0, 0.0], 0.05, 1.0, 0);
        let mut registry = capture_registry();
        let mut domain = Domain::new(2);
        domain.initialize(&store, &registry, &bounds).unwrap();
        let err = domain
            .construct(&mut store, &mut registry, &bounds, &bcs, 0.0)
            .unwrap_err();
        assert!(matches!(err, GrainError::BoundaryViolation { .. }));
    }
}
