//! Structure-of-arrays particle container.
//!
//! All per-particle data lives in flat, contiguous field arrays so the hot
//! kernels (integrator half-kicks, force clearing, max-velocity reductions)
//! can stream over `number * dims` components without pointer chasing.
//!
//! Three counters order the storage: `capacity >= size >= number`. `capacity`
//! is the allocated length, `size` is one past the last slot that may hold a
//! valid particle, and `number` counts live particles (`type >= 0`). The two
//! can differ because removal only tombstones a slot (`type = -1`); the next
//! [`ParticleStore::compact`] call fills the holes with live tail particles
//! and restores `size == number`.
//!
//! Local indices are volatile (compaction moves particles); global ids are
//! stable, monotonically increasing, and never reused within a run. The
//! `id -> local index` map is the only sanctioned way to follow a particle
//! across compaction.

use std::collections::{BTreeSet, HashMap};

use log::debug;

/// Slot of the position field in the vector-data table.
pub const FIELD_X: usize = 0;
/// Slot of the velocity field in the vector-data table.
pub const FIELD_V: usize = 1;
/// Slot of the force field in the vector-data table.
pub const FIELD_F: usize = 2;

/// Slot of the radius field in the scalar-data table.
pub const FIELD_SG: usize = 0;
/// Slot of the inverse-mass field in the scalar-data table.
pub const FIELD_IM: usize = 1;

/// Slot of the type field in the integer-data table.
pub const FIELD_TYPE: usize = 0;
/// Slot of the global-id field in the integer-data table.
pub const FIELD_ID: usize = 1;

/// Structure-of-arrays storage for particles.
pub struct ParticleStore {
    dims: usize,
    capacity: usize,
    size: usize,
    number: usize,

    /// Vector fields, each `capacity * dims` long. Slots 0..=2 are X, V, F.
    vdata: Vec<Vec<f32>>,
    /// Scalar fields, each `capacity` long. Slots 0..=1 are Sg, Im.
    sdata: Vec<Vec<f32>>,
    /// Integer fields, each `capacity` long. Slots 0..=1 are Type, Id.
    idata: Vec<Vec<i32>>,

    vector_names: HashMap<String, usize>,
    scalar_names: HashMap<String, usize>,
    integer_names: HashMap<String, usize>,

    next_global_id: i32,
    id_map: HashMap<i32, usize>,

    /// Holes awaiting the next compaction, in index order.
    remove_list: BTreeSet<usize>,

    /// `(halo index, primary index)` pairs, valid until the next rebuild.
    halo_map: Vec<(usize, usize)>,

    needs_rebuild: bool,
}

impl ParticleStore {
    pub fn new(dims: usize) -> Self {
        assert!(dims > 0, "simulation must have at least one dimension");
        let mut store = Self {
            dims,
            capacity: 0,
            size: 0,
            number: 0,
            vdata: Vec::new(),
            sdata: Vec::new(),
            idata: Vec::new(),
            vector_names: HashMap::new(),
            scalar_names: HashMap::new(),
            integer_names: HashMap::new(),
            next_global_id: 0,
            id_map: HashMap::new(),
            remove_list: BTreeSet::new(),
            halo_map: Vec::new(),
            needs_rebuild: true,
        };
        store.add_vector_field("X");
        store.add_vector_field("V");
        store.add_vector_field("F");
        store.add_scalar_field("Sg");
        store.add_scalar_field("Im");
        store.add_integer_field("Type");
        store.add_integer_field("Id");
        store
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// One past the last slot that may hold a valid particle.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Count of live particles.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ensure `capacity >= n`, preserving existing contents.
    pub fn reserve(&mut self, n: usize) {
        if n <= self.capacity {
            return;
        }
        let new_capacity = n.max(2 * self.capacity).max(32);
        for v in &mut self.vdata {
            v.resize(new_capacity * self.dims, 0.0);
        }
        for s in &mut self.sdata {
            s.resize(new_capacity, 0.0);
        }
        for i in &mut self.idata {
            i.resize(new_capacity, -1);
        }
        self.capacity = new_capacity;
    }

    /// Append a particle at index `size` and return its fresh global id.
    pub fn add(&mut self, x: &[f32], v: &[f32], sg: f32, im: f32, ptype: i32) -> i32 {
        assert_eq!(x.len(), self.dims, "position length != sim dimensions");
        assert_eq!(v.len(), self.dims, "velocity length != sim dimensions");
        assert!(ptype >= 0, "cannot add a tombstoned particle");
        self.reserve(self.size + 1);

        let i = self.size;
        let base = i * self.dims;
        self.vdata[FIELD_X][base..base + self.dims].copy_from_slice(x);
        self.vdata[FIELD_V][base..base + self.dims].copy_from_slice(v);
        self.vdata[FIELD_F][base..base + self.dims].fill(0.0);
        for extra in self.vdata.iter_mut().skip(3) {
            extra[base..base + self.dims].fill(0.0);
        }
        self.sdata[FIELD_SG][i] = sg;
        self.sdata[FIELD_IM][i] = im;
        for extra in self.sdata.iter_mut().skip(2) {
            extra[i] = 0.0;
        }
        self.idata[FIELD_TYPE][i] = ptype;
        let gid = self.next_global_id;
        self.next_global_id += 1;
        self.idata[FIELD_ID][i] = gid;
        for extra in self.idata.iter_mut().skip(2) {
            extra[i] = 0;
        }

        self.id_map.insert(gid, i);
        self.size += 1;
        self.number += 1;
        self.needs_rebuild = true;
        gid
    }

    /// Whether index `i` holds a live particle.
    pub fn is_live(&self, i: usize) -> bool {
        self.idata[FIELD_TYPE][i] >= 0
    }

    /// Tombstone a particle. Its velocity and force are zeroed so stale
    /// traversals that miss the type check stay inert, and its global id is
    /// retired from the map.
    pub fn mark_for_removal(&mut self, i: usize) {
        assert!(i < self.size, "index {i} out of range (size {})", self.size);
        if self.idata[FIELD_TYPE][i] < 0 {
            return;
        }
        self.remove_list.insert(i);
        self.idata[FIELD_TYPE][i] = -1;
        self.id_map.remove(&self.idata[FIELD_ID][i]);
        self.idata[FIELD_ID][i] = -1;
        let base = i * self.dims;
        self.vdata[FIELD_V][base..base + self.dims].fill(0.0);
        self.vdata[FIELD_F][base..base + self.dims].fill(0.0);
        self.number -= 1;
        self.needs_rebuild = true;
    }

    /// Fill tombstoned holes with live particles from the tail so that
    /// indices `[0, number)` are all live and `size == number`.
    ///
    /// The id map is updated for every moved particle and `needs_rebuild` is
    /// raised, since every cached local index is now suspect.
    pub fn compact(&mut self) {
        if self.remove_list.is_empty() {
            self.size = self.number;
            return;
        }
        let holes: Vec<usize> = std::mem::take(&mut self.remove_list).into_iter().collect();
        let mut tail = self.size;
        for &hole in &holes {
            while tail > 0 && self.idata[FIELD_TYPE][tail - 1] < 0 {
                tail -= 1;
            }
            if tail == 0 || tail - 1 <= hole {
                break;
            }
            self.move_particle(tail - 1, hole);
            tail -= 1;
        }
        self.size = self.number;
        self.needs_rebuild = true;
        debug!(
            "compacted store: filled {} holes, size = number = {}",
            holes.len(),
            self.number
        );
    }

    /// Copy every field of particle `src` into slot `dst` and tombstone `src`.
    fn move_particle(&mut self, src: usize, dst: usize) {
        debug_assert!(self.idata[FIELD_TYPE][src] >= 0);
        debug_assert!(self.idata[FIELD_TYPE][dst] < 0);
        let d = self.dims;
        for v in &mut self.vdata {
            let (sb, db) = (src * d, dst * d);
            for k in 0..d {
                v[db + k] = v[sb + k];
            }
        }
        for s in &mut self.sdata {
            s[dst] = s[src];
        }
        for i in &mut self.idata {
            i[dst] = i[src];
        }
        let gid = self.idata[FIELD_ID][dst];
        self.id_map.insert(gid, dst);
        self.idata[FIELD_TYPE][src] = -1;
        self.idata[FIELD_ID][src] = -1;
    }

    /// Zero the force field over `[0, size)`.
    pub fn clear_forces(&mut self) {
        let n = self.size * self.dims;
        self.vdata[FIELD_F][..n].fill(0.0);
    }

    /// Local index of a particle given its global id, or `None` if no such
    /// particle exists.
    pub fn local_of(&self, gid: i32) -> Option<usize> {
        self.id_map.get(&gid).copied()
    }

    /// The global id the next added particle will receive.
    pub fn next_global_id(&self) -> i32 {
        self.next_global_id
    }

    // --- Field accessors. Slices are trimmed to `size` entries so kernels
    // can iterate them directly.

    pub fn x(&self) -> &[f32] {
        &self.vdata[FIELD_X][..self.size * self.dims]
    }

    pub fn x_mut(&mut self) -> &mut [f32] {
        let n = self.size * self.dims;
        &mut self.vdata[FIELD_X][..n]
    }

    pub fn v(&self) -> &[f32] {
        &self.vdata[FIELD_V][..self.size * self.dims]
    }

    pub fn v_mut(&mut self) -> &mut [f32] {
        let n = self.size * self.dims;
        &mut self.vdata[FIELD_V][..n]
    }

    pub fn f(&self) -> &[f32] {
        &self.vdata[FIELD_F][..self.size * self.dims]
    }

    pub fn f_mut(&mut self) -> &mut [f32] {
        let n = self.size * self.dims;
        &mut self.vdata[FIELD_F][..n]
    }

    pub fn sg(&self) -> &[f32] {
        &self.sdata[FIELD_SG][..self.size]
    }

    pub fn sg_mut(&mut self) -> &mut [f32] {
        let n = self.size;
        &mut self.sdata[FIELD_SG][..n]
    }

    pub fn im(&self) -> &[f32] {
        &self.sdata[FIELD_IM][..self.size]
    }

    pub fn im_mut(&mut self) -> &mut [f32] {
        let n = self.size;
        &mut self.sdata[FIELD_IM][..n]
    }

    pub fn types(&self) -> &[i32] {
        &self.idata[FIELD_TYPE][..self.size]
    }

    pub fn ids(&self) -> &[i32] {
        &self.idata[FIELD_ID][..self.size]
    }

    /// Position of particle `i` as a `dims`-length slice.
    pub fn position(&self, i: usize) -> &[f32] {
        let base = i * self.dims;
        &self.vdata[FIELD_X][base..base + self.dims]
    }

    /// Velocity of particle `i` as a `dims`-length slice.
    pub fn velocity(&self, i: usize) -> &[f32] {
        let base = i * self.dims;
        &self.vdata[FIELD_V][base..base + self.dims]
    }

    /// Simultaneous mutable views of X, V, F plus the Sg/Im/Type arrays,
    /// for kernels that touch several fields at once.
    pub fn fields_mut(&mut self) -> FieldsMut<'_> {
        let n = self.size * self.dims;
        let m = self.size;
        // Split the vector table so X, V, F can be borrowed together.
        let (x, rest) = self.vdata.split_at_mut(1);
        let (v, rest) = rest.split_at_mut(1);
        let f = &mut rest[0];
        FieldsMut {
            x: &mut x[0][..n],
            v: &mut v[0][..n],
            f: &mut f[..n],
            sg: &self.sdata[FIELD_SG][..m],
            im: &self.sdata[FIELD_IM][..m],
            types: &self.idata[FIELD_TYPE][..m],
            dims: self.dims,
        }
    }

    // --- Named extension fields.

    fn add_vector_field(&mut self, name: &str) -> usize {
        let idx = self.vdata.len();
        self.vdata.push(vec![0.0; self.capacity * self.dims]);
        self.vector_names.insert(name.to_string(), idx);
        idx
    }

    fn add_scalar_field(&mut self, name: &str) -> usize {
        let idx = self.sdata.len();
        self.sdata.push(vec![0.0; self.capacity]);
        self.scalar_names.insert(name.to_string(), idx);
        idx
    }

    fn add_integer_field(&mut self, name: &str) -> usize {
        let idx = self.idata.len();
        self.idata.push(vec![0; self.capacity]);
        self.integer_names.insert(name.to_string(), idx);
        idx
    }

    /// Index of the named vector field, creating it if absent.
    pub fn request_vector_field(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.vector_names.get(name) {
            return idx;
        }
        self.add_vector_field(name)
    }

    /// Index of the named scalar field, creating it if absent.
    pub fn request_scalar_field(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.scalar_names.get(name) {
            return idx;
        }
        self.add_scalar_field(name)
    }

    /// Index of the named integer field, creating it if absent.
    pub fn request_integer_field(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.integer_names.get(name) {
            return idx;
        }
        self.add_integer_field(name)
    }

    /// Index of the named vector field, without creating it.
    pub fn vector_field(&self, name: &str) -> Option<usize> {
        self.vector_names.get(name).copied()
    }

    pub fn scalar_field(&self, name: &str) -> Option<usize> {
        self.scalar_names.get(name).copied()
    }

    pub fn integer_field(&self, name: &str) -> Option<usize> {
        self.integer_names.get(name).copied()
    }

    pub fn vector_data(&self, idx: usize) -> &[f32] {
        &self.vdata[idx][..self.size * self.dims]
    }

    pub fn vector_data_mut(&mut self, idx: usize) -> &mut [f32] {
        let n = self.size * self.dims;
        &mut self.vdata[idx][..n]
    }

    pub fn scalar_data(&self, idx: usize) -> &[f32] {
        &self.sdata[idx][..self.size]
    }

    pub fn scalar_data_mut(&mut self, idx: usize) -> &mut [f32] {
        let n = self.size;
        &mut self.sdata[idx][..n]
    }

    pub fn integer_data(&self, idx: usize) -> &[i32] {
        &self.idata[idx][..self.size]
    }

    pub fn integer_data_mut(&mut self, idx: usize) -> &mut [i32] {
        let n = self.size;
        &mut self.idata[idx][..n]
    }

    // --- Halo images.

    /// Append a halo image of `primary`, displaced by `shift`. The image
    /// carries its primary's velocity, radius, mass, and type, so it is
    /// binned and interacts like any live particle. Halo indices stay valid
    /// only until the next compaction; the domain removes all halos before
    /// it compacts.
    pub fn add_halo_of(&mut self, primary: usize, shift: &[f32]) -> usize {
        assert!(primary < self.size && self.is_live(primary));
        assert_eq!(shift.len(), self.dims);
        let mut x = self.position(primary).to_vec();
        for (xd, sd) in x.iter_mut().zip(shift) {
            *xd += sd;
        }
        let v = self.velocity(primary).to_vec();
        let sg = self.sdata[FIELD_SG][primary];
        let im = self.sdata[FIELD_IM][primary];
        let ptype = self.idata[FIELD_TYPE][primary];
        self.add(&x, &v, sg, im, ptype);
        let halo = self.size - 1;
        self.halo_map.push((halo, primary));
        halo
    }

    /// Number of halo images currently registered.
    pub fn halo_count(&self) -> usize {
        self.halo_map.len()
    }

    /// Add each halo's accumulated force into its primary, then zero the
    /// halo's force buffer. Runs after all force computation, before the
    /// second integrator kick.
    pub fn fold_halo_forces(&mut self) {
        let d = self.dims;
        for &(halo, primary) in &self.halo_map {
            let (hb, pb) = (halo * d, primary * d);
            for k in 0..d {
                let fh = self.vdata[FIELD_F][hb + k];
                self.vdata[FIELD_F][pb + k] += fh;
                self.vdata[FIELD_F][hb + k] = 0.0;
            }
        }
    }

    /// Tombstone every halo image and clear the halo map.
    pub fn remove_halo_particles(&mut self) {
        let halos: Vec<usize> = self.halo_map.drain(..).map(|(h, _)| h).collect();
        for h in halos {
            self.mark_for_removal(h);
        }
    }

    // --- Rebuild flag.

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn set_needs_rebuild(&mut self, flag: bool) {
        self.needs_rebuild = flag;
    }

    /// Largest type value among live particles, or -1 when empty.
    pub fn max_type(&self) -> i32 {
        self.types().iter().copied().filter(|&t| t >= 0).max().unwrap_or(-1)
    }
}

/// Disjoint mutable/shared borrows of the core fields for combined kernels.
pub struct FieldsMut<'a> {
    pub x: &'a mut [f32],
    pub v: &'a mut [f32],
    pub f: &'a mut [f32],
    pub sg: &'a [f32],
    pub im: &'a [f32],
    pub types: &'a [i32],
    pub dims: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_store(n: usize) -> ParticleStore {
        let mut store = ParticleStore::new(2);
        for i in 0..n {
            store.add(&[i as f32, 0.0], &[0.0, 0.0], 0.05, 1.0, 0);
        }
        store
    }

    #[test]
    fn counters_after_adds() {
        let store = filled_store(10);
        assert_eq!(store.number(), 10);
        assert_eq!(store.size(), 10);
        assert!(store.capacity() >= 10);
        for i in 0..10 {
            assert_eq!(store.local_of(store.ids()[i]), Some(i));
        }
    }

    #[test]
    fn add_then_remove_then_compact_restores_counts() {
        let mut store = filled_store(5);
        let next_before = store.next_global_id();
        let gid = store.add(&[9.0, 9.0], &[1.0, 0.0], 0.1, 1.0, 0);
        let idx = store.local_of(gid).unwrap();
        store.mark_for_removal(idx);
        store.compact();
        assert_eq!(store.number(), 5);
        assert_eq!(store.size(), 5);
        assert_eq!(store.local_of(gid), None);
        // Ids are never reused.
        assert_eq!(store.next_global_id(), next_before + 1);
    }

    #[test]
    fn mark_for_removal_zeroes_velocity_and_force() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.5, 0.5], &[3.0, -1.0], 0.05, 1.0, 0);
        store.f_mut()[0] = 7.0;
        store.mark_for_removal(0);
        assert_eq!(store.types()[0], -1);
        assert_eq!(store.v()[0], 0.0);
        assert_eq!(store.f()[0], 0.0);
        assert_eq!(store.number(), 0);
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn compact_after_bulk_removal() {
        // 1000 adds, remove the even-indexed half, compact.
        let mut store = filled_store(1000);
        let surviving: Vec<i32> = (0..1000)
            .filter(|i| i % 2 == 1)
            .map(|i| store.ids()[i])
            .collect();
        for i in (0..1000).step_by(2) {
            store.mark_for_removal(i);
        }
        store.compact();
        assert_eq!(store.number(), 500);
        assert_eq!(store.size(), 500);
        for i in 0..store.size() {
            assert!(store.is_live(i), "tombstone left at {i}");
        }
        for gid in surviving {
            let idx = store.local_of(gid).expect("survivor lost from id map");
            assert_eq!(store.ids()[idx], gid);
        }
        assert!(store.needs_rebuild());
    }

    #[test]
    fn compact_moves_field_data_with_particles() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.0, 0.0], &[0.0, 0.0], 0.1, 1.0, 0);
        let keep = store.add(&[3.0, 4.0], &[1.0, 2.0], 0.2, 0.5, 3);
        store.mark_for_removal(0);
        store.compact();
        let idx = store.local_of(keep).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(store.position(0), &[3.0, 4.0]);
        assert_eq!(store.velocity(0), &[1.0, 2.0]);
        assert_eq!(store.sg()[0], 0.2);
        assert_eq!(store.im()[0], 0.5);
        assert_eq!(store.types()[0], 3);
    }

    #[test]
    fn reserve_preserves_contents() {
        let mut store = filled_store(3);
        store.reserve(1000);
        assert!(store.capacity() >= 1000);
        assert_eq!(store.position(2), &[2.0, 0.0]);
        assert_eq!(store.number(), 3);
    }

    #[test]
    fn named_extension_fields() {
        let mut store = filled_store(2);
        let tq = store.request_scalar_field("Tq");
        assert_eq!(store.request_scalar_field("Tq"), tq);
        store.scalar_data_mut(tq)[1] = 2.5;
        assert_eq!(store.scalar_data(tq)[1], 2.5);
        assert_eq!(store.scalar_field("missing"), None);
    }

    #[test]
    fn halo_forces_fold_back_to_primary() {
        let mut store = filled_store(1);
        let halo = store.add_halo_of(0, &[1.0, 0.0]);
        assert_eq!(store.position(halo), &[1.0, 0.0]);
        store.f_mut()[halo * 2] = 2.0;
        store.fold_halo_forces();
        assert_eq!(store.f()[0], 2.0);
        assert_eq!(store.f()[halo * 2], 0.0);
        store.remove_halo_particles();
        store.compact();
        assert_eq!(store.number(), 1);
        assert_eq!(store.halo_count(), 0);
    }

    #[test]
    fn clear_forces_covers_whole_range() {
        let mut store = filled_store(4);
        for f in store.f_mut() {
            *f = 1.0;
        }
        store.clear_forces();
        assert!(store.f().iter().all(|&f| f == 0.0));
    }
}
