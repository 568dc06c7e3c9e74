//! Boundary condition application.
//!
//! Wrap runs at construct time and at step end. Reflect and repulse run in
//! the `pre_forces` phase right after the force buffer is cleared, since
//! repulse accumulates into it.

use crate::core::{BcFlag, Bounds, ParticleStore};

/// Map positions on wrapping axes back into `[min, max)`.
pub fn wrap_positions(store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]) {
    let dims = store.dims();
    let size = store.size();
    let x = store.x_mut();
    for d in 0..dims {
        if bcs[d] != BcFlag::Wrap {
            continue;
        }
        let (min, max) = (bounds.min[d], bounds.max[d]);
        let wd = max - min;
        for n in 0..size {
            let xi = &mut x[n * dims + d];
            if *xi < min {
                *xi = max - (min - *xi) % wd;
                // Exact multiples of the width land on the upper face.
                if *xi >= max {
                    *xi = min;
                }
            } else if *xi >= max {
                *xi = (*xi - min) % wd + min;
            }
        }
    }
}

/// Mirror positions about crossed reflecting faces and negate the normal
/// velocity component.
pub fn reflect_positions(store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]) {
    let dims = store.dims();
    let size = store.size();
    let fields = store.fields_mut();
    let (x, v) = (fields.x, fields.v);
    for d in 0..dims {
        if bcs[d] != BcFlag::Reflect {
            continue;
        }
        let (min, max) = (bounds.min[d], bounds.max[d]);
        for n in 0..size {
            let idx = n * dims + d;
            if x[idx] < min {
                x[idx] = 2.0 * min - x[idx];
                v[idx] = -v[idx];
            } else if x[idx] > max {
                x[idx] = 2.0 * max - x[idx];
                v[idx] = -v[idx];
            }
        }
    }
}

/// Push overshooting particles back inside with a spring plus an optional
/// dissipative term. Returns the accumulated boundary force and the spring
/// energy `1/2 k dx^2` summed over all overshoots this step.
pub fn repulse_positions(
    store: &mut ParticleStore,
    bounds: &Bounds,
    bcs: &[BcFlag],
    repulsion: f32,
    dissipation: f32,
) -> (f32, f32) {
    let dims = store.dims();
    let size = store.size();
    let mut boundary_force = 0.0f32;
    let mut boundary_energy = 0.0f32;
    let fields = store.fields_mut();
    let (x, v, f, types) = (&*fields.x, &*fields.v, fields.f, fields.types);
    for d in 0..dims {
        if bcs[d] != BcFlag::Repulse {
            continue;
        }
        let (min, max) = (bounds.min[d], bounds.max[d]);
        for n in 0..size {
            if types[n] < 0 {
                continue;
            }
            let idx = n * dims + d;
            if x[idx] < min {
                let dx = min - x[idx];
                let force = repulsion * dx + dissipation * (-v[idx]).max(0.0);
                f[idx] += force;
                boundary_force += force;
                boundary_energy += 0.5 * repulsion * dx * dx;
            } else if x[idx] > max {
                let dx = x[idx] - max;
                let force = repulsion * dx + dissipation * v[idx].max(0.0);
                f[idx] -= force;
                boundary_force += force;
                boundary_energy += 0.5 * repulsion * dx * dx;
            }
        }
    }
    (boundary_force, boundary_energy)
}

/// Constant-acceleration attraction toward the domain center.
pub fn attract_center(store: &mut ParticleStore, bounds: &Bounds, strength: f32) {
    if strength == 0.0 {
        return;
    }
    let dims = store.dims();
    let size = store.size();
    let mut center = vec![0.0f32; dims];
    bounds.center(&mut center);
    let fields = store.fields_mut();
    let (x, f, im, types) = (&*fields.x, fields.f, fields.im, fields.types);
    for n in 0..size {
        if types[n] < 0 || im[n] == 0.0 {
            continue;
        }
        let base = n * dims;
        let mut norm = 0.0f32;
        for d in 0..dims {
            let dx = center[d] - x[base + d];
            norm += dx * dx;
        }
        let norm = norm.sqrt();
        if norm < f32::EPSILON {
            continue;
        }
        // Constant acceleration of magnitude `strength` toward the center.
        let scale = strength / (im[n] * norm);
        for d in 0..dims {
            f[base + d] += scale * (center[d] - x[base + d]);
        }
    }
}
