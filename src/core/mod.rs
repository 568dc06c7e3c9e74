//! Core data types: simulation bounds, boundary flags, and the particle store.

pub mod bounds;
pub mod store;

pub use bounds::{BcFlag, Bounds};
pub use store::ParticleStore;

/// Volume of a d-dimensional ball of the given radius.
///
/// Uses the recurrence `V_d = 2 pi / d * V_{d-2}` with `V_0 = 1, V_1 = 2`,
/// which avoids needing a gamma function for half-integer arguments.
pub fn sphere_volume(radius: f32, dims: usize) -> f64 {
    let mut v = if dims % 2 == 0 { 1.0f64 } else { 2.0f64 };
    let mut d = if dims % 2 == 0 { 2 } else { 3 };
    while d <= dims {
        v *= 2.0 * std::f64::consts::PI / d as f64;
        d += 2;
    }
    v * (radius as f64).powi(dims as i32)
}
