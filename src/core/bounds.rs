//! Rectangular simulation bounds and per-axis boundary condition flags.

use serde::{Deserialize, Serialize};

/// Per-axis boundary condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BcFlag {
    /// No action at the boundary.
    Open,
    /// Periodic wrapping; minimum image applies to displacements.
    #[default]
    Wrap,
    /// Mirror position about the crossed face and negate the normal velocity.
    Reflect,
    /// Apply an inward spring force proportional to the overshoot.
    Repulse,
}

/// Axis-aligned rectangular simulation volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl Bounds {
    pub fn new(min: Vec<f32>, max: Vec<f32>) -> Self {
        assert_eq!(min.len(), max.len(), "bounds min/max length mismatch");
        Self { min, max }
    }

    /// Number of spatial dimensions.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    /// Width of the volume along axis `d`.
    pub fn wd(&self, d: usize) -> f32 {
        self.max[d] - self.min[d]
    }

    /// Fill `out` with the geometric center.
    pub fn center(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dims());
        for d in 0..self.dims() {
            out[d] = 0.5 * (self.min[d] + self.max[d]);
        }
    }

    /// Volume of the region.
    pub fn vol(&self) -> f64 {
        (0..self.dims()).map(|d| self.wd(d) as f64).product()
    }

    /// Whether the position lies inside (inclusive of the lower face).
    pub fn contains(&self, x: &[f32]) -> bool {
        debug_assert_eq!(x.len(), self.dims());
        (0..self.dims()).all(|d| self.min[d] <= x[d] && x[d] < self.max[d])
    }
}

/// Minimum-image displacement `x - y` under the given boundary conditions.
pub fn displacement(x: &[f32], y: &[f32], dis: &mut [f32], bounds: &Bounds, bcs: &[BcFlag]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), dis.len());
    for d in 0..x.len() {
        let mut ds = x[d] - y[d];
        if bcs[d] == BcFlag::Wrap {
            let dx = bounds.wd(d) - ds.abs();
            if dx < ds.abs() {
                ds = if ds > 0.0 { -dx } else { dx };
            }
        }
        dis[d] = ds;
    }
}

/// Squared distance using straight subtraction, ignoring wrapping.
///
/// Used by the rebuild motion test, where a wrap event shows up as an
/// implausibly large displacement that the caller discards.
pub fn distance_sqr_no_wrap(x: &[f32], y: &[f32]) -> f32 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}
