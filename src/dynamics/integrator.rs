//! Integration kernels.
//!
//! Both integrators stream over the flat component arrays (`size * dims`
//! entries), vectorizing across particles rather than dimensions. Tombstoned
//! slots carry zero velocity and force, so they pass through the kernels
//! inertly.

use crate::config::DEFAULT_DAMPING_CONSTANT;
use crate::core::ParticleStore;
use crate::dynamics::timestep::TimeStepController;
use crate::engine::sync::DomainSync;
use crate::error::Result;

/// The closed set of integration methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntegratorMethod {
    /// Symplectic second-order kick-drift-kick.
    VelocityVerlet,
    /// First-order position update `x += gamma * im * f * dt`; velocity is
    /// not a degree of freedom.
    Overdamped { damping: f32 },
}

/// An integration method plus its adaptive timestep controller.
#[derive(Debug, Clone)]
pub struct Integrator {
    pub ctrl: TimeStepController,
    pub method: IntegratorMethod,
}

impl Integrator {
    pub fn velocity_verlet() -> Self {
        Self {
            ctrl: TimeStepController::default(),
            method: IntegratorMethod::VelocityVerlet,
        }
    }

    pub fn overdamped() -> Self {
        Self {
            ctrl: TimeStepController::default(),
            method: IntegratorMethod::Overdamped {
                damping: DEFAULT_DAMPING_CONSTANT,
            },
        }
    }

    pub fn dt(&self) -> f32 {
        self.ctrl.dt
    }

    pub fn set_dt(&mut self, dt: f32) {
        self.ctrl.dt = dt;
    }

    pub fn pre_integrate(&mut self, store: &ParticleStore) {
        self.ctrl.pre_integrate(store);
    }

    pub fn pre_step(&mut self, store: &ParticleStore, sync: &dyn DomainSync) -> Result<()> {
        self.ctrl.pre_step(store, sync)
    }

    /// First half-kick and drift (velocity-Verlet only).
    pub fn pre_forces(&mut self, store: &mut ParticleStore) {
        if self.method != IntegratorMethod::VelocityVerlet {
            return;
        }
        let dt = self.ctrl.dt;
        let hdt = 0.5 * dt;
        let fields = store.fields_mut();
        let dims = fields.dims;

        for (i, v) in fields.v.iter_mut().enumerate() {
            *v += hdt * fields.im[i / dims] * fields.f[i];
            debug_assert!(v.is_finite());
        }
        // Separate loop: marginally faster than fusing the updates.
        for (i, x) in fields.x.iter_mut().enumerate() {
            *x += dt * fields.v[i];
            debug_assert!(x.is_finite());
        }
    }

    /// Second half-kick (velocity-Verlet) or the overdamped displacement.
    pub fn post_forces(&mut self, store: &mut ParticleStore) {
        let dt = self.ctrl.dt;
        let fields = store.fields_mut();
        let dims = fields.dims;
        match self.method {
            IntegratorMethod::VelocityVerlet => {
                let hdt = 0.5 * dt;
                for (i, v) in fields.v.iter_mut().enumerate() {
                    *v += hdt * fields.im[i / dims] * fields.f[i];
                    debug_assert!(v.is_finite());
                }
            }
            IntegratorMethod::Overdamped { damping } => {
                for (i, x) in fields.x.iter_mut().enumerate() {
                    *x += damping * fields.im[i / dims] * fields.f[i] * dt;
                    debug_assert!(x.is_finite());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_particle_drifts_at_constant_velocity() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.0, 0.0], &[1.0, -0.5], 0.05, 1.0, 0);
        let mut vv = Integrator::velocity_verlet();
        vv.set_dt(0.1);
        for _ in 0..10 {
            vv.pre_forces(&mut store);
            vv.post_forces(&mut store);
        }
        let x = store.position(0);
        assert!((x[0] - 1.0).abs() < 1e-5);
        assert!((x[1] + 0.5).abs() < 1e-5);
        assert_eq!(store.velocity(0), &[1.0, -0.5]);
    }

    #[test]
    fn constant_force_matches_closed_form() {
        // With F re-applied every step, velocity-Verlet reproduces
        // x = 0.5 a t^2 exactly for constant acceleration.
        let mut store = ParticleStore::new(2);
        store.add(&[0.0, 0.0], &[0.0, 0.0], 0.05, 1.0, 0);
        let mut vv = Integrator::velocity_verlet();
        vv.set_dt(0.01);
        let steps = 100;
        for _ in 0..steps {
            store.clear_forces();
            store.f_mut()[0] = 2.0;
            vv.pre_forces(&mut store);
            store.clear_forces();
            store.f_mut()[0] = 2.0;
            vv.post_forces(&mut store);
        }
        let t = 0.01 * steps as f32;
        let x = store.position(0)[0];
        assert!((x - 0.5 * 2.0 * t * t).abs() < 1e-3, "x = {x}");
        assert!((store.velocity(0)[0] - 2.0 * t).abs() < 1e-4);
    }

    #[test]
    fn immovable_particle_ignores_forces() {
        let mut store = ParticleStore::new(2);
        store.add(&[1.0, 1.0], &[0.0, 0.0], 0.05, 0.0, 0);
        store.f_mut()[0] = 100.0;
        let mut vv = Integrator::velocity_verlet();
        vv.set_dt(0.1);
        vv.pre_forces(&mut store);
        vv.post_forces(&mut store);
        assert_eq!(store.position(0), &[1.0, 1.0]);
        assert_eq!(store.velocity(0), &[0.0, 0.0]);
    }

    #[test]
    fn overdamped_moves_along_the_force() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.0, 0.0], &[0.0, 0.0], 0.05, 2.0, 0);
        let mut od = Integrator::overdamped();
        od.set_dt(0.1);
        store.f_mut()[1] = 5.0;
        od.pre_forces(&mut store); // no-op for overdamped
        od.post_forces(&mut store);
        let x = store.position(0);
        assert_eq!(x[0], 0.0);
        let expected = DEFAULT_DAMPING_CONSTANT * 2.0 * 5.0 * 0.1;
        assert!((x[1] - expected).abs() < 1e-6);
    }
}
