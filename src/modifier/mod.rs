//! Per-step modifiers.
//!
//! A modifier is fanned every lifecycle phase and may mutate the particle
//! store; force-producing modifiers do their work in `post_forces`. A
//! modifier that sets its remove flag is reaped at the end of the step.

use crate::core::ParticleStore;

/// Scalar step state handed to modifiers.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub dt: f32,
    pub elapsed_time: f64,
    pub iter: u64,
}

/// A per-step mutation of the particle state.
pub trait Modifier {
    fn pre_integrate(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn pre_step(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn pre_exchange(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn pre_forces(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn post_forces(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn post_step(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}
    fn post_integrate(&mut self, _store: &mut ParticleStore, _info: &StepInfo) {}

    /// When true, the engine drops this modifier at the end of the step.
    fn should_remove(&self) -> bool {
        false
    }
}

/// Uniform constant acceleration (gravity).
pub struct ConstantAcceleration {
    accel: Vec<f32>,
}

impl ConstantAcceleration {
    pub fn new(accel: Vec<f32>) -> Self {
        Self { accel }
    }
}

impl Modifier for ConstantAcceleration {
    fn post_forces(&mut self, store: &mut ParticleStore, _info: &StepInfo) {
        let dims = store.dims();
        assert_eq!(self.accel.len(), dims, "acceleration length != sim dimensions");
        let size = store.size();
        let fields = store.fields_mut();
        let (f, im, types) = (fields.f, fields.im, fields.types);
        for n in 0..size {
            if types[n] < 0 || im[n] == 0.0 {
                continue;
            }
            let base = n * dims;
            for d in 0..dims {
                // F = a / im, so the resulting acceleration is exactly `a`.
                f[base + d] += self.accel[d] / im[n];
            }
        }
    }
}

/// Viscous velocity damping, `F -= damping * V`.
pub struct LinearDamping {
    damping: f32,
}

impl LinearDamping {
    pub fn new(damping: f32) -> Self {
        Self { damping }
    }
}

impl Modifier for LinearDamping {
    fn post_forces(&mut self, store: &mut ParticleStore, _info: &StepInfo) {
        let damping = self.damping;
        let fields = store.fields_mut();
        let (v, f) = (&*fields.v, fields.f);
        for (fi, &vi) in f.iter_mut().zip(v) {
            *fi -= damping * vi;
        }
    }
}

/// Stops the run once a deadline is reached: flips the engine's shared stop
/// handle and marks itself for removal.
pub struct StopAt {
    pub deadline: f64,
    handle: crate::engine::StopHandle,
    expired: bool,
}

impl StopAt {
    pub fn new(deadline: f64, handle: crate::engine::StopHandle) -> Self {
        Self {
            deadline,
            handle,
            expired: false,
        }
    }

    pub fn expired(&self) -> bool {
        self.expired
    }
}

impl Modifier for StopAt {
    fn post_step(&mut self, _store: &mut ParticleStore, info: &StepInfo) {
        if info.elapsed_time >= self.deadline {
            self.expired = true;
            self.handle.stop();
        }
    }

    fn should_remove(&self) -> bool {
        self.expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> StepInfo {
        StepInfo {
            dt: 0.01,
            elapsed_time: 0.0,
            iter: 0,
        }
    }

    #[test]
    fn constant_acceleration_respects_inverse_mass() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.5, 0.5], &[0.0, 0.0], 0.05, 2.0, 0);
        store.add(&[0.6, 0.5], &[0.0, 0.0], 0.05, 0.0, 0); // immovable

        let mut grav = ConstantAcceleration::new(vec![0.0, -9.8]);
        grav.post_forces(&mut store, &info());
        let f = store.f();
        // a = f * im = -9.8 for the mobile particle.
        assert!((f[1] * 2.0 + 9.8).abs() < 1e-4);
        assert_eq!(f[3], 0.0, "immovable particle takes no gravity");
    }

    #[test]
    fn linear_damping_opposes_velocity() {
        let mut store = ParticleStore::new(2);
        store.add(&[0.5, 0.5], &[2.0, -1.0], 0.05, 1.0, 0);
        let mut damp = LinearDamping::new(0.5);
        damp.post_forces(&mut store, &info());
        assert!((store.f()[0] + 1.0).abs() < 1e-6);
        assert!((store.f()[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stop_at_marks_itself_for_removal_and_stops_the_engine() {
        let bounds = crate::core::Bounds::new(vec![0.0, 0.0], vec![1.0, 1.0]);
        let sim = crate::engine::Simulation::new(2, bounds).unwrap();
        let handle = sim.stop_handle();
        let mut store = ParticleStore::new(2);
        let mut stop = StopAt::new(1.0, handle.clone());
        let early = StepInfo {
            dt: 0.1,
            elapsed_time: 0.5,
            iter: 5,
        };
        stop.post_step(&mut store, &early);
        assert!(!stop.should_remove());
        assert!(handle.is_running());
        let late = StepInfo {
            dt: 0.1,
            elapsed_time: 1.5,
            iter: 15,
        };
        stop.post_step(&mut store, &late);
        assert!(stop.should_remove());
        assert!(!handle.is_running());
    }
}
