//! Adaptive timestep controller.

use log::{debug, warn};

use crate::config::{
    DEFAULT_MAX_DT, DEFAULT_MIN_DT, DEFAULT_STEP_DELAY, DEFAULT_TARGET_STEPS, DEFAULT_TIME_STEP,
};
use crate::core::ParticleStore;
use crate::engine::sync::DomainSync;
use crate::error::{GrainError, Result};

/// Chooses the integration timestep so the fastest particle needs about
/// `target_steps` steps to traverse one characteristic length (the mean
/// particle radius).
///
/// The update is asymmetric: a smaller candidate is adopted immediately, a
/// larger one is approached geometrically (`dt <- 0.9 dt + 0.1 dt_c`), so the
/// controller drops fast and rises slowly.
#[derive(Debug, Clone)]
pub struct TimeStepController {
    pub dt: f32,
    pub adjust_dt: bool,
    pub min_dt: f32,
    pub max_dt: f32,
    pub target_steps: u32,
    /// Only adjust every `step_delay` steps.
    pub step_delay: u32,
    step_count: u32,
    /// Bound dt by the maximum velocity component.
    pub use_v: bool,
    /// Bound dt by the maximum acceleration component.
    pub use_a: bool,
    characteristic_length: f32,
}

impl Default for TimeStepController {
    fn default() -> Self {
        Self {
            dt: DEFAULT_TIME_STEP,
            adjust_dt: true,
            min_dt: DEFAULT_MIN_DT,
            max_dt: DEFAULT_MAX_DT,
            target_steps: DEFAULT_TARGET_STEPS,
            step_delay: DEFAULT_STEP_DELAY,
            step_count: 0,
            use_v: true,
            use_a: false,
            characteristic_length: 0.05,
        }
    }
}

impl TimeStepController {
    /// Reset for a new run: recompute the characteristic length as the mean
    /// live radius, start from `min_dt`, and force a check on the first
    /// eligible step.
    pub fn pre_integrate(&mut self, store: &ParticleStore) {
        self.step_count = self.step_delay;
        if store.number() > 0 {
            let mut sum = 0.0f64;
            for (i, &sg) in store.sg().iter().enumerate() {
                if store.types()[i] < 0 {
                    continue;
                }
                sum += sg as f64;
            }
            self.characteristic_length = (sum / store.number() as f64) as f32;
        }
        if self.adjust_dt {
            self.dt = self.min_dt;
        }
    }

    /// Possibly adjust dt. Runs at `pre_step`; NaN in velocity or force data
    /// is fatal here. In a multi-domain run the chosen dt is reduced to the
    /// global minimum through the sync hook.
    pub fn pre_step(&mut self, store: &ParticleStore, sync: &dyn DomainSync) -> Result<()> {
        if !self.adjust_dt {
            return Ok(());
        }
        if self.step_count < self.step_delay {
            self.step_count += 1;
            return Ok(());
        }
        self.step_count = 0;

        let target = self.target_steps.max(1) as f32;
        let (mut max_v, mut max_a) = (-1.0f32, -1.0f32);
        let (mut dt_v, mut dt_a) = (1.0f32, 1.0f32);
        if self.use_v {
            max_v = max_velocity(store)?;
            dt_v = self.characteristic_length / (max_v * target);
        }
        if self.use_a {
            max_a = max_acceleration(store)?;
            dt_a = 10.0 * self.characteristic_length.sqrt() / (max_a * target);
        }
        // No information, likely the very start of a run.
        if max_v <= 0.0 && max_a <= 0.0 {
            return Ok(());
        }

        let dt_c = dt_v.min(dt_a);
        self.dt = if dt_c < self.dt {
            dt_c
        } else {
            0.9 * self.dt + 0.1 * dt_c
        };

        if self.dt > self.max_dt {
            self.dt = self.max_dt;
        } else if self.dt < self.min_dt {
            debug!("dt candidate {dt_c} clamped to min_dt {}", self.min_dt);
            self.dt = self.min_dt;
        }

        self.dt = sync.reduce_dt(self.dt);
        Ok(())
    }
}

/// Maximum absolute velocity component over `[0, size)`, scaled by sqrt(d)
/// to bound the vector norm. NaN anywhere in the velocity data is an error.
pub fn max_velocity(store: &ParticleStore) -> Result<f32> {
    let v = store.v();
    let mut max = 0.0f32;
    let mut checksum = 0.0f32;
    for &val in v {
        let a = val.abs();
        if a > max {
            max = a;
        }
        checksum += val;
    }
    if checksum.is_nan() {
        warn!("NaN detected in velocity data");
        return Err(GrainError::NanValue("velocity field".to_string()));
    }
    Ok(max * (store.dims() as f32).sqrt())
}

/// Maximum absolute acceleration component `|F * Im|`, scaled by sqrt(d).
pub fn max_acceleration(store: &ParticleStore) -> Result<f32> {
    let f = store.f();
    let im = store.im();
    let dims = store.dims();
    let mut max = 0.0f32;
    let mut checksum = 0.0f32;
    for (i, &val) in f.iter().enumerate() {
        let a = (val * im[i / dims]).abs();
        if a > max {
            max = a;
        }
        checksum += val * im[i / dims];
    }
    if checksum.is_nan() {
        warn!("NaN detected in force data");
        return Err(GrainError::NanValue("force field".to_string()));
    }
    Ok(max * (dims as f32).sqrt())
}
