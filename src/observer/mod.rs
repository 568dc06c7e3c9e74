//! Data observers and their lifecycle plumbing.
//!
//! Observers are read-only collaborators hooked into every phase of the step.
//! The [`ObserverSet`] fans the hooks out, gates recording on a start time,
//! and writes each observer's data into its own subdirectory of the run
//! directory.

pub mod energy;
pub mod position;
pub mod pressure;

pub use energy::KineticEnergyData;
pub use position::PositionRecorder;
pub use pressure::PressureData;

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use log::warn;

use crate::core::{BcFlag, Bounds, ParticleStore};

/// Read-only view of the simulation state handed to observer hooks.
pub struct StepContext<'a> {
    pub store: &'a ParticleStore,
    pub bounds: &'a Bounds,
    pub bcs: &'a [BcFlag],
    pub elapsed_time: f64,
    pub total_time: f64,
    pub iter: u64,
    pub dt: f32,
    pub boundary_force: f32,
    pub boundary_energy: f32,
    pub virial: f32,
    pub potential_energy: f32,
    pub ntypes: usize,
}

impl StepContext<'_> {
    /// Total kinetic energy `1/2 m v^2` over live particles.
    pub fn kinetic_energy(&self) -> f64 {
        let store = self.store;
        let mut ke = 0.0f64;
        for i in 0..store.size() {
            if store.types()[i] < 0 || store.im()[i] == 0.0 {
                continue;
            }
            let v2: f32 = store.velocity(i).iter().map(|v| v * v).sum();
            ke += 0.5 * (v2 / store.im()[i]) as f64;
        }
        ke
    }
}

/// Lifecycle hooks for a data-collecting observer.
pub trait Observer {
    /// Directory name for this observer's output.
    fn name(&self) -> &str;

    fn pre_integrate(&mut self, _ctx: &StepContext) {}
    fn pre_step(&mut self, _ctx: &StepContext) {}
    fn pre_exchange(&mut self, _ctx: &StepContext) {}
    fn pre_forces(&mut self, _ctx: &StepContext) {}
    fn post_forces(&mut self, _ctx: &StepContext) {}
    fn post_step(&mut self, _ctx: &StepContext) {}
    fn post_integrate(&mut self, _ctx: &StepContext) {}

    /// Flush collected data into the given directory.
    fn write(&mut self, dir: &Path) -> io::Result<()>;
}

/// Frame-rate gate shared by the concrete observers: admits a frame whenever
/// `elapsed * fps` has passed the number of frames already taken. A
/// non-positive fps admits every step.
#[derive(Debug, Clone)]
pub struct RecordGate {
    pub fps: f32,
    frames: usize,
}

impl RecordGate {
    pub fn new(fps: f32) -> Self {
        Self { fps, frames: 0 }
    }

    pub fn ready(&mut self, elapsed: f64) -> bool {
        if self.fps <= 0.0 || elapsed * self.fps as f64 >= self.frames as f64 {
            self.frames += 1;
            true
        } else {
            false
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn reset(&mut self) {
        self.frames = 0;
    }
}

/// Owns the observers, the recording gate, and the run wall-clock timer.
pub struct ObserverSet {
    observers: Vec<Box<dyn Observer>>,
    /// Simulation time before which no hooks (other than pre/post integrate)
    /// are delivered.
    pub start_rec_time: f64,
    run_time: Duration,
    timer_start: Option<Instant>,
}

impl Default for ObserverSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverSet {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            start_rec_time: 0.0,
            run_time: Duration::ZERO,
            timer_start: None,
        }
    }

    pub fn add(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn start_timer(&mut self) {
        self.timer_start = Some(Instant::now());
    }

    pub fn end_timer(&mut self) {
        if let Some(start) = self.timer_start.take() {
            self.run_time += start.elapsed();
        }
    }

    /// Accumulated wall-clock time across runs.
    pub fn run_time(&self) -> Duration {
        self.run_time
    }

    pub fn pre_integrate(&mut self, ctx: &StepContext) {
        for o in &mut self.observers {
            o.pre_integrate(ctx);
        }
    }

    pub fn pre_step(&mut self, ctx: &StepContext) {
        if ctx.elapsed_time < self.start_rec_time {
            return;
        }
        for o in &mut self.observers {
            o.pre_step(ctx);
        }
    }

    pub fn pre_exchange(&mut self, ctx: &StepContext) {
        if ctx.elapsed_time < self.start_rec_time {
            return;
        }
        for o in &mut self.observers {
            o.pre_exchange(ctx);
        }
    }

    pub fn pre_forces(&mut self, ctx: &StepContext) {
        if ctx.elapsed_time < self.start_rec_time {
            return;
        }
        for o in &mut self.observers {
            o.pre_forces(ctx);
        }
    }

    pub fn post_forces(&mut self, ctx: &StepContext) {
        if ctx.elapsed_time < self.start_rec_time {
            return;
        }
        for o in &mut self.observers {
            o.post_forces(ctx);
        }
    }

    pub fn post_step(&mut self, ctx: &StepContext) {
        if ctx.elapsed_time < self.start_rec_time {
            return;
        }
        for o in &mut self.observers {
            o.post_step(ctx);
        }
    }

    pub fn post_integrate(&mut self, ctx: &StepContext) {
        for o in &mut self.observers {
            o.post_integrate(ctx);
        }
    }

    /// Write each observer's data into `dir/<name>/`. Returns false if any
    /// write failed; failures are logged and do not stop the others.
    pub fn write_all(&mut self, dir: &Path) -> bool {
        let mut success = true;
        for o in &mut self.observers {
            let sub = dir.join(o.name());
            if let Err(err) = fs::create_dir_all(&sub).and_then(|()| o.write(&sub)) {
                warn!("observer {} failed to write: {err}", o.name());
                success = false;
            }
        }
        success
    }
}

/// Format one CSV row of `f32` values.
pub(crate) fn csv_row(values: &[f32]) -> String {
    let mut row = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        row.push_str(&format!("{v}"));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_gate_paces_frames() {
        let mut gate = RecordGate::new(10.0);
        assert!(gate.ready(0.0)); // first frame
        assert!(!gate.ready(0.05)); // 0.5 frames elapsed < 1
        assert!(gate.ready(0.1)); // 1.0 frames elapsed
        assert!(gate.ready(0.35)); // 3.5 frames
        assert_eq!(gate.frames(), 3);
    }

    #[test]
    fn record_gate_without_fps_admits_everything() {
        let mut gate = RecordGate::new(0.0);
        for _ in 0..5 {
            assert!(gate.ready(123.0));
        }
        assert_eq!(gate.frames(), 5);
    }

    #[test]
    fn csv_row_formats_plainly() {
        assert_eq!(csv_row(&[1.0, 2.5, -3.0]), "1,2.5,-3");
        assert_eq!(csv_row(&[]), "");
    }
}
