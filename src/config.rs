//! Global configuration constants for the grainflow engine.

/// Default integration timestep (simulation time units).
pub const DEFAULT_TIME_STEP: f32 = 1e-3;

/// Default minimum adaptive timestep.
pub const DEFAULT_MIN_DT: f32 = 1e-6;

/// Default maximum adaptive timestep.
pub const DEFAULT_MAX_DT: f32 = 2e-3;

/// Default number of steps the adaptive controller targets for a particle
/// to traverse one characteristic length.
pub const DEFAULT_TARGET_STEPS: u32 = 20;

/// Default number of steps between adaptive timestep checks.
pub const DEFAULT_STEP_DELAY: u32 = 10;

/// Default spring constant for hard-sphere overlap repulsion.
pub const DEFAULT_HARD_SPHERE_REPULSION: f32 = 10.0;

/// Default Lennard-Jones well depth.
pub const DEFAULT_LENNARD_JONES_STRENGTH: f32 = 0.01;

/// Default Lennard-Jones cutoff, in multiples of the pair diameter.
pub const DEFAULT_LENNARD_JONES_CUTOFF: f32 = 2.5;

/// Default damping constant for the overdamped integrator.
pub const DEFAULT_DAMPING_CONSTANT: f32 = 0.1;

/// Default skin depth added on top of interaction cutoffs.
pub const DEFAULT_SKIN_DEPTH: f32 = 0.025;

/// Fraction of the skin a particle may traverse before a rebuild is due.
pub const DEFAULT_MOTION_FACTOR: f32 = 1.0;

/// Multiplier used when recomputing the next rebuild-check delay.
pub const DEFAULT_MV_RATIO_TOLERANCE: f32 = 0.95;

/// Hard cap on the simulation-time interval between neighbor rebuilds.
pub const DEFAULT_MAX_UPDATE_DELAY: f64 = 0.025;

/// Default number of steps between rebuilds in step-count update mode.
pub const DEFAULT_UPDATE_DELAY_STEPS: u32 = 8;
