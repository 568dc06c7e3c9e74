//! Error types for the grainflow engine.
//!
//! All fallible operations in the engine return [`GrainError`] through the
//! crate-wide [`Result`] alias. Errors raised inside the integration loop are
//! non-recoverable: the run is aborted, observers are flushed, and the error
//! propagates to the driver.

use thiserror::Error;

/// Main error type for the engine.
#[derive(Debug, Error)]
pub enum GrainError {
    /// Illegal parameter or missing section detected at setup time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A NaN appeared in velocity, force, or acceleration data.
    #[error("NaN value detected: {0}")]
    NanValue(String),

    /// `total_time + dt == total_time`; the timestep no longer advances time.
    #[error("loss of floating point precision: dt {dt} cannot advance t = {total_time}")]
    PrecisionLoss { total_time: f64, dt: f32 },

    /// A particle lies outside the extended bounds after boundary application.
    #[error("particle {index} outside bounds on axis {axis} (x = {position})")]
    BoundaryViolation {
        index: usize,
        axis: usize,
        position: f32,
    },

    /// A global id that is not present in the id map.
    #[error("no particle with global id {0}")]
    UnknownParticle(i32),

    /// Dimension index outside `[0, sim_dimensions)`.
    #[error("bad dimension {dim} for a {sim_dimensions}-dimensional simulation")]
    BadDimension { dim: usize, sim_dimensions: usize },

    /// An I/O failure while writing run artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for engine operations.
pub type Result<T> = std::result::Result<T, GrainError>;
