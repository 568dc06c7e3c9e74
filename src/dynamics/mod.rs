//! Time integration: velocity-Verlet and overdamped steppers plus the
//! adaptive timestep controller.

pub mod integrator;
pub mod timestep;

pub use integrator::{Integrator, IntegratorMethod};
pub use timestep::TimeStepController;
