//! Grainflow – granular / soft-particle molecular dynamics engine.
//!
//! The engine integrates the Newtonian (or overdamped) equations of motion
//! for a population of spherical particles in a rectangular volume under
//! short-range pair interactions, bonded interactions, and per-axis boundary
//! conditions. Neighbor search runs over a cell grid whose pair lists are
//! rebuilt adaptively from observed particle motion, and the timestep is
//! chosen adaptively from the fastest particle.
//!
//! # Example
//!
//! ```
//! use grainflow::{Bounds, HardSphere, Simulation};
//!
//! let bounds = Bounds::new(vec![0.0, 0.0], vec![2.0, 2.0]);
//! let mut sim = Simulation::new(2, bounds).unwrap();
//!
//! // Two particles on a collision course.
//! sim.store.add(&[0.6, 1.0], &[1.0, 0.0], 0.1, 1.0, 0);
//! sim.store.add(&[1.4, 1.0], &[-1.0, 0.0], 0.1, 1.0, 0);
//!
//! let hs = sim.registry.add_plugin(Box::new(HardSphere::new(100.0)));
//! sim.registry.set_interaction(0, 0, hs);
//!
//! sim.run(0.5).unwrap();
//! assert_eq!(sim.store.number(), 2);
//! ```

pub mod config;
pub mod core;
pub mod domain;
pub mod dynamics;
pub mod engine;
pub mod error;
pub mod interaction;
pub mod modifier;
pub mod observer;
pub mod output;
pub mod scenario;
pub mod timing;

pub use crate::core::{sphere_volume, BcFlag, Bounds, ParticleStore};
pub use crate::domain::{Domain, UpdateDecision};
pub use crate::dynamics::{Integrator, IntegratorMethod, TimeStepController};
pub use crate::engine::sync::{DomainSync, SingleDomain};
pub use crate::engine::{Simulation, StopHandle};
pub use crate::error::{GrainError, Result};
pub use crate::interaction::{
    AccumFlags, Bonded, HardSphere, HarmonicAngleChain, HarmonicBond, Interaction,
    InteractionRegistry, LennardJones,
};
pub use crate::modifier::{ConstantAcceleration, LinearDamping, Modifier, StepInfo, StopAt};
pub use crate::observer::{
    KineticEnergyData, Observer, ObserverSet, PositionRecorder, PressureData, StepContext,
};
pub use crate::scenario::{FillArea, PolymerChain, RadiusSpec};
pub use crate::timing::{Phase, TimerTable};
