//! The top-level run loop.
//!
//! [`Simulation`] owns every collaborator and sequences the step phases:
//! `pre_step`, `pre_exchange`, `pre_forces` (integrator kick/drift, then the
//! domain's possible rebuild), force clearing and boundary forces, pair and
//! bonded interactions, `post_forces` (second kick), and `post_step`
//! (termination checks, time accumulation, wrapping). Each phase fans out to
//! modifiers, the integrator, any additional integrators, the observers, and
//! the domain, in that order.

pub mod boundary;
pub mod sync;

use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use log::{debug, info};

use crate::config::DEFAULT_HARD_SPHERE_REPULSION;
use crate::core::{BcFlag, Bounds, ParticleStore};
use crate::domain::Domain;
use crate::dynamics::Integrator;
use crate::error::{GrainError, Result};
use crate::interaction::{Bonded, InteractionRegistry};
use crate::modifier::{Modifier, StepInfo};
use crate::observer::{ObserverSet, StepContext};
use crate::timing::{Phase, TimerTable};
use self::sync::{DomainSync, SingleDomain};

/// Shared flag any collaborator can use to stop the run at the next
/// termination check. No partial step is discarded.
#[derive(Clone)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn stop(&self) {
        self.0.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.0.get()
    }

    fn reset(&self) {
        self.0.set(true);
    }
}

macro_rules! step_ctx {
    ($sim:expr) => {
        StepContext {
            store: &$sim.store,
            bounds: &$sim.bounds,
            bcs: &$sim.bcs,
            elapsed_time: $sim.elapsed_time,
            total_time: $sim.total_time,
            iter: $sim.iter,
            dt: $sim.integrator.dt(),
            boundary_force: $sim.boundary_force,
            boundary_energy: $sim.boundary_energy,
            virial: $sim.registry.virial(),
            potential_energy: $sim.registry.potential_energy()
                + $sim.bonded.iter().map(|b| b.potential_energy()).sum::<f32>(),
            ntypes: $sim.ntypes,
        }
    };
}

/// Central simulation container orchestrating all subsystems.
pub struct Simulation {
    pub store: ParticleStore,
    pub domain: Domain,
    pub registry: InteractionRegistry,
    pub integrator: Integrator,
    /// Integrators for auxiliary degrees of freedom; fanned every phase
    /// after the primary integrator.
    pub additional_integrators: Vec<Integrator>,
    pub bonded: Vec<Box<dyn Bonded>>,
    pub observers: ObserverSet,
    modifiers: Vec<Box<dyn Modifier>>,
    sync: Box<dyn DomainSync>,

    bounds: Bounds,
    bcs: Vec<BcFlag>,

    /// Spring constant of repulsing boundaries.
    pub repulsion: f32,
    /// Dissipation of repulsing boundaries.
    pub dissipation: f32,
    /// Constant acceleration toward the domain center; zero disables.
    pub center_attraction: f32,
    /// Skip all force computation when false.
    pub use_forces: bool,

    boundary_force: f32,
    boundary_energy: f32,

    requested_time: f64,
    total_requested_time: f64,
    elapsed_time: f64,
    total_time: f64,
    iter: u64,
    running: bool,
    stop_handle: StopHandle,
    ntypes: usize,

    pub timers: TimerTable,
    command: Vec<String>,
}

impl Simulation {
    pub fn new(dims: usize, bounds: Bounds) -> Result<Self> {
        if bounds.dims() != dims {
            return Err(GrainError::Config(format!(
                "bounds are {}-dimensional, simulation is {dims}-dimensional",
                bounds.dims()
            )));
        }
        if dims == 0 {
            return Err(GrainError::Config("zero-dimensional simulation".into()));
        }
        Ok(Self {
            store: ParticleStore::new(dims),
            domain: Domain::new(dims),
            registry: InteractionRegistry::new(1),
            integrator: Integrator::velocity_verlet(),
            additional_integrators: Vec::new(),
            bonded: Vec::new(),
            observers: ObserverSet::new(),
            modifiers: Vec::new(),
            sync: Box::new(SingleDomain),
            bounds,
            bcs: vec![BcFlag::Wrap; dims],
            repulsion: DEFAULT_HARD_SPHERE_REPULSION,
            dissipation: 0.0,
            center_attraction: 0.0,
            use_forces: true,
            boundary_force: 0.0,
            boundary_energy: 0.0,
            requested_time: 0.0,
            total_requested_time: 0.0,
            elapsed_time: 0.0,
            total_time: 0.0,
            iter: 0,
            running: false,
            stop_handle: StopHandle::new(),
            ntypes: 1,
            timers: TimerTable::new(),
            command: Vec::new(),
        })
    }

    // --- Configuration.

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn bcs(&self) -> &[BcFlag] {
        &self.bcs
    }

    pub fn set_all_bcs(&mut self, flag: BcFlag) {
        self.bcs.fill(flag);
    }

    pub fn set_bc(&mut self, dim: usize, flag: BcFlag) -> Result<()> {
        if dim >= self.bcs.len() {
            return Err(GrainError::BadDimension {
                dim,
                sim_dimensions: self.bcs.len(),
            });
        }
        self.bcs[dim] = flag;
        Ok(())
    }

    pub fn add_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.modifiers.push(modifier);
    }

    pub fn add_bonded(&mut self, bonded: Box<dyn Bonded>) {
        self.bonded.push(bonded);
    }

    pub fn set_sync(&mut self, sync: Box<dyn DomainSync>) {
        self.sync = sync;
    }

    /// Handle collaborators can capture to stop the run.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Record the driver's command line for the run summary.
    pub fn set_command(&mut self, command: Vec<String>) {
        self.command = command;
    }

    pub(crate) fn command(&self) -> &[String] {
        &self.command
    }

    // --- State accessors.

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn total_requested_time(&self) -> f64 {
        self.total_requested_time
    }

    pub fn iterations(&self) -> u64 {
        self.iter
    }

    pub fn dt(&self) -> f32 {
        self.integrator.dt()
    }

    pub fn boundary_force(&self) -> f32 {
        self.boundary_force
    }

    pub fn boundary_energy(&self) -> f32 {
        self.boundary_energy
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn ntypes(&self) -> usize {
        self.ntypes
    }

    // --- Run control.

    /// Integrate for `requested_time` simulation time units.
    ///
    /// On a non-recoverable error the run is aborted but `post_integrate`
    /// still executes so observers can flush what they have.
    pub fn run(&mut self, requested_time: f64) -> Result<()> {
        if requested_time > 0.0 {
            self.requested_time = requested_time;
        }
        self.total_requested_time += self.requested_time;

        if self.store.number() == 0 {
            self.elapsed_time += self.requested_time;
            self.total_time += self.requested_time;
            self.requested_time = 0.0;
            return Ok(());
        }

        self.observers.start_timer();
        self.pre_integrate()?;
        info!(
            "starting run: {} particles, requested time {}",
            self.store.number(),
            self.requested_time
        );

        let mut result = Ok(());
        while self.running && self.requested_time > 0.0 {
            if let Err(err) = self.step() {
                result = Err(err);
                break;
            }
        }

        self.requested_time = 0.0;
        self.post_integrate();
        self.observers.end_timer();
        result
    }

    /// Prepare every collaborator for integration.
    pub fn pre_integrate(&mut self) -> Result<()> {
        self.running = true;
        self.stop_handle.reset();
        self.elapsed_time = 0.0;
        self.iter = 0;
        self.ntypes = self
            .registry
            .ntypes()
            .max((self.store.max_type() + 1).max(1) as usize);

        self.registry.refresh_cutoffs();
        let info = self.step_info();
        for m in &mut self.modifiers {
            m.pre_integrate(&mut self.store, &info);
        }
        self.integrator.pre_integrate(&self.store);
        for it in &mut self.additional_integrators {
            it.pre_integrate(&self.store);
        }
        self.domain.pre_integrate();
        self.domain
            .initialize(&self.store, &self.registry, &self.bounds)?;
        self.observers.pre_integrate(&step_ctx!(self));
        Ok(())
    }

    fn post_integrate(&mut self) {
        let info = self.step_info();
        for m in &mut self.modifiers {
            m.post_integrate(&mut self.store, &info);
        }
        self.observers.post_integrate(&step_ctx!(self));
        debug!(
            "run finished: t = {}, {} iterations, dt = {}",
            self.total_time,
            self.iter,
            self.integrator.dt()
        );
    }

    fn step_info(&self) -> StepInfo {
        StepInfo {
            dt: self.integrator.dt(),
            elapsed_time: self.elapsed_time,
            iter: self.iter,
        }
    }

    /// Advance the simulation by one step.
    pub fn step(&mut self) -> Result<()> {
        let info = self.step_info();

        // --- Pre-step: the adaptive dt controller runs here.
        for m in &mut self.modifiers {
            m.pre_step(&mut self.store, &info);
        }
        self.integrator.pre_step(&self.store, self.sync.as_ref())?;
        for it in &mut self.additional_integrators {
            it.pre_step(&self.store, self.sync.as_ref())?;
        }
        self.observers.pre_step(&step_ctx!(self));

        // --- Pre-exchange: migrate particles between domains.
        for m in &mut self.modifiers {
            m.pre_exchange(&mut self.store, &info);
        }
        self.observers.pre_exchange(&step_ctx!(self));
        self.sync.exchange(&mut self.store);

        // --- Pre-forces: first half-kick and drift, then the domain may
        // rebuild the pair lists.
        for m in &mut self.modifiers {
            m.pre_forces(&mut self.store, &info);
        }
        {
            let _t = self.timers.scoped(Phase::PreForces);
            self.integrator.pre_forces(&mut self.store);
            for it in &mut self.additional_integrators {
                it.pre_forces(&mut self.store);
            }
        }
        self.observers.pre_forces(&step_ctx!(self));
        if self.use_forces {
            let _t = self.timers.scoped(Phase::Domain);
            self.domain.pre_forces(
                &mut self.store,
                &mut self.registry,
                &self.bounds,
                &self.bcs,
                self.elapsed_time,
            )?;
        }

        // --- Boundary forces go in right after the buffer is cleared.
        self.store.clear_forces();
        boundary::reflect_positions(&mut self.store, &self.bounds, &self.bcs);
        let (bf, be) = boundary::repulse_positions(
            &mut self.store,
            &self.bounds,
            &self.bcs,
            self.repulsion,
            self.dissipation,
        );
        self.boundary_force = bf;
        self.boundary_energy = be;
        boundary::attract_center(&mut self.store, &self.bounds, self.center_attraction);

        // --- Interactions.
        if self.use_forces {
            {
                let _t = self.timers.scoped(Phase::Interactions);
                self.registry.interact(&mut self.store, &self.bounds, &self.bcs);
            }
            if !self.bonded.is_empty() {
                let _t = self.timers.scoped(Phase::Bonded);
                let flags = self.registry.accum_flags();
                for b in &mut self.bonded {
                    b.interact(&mut self.store, &self.bounds, &self.bcs, flags);
                }
            }
        }

        // --- Post-forces: modifiers add their forces, halo images hand
        // theirs back, then the second half-kick.
        for m in &mut self.modifiers {
            m.post_forces(&mut self.store, &info);
        }
        self.store.fold_halo_forces();
        {
            let _t = self.timers.scoped(Phase::PostForces);
            self.integrator.post_forces(&mut self.store);
            for it in &mut self.additional_integrators {
                it.post_forces(&mut self.store);
            }
        }
        self.observers.post_forces(&step_ctx!(self));

        // --- Post-step.
        for m in &mut self.modifiers {
            m.post_step(&mut self.store, &info);
        }
        self.observers.post_step(&step_ctx!(self));

        self.iter += 1;
        let dt = self.integrator.dt();
        self.elapsed_time += dt as f64;
        self.total_time += dt as f64;
        if self.total_time + dt as f64 == self.total_time {
            self.running = false;
            return Err(GrainError::PrecisionLoss {
                total_time: self.total_time,
                dt,
            });
        }
        boundary::wrap_positions(&mut self.store, &self.bounds, &self.bcs);

        // Reap modifiers that asked to be removed.
        self.modifiers.retain(|m| !m.should_remove());

        if self.elapsed_time >= self.requested_time {
            self.running = false;
        }
        self.running = self.running && self.stop_handle.is_running();
        self.running = self.sync.all_running(self.running);
        self.sync.barrier();
        Ok(())
    }

    // --- Output.

    /// Write the run directory: `info.csv`, `run_summary.txt`, and one
    /// subdirectory per observer. Returns false if any observer write
    /// failed.
    pub fn write_data<P: AsRef<Path>>(&mut self, dir: P) -> io::Result<bool> {
        let dir = dir.as_ref();
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;

        self.write_summary(dir)?;

        if !self.observers.is_empty() {
            let mut out = BufWriter::new(File::create(dir.join("info.csv"))?);
            writeln!(out, "{}", self.bounds.dims())?;
            for d in 0..self.bounds.dims() {
                writeln!(out, "{},{}", self.bounds.min[d], self.bounds.max[d])?;
            }
            out.flush()?;
        }

        Ok(self.observers.write_all(dir))
    }
}
