//! Command line runner.
//!
//! Builds a simulation from a JSON configuration file, applies override
//! flags, runs it, and writes the run directory. Exit codes: 0 on success,
//! 1 on configuration errors, 2 on runtime errors (the run summary is still
//! written in that case).

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use grainflow::{
    BcFlag, Bounds, ConstantAcceleration, FillArea, GrainError, HardSphere, Integrator,
    KineticEnergyData, LennardJones, PolymerChain, PositionRecorder, PressureData, Simulation,
    UpdateDecision,
};

#[derive(Parser, Debug)]
#[command(name = "grainflow", about = "Granular dynamics engine")]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,

    /// Override the initial timestep.
    #[arg(long)]
    dt: Option<f32>,

    /// Override the maximum adaptive timestep.
    #[arg(long)]
    max_dt: Option<f32>,

    /// Override the neighbor-list skin depth.
    #[arg(long)]
    skin_depth: Option<f32>,

    /// Override the adaptive controller's target step count.
    #[arg(long)]
    target_steps: Option<u32>,

    /// Override the output directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the total simulated time.
    #[arg(long)]
    time: Option<f64>,

    /// Override the time at which observers start recording.
    #[arg(long)]
    start_rec: Option<f64>,

    /// Override the observers' frames per (simulation) second.
    #[arg(long)]
    fps: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    dimensions: usize,
    bounds: BoundsConfig,
    #[serde(default)]
    boundaries: Option<Vec<BcFlag>>,
    #[serde(default)]
    integrator: IntegratorConfig,
    #[serde(default)]
    domain: DomainConfig,
    #[serde(default)]
    interactions: Vec<InteractionConfig>,
    #[serde(default)]
    fills: Vec<FillArea>,
    #[serde(default)]
    polymers: Vec<PolymerChain>,
    #[serde(default)]
    observers: Vec<String>,
    #[serde(default)]
    gravity: Option<Vec<f32>>,
    #[serde(default = "default_time")]
    time: f64,
    #[serde(default = "default_output")]
    output: PathBuf,
    #[serde(default = "default_fps")]
    fps: f32,
    #[serde(default)]
    start_rec: f64,
    #[serde(default = "default_seed")]
    seed: u64,
}

fn default_time() -> f64 {
    10.0
}

fn default_output() -> PathBuf {
    PathBuf::from("run_data")
}

fn default_fps() -> f32 {
    15.0
}

fn default_seed() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct BoundsConfig {
    min: Vec<f32>,
    max: Vec<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct IntegratorConfig {
    kind: IntegratorKind,
    adjust_dt: Option<bool>,
    dt: Option<f32>,
    min_dt: Option<f32>,
    max_dt: Option<f32>,
    target_steps: Option<u32>,
    step_delay: Option<u32>,
    use_acceleration: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
enum IntegratorKind {
    #[default]
    VelocityVerlet,
    Overdamped,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DomainConfig {
    skin_depth: Option<f32>,
    motion_factor: Option<f32>,
    mv_ratio_tolerance: Option<f32>,
    max_update_delay: Option<f64>,
    update_decision: Option<UpdateDecision>,
    update_delay_steps: Option<u32>,
    sample_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InteractionConfig {
    HardSphere {
        #[serde(default)]
        types: Option<(i32, i32)>,
        repulsion: f32,
    },
    LennardJones {
        #[serde(default)]
        types: Option<(i32, i32)>,
        strength: f32,
        #[serde(default)]
        cutoff: Option<f32>,
    },
}

fn build(config: &ConfigFile, args: &Args) -> Result<(Simulation, f64, PathBuf)> {
    let bounds = Bounds::new(config.bounds.min.clone(), config.bounds.max.clone());
    let mut sim = Simulation::new(config.dimensions, bounds)?;
    sim.set_command(std::env::args().collect());

    if let Some(bcs) = &config.boundaries {
        if bcs.len() != config.dimensions {
            anyhow::bail!(
                "{} boundary flags for {} dimensions",
                bcs.len(),
                config.dimensions
            );
        }
        for (d, &bc) in bcs.iter().enumerate() {
            sim.set_bc(d, bc)?;
        }
    }

    // Integrator.
    let ic = &config.integrator;
    sim.integrator = match ic.kind {
        IntegratorKind::VelocityVerlet => Integrator::velocity_verlet(),
        IntegratorKind::Overdamped => Integrator::overdamped(),
    };
    let ctrl = &mut sim.integrator.ctrl;
    if let Some(adjust) = ic.adjust_dt {
        ctrl.adjust_dt = adjust;
    }
    if let Some(dt) = args.dt.or(ic.dt) {
        ctrl.dt = dt;
    }
    if let Some(min_dt) = ic.min_dt {
        ctrl.min_dt = min_dt;
    }
    if let Some(max_dt) = args.max_dt.or(ic.max_dt) {
        ctrl.max_dt = max_dt;
    }
    if let Some(target) = args.target_steps.or(ic.target_steps) {
        ctrl.target_steps = target;
    }
    if let Some(delay) = ic.step_delay {
        ctrl.step_delay = delay;
    }
    if let Some(use_a) = ic.use_acceleration {
        ctrl.use_a = use_a;
    }

    // Domain.
    let dc = &config.domain;
    if let Some(skin) = args.skin_depth.or(dc.skin_depth) {
        sim.domain.skin_depth = skin;
    }
    if let Some(mf) = dc.motion_factor {
        sim.domain.motion_factor = mf;
    }
    if let Some(tol) = dc.mv_ratio_tolerance {
        sim.domain.mv_ratio_tolerance = tol;
    }
    if let Some(delay) = dc.max_update_delay {
        sim.domain.max_update_delay = delay;
    }
    if let Some(decision) = dc.update_decision {
        sim.domain.update_decision = decision;
    }
    if let Some(steps) = dc.update_delay_steps {
        sim.domain.update_delay_steps = steps;
    }
    if let Some(sample) = dc.sample_size {
        sim.domain.sample_size = sample;
    }

    // Interactions.
    for inter in &config.interactions {
        match inter {
            InteractionConfig::HardSphere { types, repulsion } => {
                let plugin = sim.registry.add_plugin(Box::new(HardSphere::new(*repulsion)));
                let (a, b) = types.unwrap_or((0, 0));
                sim.registry.set_interaction(a, b, plugin);
            }
            InteractionConfig::LennardJones {
                types,
                strength,
                cutoff,
            } => {
                let mut lj = LennardJones::new(*strength);
                if let Some(rc) = cutoff {
                    lj = lj.with_cutoff(*rc);
                }
                let plugin = sim.registry.add_plugin(Box::new(lj));
                let (a, b) = types.unwrap_or((0, 0));
                sim.registry.set_interaction(a, b, plugin);
            }
        }
    }

    // Initial state.
    let mut rng = StdRng::seed_from_u64(config.seed);
    for fill in &config.fills {
        fill.apply(&mut sim.store, &mut rng);
    }
    for polymer in &config.polymers {
        let (_, bonds, angles) = polymer.apply(&mut sim.store);
        sim.add_bonded(Box::new(bonds));
        if let Some(angles) = angles {
            sim.add_bonded(Box::new(angles));
        }
    }
    if sim.store.number() == 0 {
        anyhow::bail!("configuration produced no particles");
    }

    if let Some(g) = &config.gravity {
        if g.len() != config.dimensions {
            anyhow::bail!("gravity vector has {} components", g.len());
        }
        sim.add_modifier(Box::new(ConstantAcceleration::new(g.clone())));
    }

    // Observers.
    let fps = args.fps.unwrap_or(config.fps);
    sim.observers.start_rec_time = args.start_rec.unwrap_or(config.start_rec);
    for name in &config.observers {
        match name.as_str() {
            "positions" => sim.observers.add(Box::new(PositionRecorder::new(fps))),
            "kinetic_energy" => sim.observers.add(Box::new(KineticEnergyData::new(fps))),
            "pressure" => sim.observers.add(Box::new(PressureData::new(fps))),
            other => anyhow::bail!("unknown observer {other:?}"),
        }
    }

    let time = args.time.unwrap_or(config.time);
    let output = args.output.clone().unwrap_or_else(|| config.output.clone());
    Ok((sim, time, output))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config: ConfigFile = match File::open(&args.config)
        .with_context(|| format!("opening {:?}", args.config))
        .and_then(|f| {
            serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("parsing {:?}", args.config))
        }) {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let (mut sim, time, output) = match build(&config, &args) {
        Ok(built) => built,
        Err(err) => {
            error!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    let run_result = sim.run(time);

    // The run directory, including the summary, is written even on abort.
    if let Err(err) = sim.write_data(&output) {
        error!("failed to write run data: {err}");
    }

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ (GrainError::Config(_) | GrainError::BadDimension { .. })) => {
            error!("configuration error: {err}");
            ExitCode::from(1)
        }
        Err(err) => {
            error!("runtime error: {err}");
            ExitCode::from(2)
        }
    }
}
