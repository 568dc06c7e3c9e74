//! Kinetic energy time series.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::observer::{Observer, RecordGate, StepContext};

/// Records `(time, kinetic energy)` per admitted frame, using the true
/// kinetic energy `1/2 m v^2`.
pub struct KineticEnergyData {
    gate: RecordGate,
    dims: usize,
    ntypes: usize,
    samples: Vec<(f64, f64)>,
}

impl KineticEnergyData {
    pub fn new(fps: f32) -> Self {
        Self {
            gate: RecordGate::new(fps),
            dims: 0,
            ntypes: 0,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[(f64, f64)] {
        &self.samples
    }
}

impl Observer for KineticEnergyData {
    fn name(&self) -> &str {
        "KineticEnergy"
    }

    fn pre_integrate(&mut self, ctx: &StepContext) {
        self.dims = ctx.store.dims();
        self.gate.reset();
    }

    fn post_step(&mut self, ctx: &StepContext) {
        if !self.gate.ready(ctx.elapsed_time) {
            return;
        }
        self.ntypes = self.ntypes.max(ctx.ntypes);
        self.samples.push((ctx.elapsed_time, ctx.kinetic_energy()));
    }

    fn write(&mut self, dir: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(dir.join("data.csv"))?);
        writeln!(out, "2,{},{},{}", self.dims, self.samples.len(), self.ntypes)?;
        for (t, ke) in &self.samples {
            writeln!(out, "{t},{ke}")?;
        }
        out.flush()
    }
}
