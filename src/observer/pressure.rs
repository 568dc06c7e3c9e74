//! Virial pressure time series.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::observer::{Observer, RecordGate, StepContext};

/// Records `(time, pressure)` per admitted frame using the virial relation
/// `P = (2 KE + W) / (d V)`, where `W` is the accumulated pair virial.
pub struct PressureData {
    gate: RecordGate,
    dims: usize,
    ntypes: usize,
    samples: Vec<(f64, f64)>,
}

impl PressureData {
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

impl Observer for PressureData {
    fn name(&self) -> &str {
        "Pressure"
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
        let d = self.dims.max(1) as f64;
        let vol = ctx.bounds.vol();
        let pressure = (2.0 * ctx.kinetic_energy() + ctx.virial as f64) / (d * vol);
        self.samples.push((ctx.elapsed_time, pressure));
    }

    fn write(&mut self, dir: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(dir.join("data.csv"))?);
        writeln!(out, "2,{},{},{}", self.dims, self.samples.len(), self.ntypes)?;
        for (t, p) in &self.samples {
            writeln!(out, "{t},{p}")?;
        }
        out.flush()
    }
}
