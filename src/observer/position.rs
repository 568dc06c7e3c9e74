//! Frame-by-frame particle state recorder.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::observer::{csv_row, Observer, RecordGate, StepContext};

/// Records `[x..., v..., sg, type]` for every live particle at each admitted
/// frame. The CSV's first row encodes `(width, dims, frames, ntypes)` so
/// downstream tooling can slice the frame rows without other metadata.
pub struct PositionRecorder {
    gate: RecordGate,
    dims: usize,
    ntypes: usize,
    frames: Vec<Vec<f32>>,
}

impl PositionRecorder {
    pub fn new(fps: f32) -> Self {
        Self {
            gate: RecordGate::new(fps),
            dims: 0,
            ntypes: 0,
            frames: Vec::new(),
        }
    }

    /// Values stored per particle entry.
    fn entry_width(&self) -> usize {
        2 * self.dims + 2
    }
}

impl Observer for PositionRecorder {
    fn name(&self) -> &str {
        "Pos"
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
        let store = ctx.store;
        let mut frame = Vec::with_capacity(store.number() * self.entry_width());
        for i in 0..store.size() {
            if store.types()[i] < 0 {
                continue;
            }
            frame.extend_from_slice(store.position(i));
            frame.extend_from_slice(store.velocity(i));
            frame.push(store.sg()[i]);
            frame.push(store.types()[i] as f32);
        }
        self.frames.push(frame);
    }

    fn write(&mut self, dir: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(dir.join("data.csv"))?);
        writeln!(
            out,
            "{},{},{},{}",
            self.entry_width(),
            self.dims,
            self.frames.len(),
            self.ntypes
        )?;
        for frame in &self.frames {
            writeln!(out, "{}", csv_row(frame))?;
        }
        out.flush()
    }
}
