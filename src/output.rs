//! Run summary output.
//!
//! The summary is written even when a run aborts, with whatever timing and
//! particle data was collected up to the failure.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::core::{sphere_volume, BcFlag};
use crate::engine::Simulation;
use crate::timing::Phase;

impl Simulation {
    /// Write `run_summary.txt` into `dir`.
    pub fn write_summary(&self, dir: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(dir.join("run_summary.txt"))?);

        writeln!(out, "**********          SUMMARY          **********")?;
        writeln!(out, "**********  grainflow granular engine  ********")?;
        writeln!(out, "***********************************************")?;
        writeln!(out)?;
        if !self.command().is_empty() {
            writeln!(out, "{}", self.command().join(" "))?;
            writeln!(out)?;
        }

        let run_time = self.observers.run_time().as_secs_f64();
        let iterations = self.iterations();
        let particles = self.store.number();
        let ratio = if run_time > 0.0 {
            self.total_time() / run_time
        } else {
            0.0
        };
        let fmt_rt = |x: f64| {
            if run_time > 0.0 {
                format!("{x:.6}")
            } else {
                "--".to_string()
            }
        };

        writeln!(out, "Timing and performance:")?;
        writeln!(out, "  - Time simulated:           {}", self.total_time())?;
        writeln!(
            out,
            "  - Requested time:           {}",
            self.total_requested_time()
        )?;
        writeln!(out, "  - Run time:                 {run_time:.6}")?;
        writeln!(
            out,
            "  - Ratio x particles:        {}",
            fmt_rt(ratio * particles as f64)
        )?;
        writeln!(out, "  - Ratio:                    {}", fmt_rt(ratio))?;
        if ratio > 0.0 {
            writeln!(out, "  - Inverse ratio:            {}", fmt_rt(1.0 / ratio))?;
        }
        writeln!(out)?;

        writeln!(out, "Timing breakdown:")?;
        let mut counted = 0.0f64;
        for phase in Phase::ALL {
            let t = self.timers.time(phase).as_secs_f64();
            counted += t;
            let pct = if run_time > 0.0 { t / run_time * 100.0 } else { 0.0 };
            writeln!(out, "  -- {:<26} {:.1}%,\t{t:.6}", phase.label(), pct)?;
        }
        let uncounted = (run_time - counted).max(0.0);
        let pct = if run_time > 0.0 {
            uncounted / run_time * 100.0
        } else {
            0.0
        };
        writeln!(out, "  - Uncounted:                {pct:.1}%,\t{uncounted:.6}")?;
        writeln!(out)?;

        let dims = self.store.dims();
        writeln!(out, "Simulation and space:")?;
        writeln!(out, "  - Dimensions:               {dims}")?;
        let bounds_str: Vec<String> = (0..dims)
            .map(|d| format!("{{{},{}}}", self.bounds().min[d], self.bounds().max[d]))
            .collect();
        writeln!(out, "  - Bounds:                   {}", bounds_str.join(", "))?;
        let bc_str: Vec<&str> = self
            .bcs()
            .iter()
            .map(|bc| match bc {
                BcFlag::Open => "Open",
                BcFlag::Wrap => "Wrap",
                BcFlag::Reflect => "Reflect",
                BcFlag::Repulse => "Repulse",
            })
            .collect();
        writeln!(out, "  - Boundaries:               {}", bc_str.join(", "))?;
        writeln!(out, "  - Number of particles:      {particles}")?;

        let mut vol = 0.0f64;
        for i in 0..self.store.size() {
            if self.store.types()[i] < 0 {
                continue;
            }
            vol += sphere_volume(self.store.sg()[i], dims);
        }
        let phi = vol / self.bounds().vol();
        writeln!(out, "  - Packing fraction:         {phi:.6}")?;
        writeln!(out)?;

        writeln!(out, "Integration:")?;
        writeln!(out, "  - Iterations:               {iterations}")?;
        if iterations > 0 {
            writeln!(
                out,
                "  - Time per iteration:       {}",
                fmt_rt(run_time / iterations as f64)
            )?;
            writeln!(
                out,
                "  - Average dt:               {}",
                self.total_time() / iterations as f64
            )?;
        }
        writeln!(out, "  - Time step (at end):       {}", self.dt())?;
        writeln!(out)?;

        writeln!(out, "Domain summary (as of end of simulation):")?;
        let grid: Vec<String> = self
            .domain
            .grid_dims()
            .iter()
            .map(|d| d.to_string())
            .collect();
        writeln!(out, "  - Grid dimensions:          {}", grid.join(", "))?;
        writeln!(out, "  - Total cells:              {}", self.domain.num_cells())?;
        let widths: Vec<String> = self
            .domain
            .cell_widths()
            .iter()
            .map(|w| format!("{w}"))
            .collect();
        writeln!(out, "  - Cell widths:              {}", widths.join(", "))?;
        writeln!(out, "  - Cutoff:                   {}", self.domain.cutoff())?;
        writeln!(out, "  - Skin depth:               {}", self.domain.skin_depth)?;
        writeln!(
            out,
            "  - Rebuilds:                 {}",
            self.domain.number_of_remakes()
        )?;
        writeln!(
            out,
            "  - Delay missed target:      {}",
            self.domain.missed_target()
        )?;
        writeln!(
            out,
            "  - Average miss:             {}",
            self.domain.average_miss()
        )?;
        if self.total_time() > 0.0 && self.domain.number_of_remakes() > 0 {
            let per_sec = self.domain.number_of_remakes() as f64 / self.total_time();
            writeln!(out, "  - Rebuilds per unit time:   {per_sec:.4}")?;
        }
        writeln!(out)?;

        writeln!(out, "Interactions:")?;
        for (i, count) in self.registry.pair_counts().iter().enumerate() {
            writeln!(out, "     Interaction {i}:           length {count}")?;
        }
        if particles > 0 {
            writeln!(
                out,
                "  - Pairs per particle:       {:.4}",
                self.registry.pair_count() as f64 / particles as f64
            )?;
        }
        writeln!(out)?;

        self.write_particle_data(&mut out)?;
        out.flush()
    }

    /// Average and min/max statistics over the live particles.
    fn write_particle_data<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let store = &self.store;
        if store.number() == 0 {
            writeln!(out, "No particles.")?;
            return Ok(());
        }

        let mut stats = [Stat::new(); 4]; // sigma, mass, speed, ke
        for i in 0..store.size() {
            if store.types()[i] < 0 {
                continue;
            }
            let sg = store.sg()[i];
            stats[0].push(sg as f64);
            let speed = store
                .velocity(i)
                .iter()
                .map(|v| (v * v) as f64)
                .sum::<f64>()
                .sqrt();
            stats[2].push(speed);
            if store.im()[i] > 0.0 {
                let mass = 1.0 / store.im()[i] as f64;
                stats[1].push(mass);
                stats[3].push(0.5 * mass * speed * speed);
            }
        }

        writeln!(out, "Particle data (at finish): (ave, [min, max])")?;
        let names = ["Sigma", "Mass", "Speed", "Kinetic energy"];
        for (name, stat) in names.iter().zip(&stats) {
            writeln!(
                out,
                "  - {:<26}{:.6}, [ {:.6}, {:.6} ]",
                format!("{name}:"),
                stat.mean(),
                stat.min,
                stat.max
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Stat {
    sum: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Stat {
    fn new() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    fn push(&mut self, x: f64) {
        self.sum += x;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }
}
