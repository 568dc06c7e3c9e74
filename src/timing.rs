//! Phase timing.
//!
//! One fixed-size table keyed by [`Phase`] replaces scattered ad-hoc
//! stopwatches; the engine wraps each timed section in a [`ScopedTimer`]
//! guard that adds its elapsed time on drop.

use std::time::{Duration, Instant};

/// Timed sections of a simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Integrator first half-kick and drift.
    PreForces,
    /// Integrator second half-kick / overdamped displacement.
    PostForces,
    /// Cell grid maintenance and rebuild decisions.
    Domain,
    /// Pair interaction evaluation.
    Interactions,
    /// Bonded interaction evaluation.
    Bonded,
}

pub const PHASE_COUNT: usize = 5;

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::PreForces,
        Phase::PostForces,
        Phase::Domain,
        Phase::Interactions,
        Phase::Bonded,
    ];

    fn index(self) -> usize {
        match self {
            Phase::PreForces => 0,
            Phase::PostForces => 1,
            Phase::Domain => 2,
            Phase::Interactions => 3,
            Phase::Bonded => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::PreForces => "Pre-forces, integrator",
            Phase::PostForces => "Post-forces, integrator",
            Phase::Domain => "Pre-forces, domain",
            Phase::Interactions => "Interactions",
            Phase::Bonded => "Bonded interactions",
        }
    }
}

/// Accumulated duration per phase.
#[derive(Debug, Default, Clone)]
pub struct TimerTable {
    totals: [Duration; PHASE_COUNT],
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.totals = [Duration::ZERO; PHASE_COUNT];
    }

    pub fn add(&mut self, phase: Phase, elapsed: Duration) {
        self.totals[phase.index()] += elapsed;
    }

    pub fn time(&self, phase: Phase) -> Duration {
        self.totals[phase.index()]
    }

    /// Sum over all tracked phases.
    pub fn total(&self) -> Duration {
        self.totals.iter().sum()
    }

    /// Guard that adds the elapsed time to `phase` when dropped.
    pub fn scoped(&mut self, phase: Phase) -> ScopedTimer<'_> {
        ScopedTimer {
            start: Instant::now(),
            slot: &mut self.totals[phase.index()],
        }
    }
}

/// Scoped timer guard for a single table slot.
pub struct ScopedTimer<'a> {
    start: Instant,
    slot: &'a mut Duration,
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        *self.slot += self.start.elapsed();
    }
}
