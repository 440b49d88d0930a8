//=====================================================
// File: vm/profiling.rs
//=====================================================
// Author: Codex Agent
// License: Duality Public License (DPL v1.0)
// Goal: Feed execution counts from the interpreter to the optimizer
// Objective: Count executions per program counter, classify hot counters,
//            and time each interpreted run
//=====================================================

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-program-counter execution counters for a single interpretation run.
///
/// Counters only grow; a fresh profiler is the only way to start over.
#[derive(Clone, Debug)]
pub struct Profiler {
    threshold: u64,
    counts: BTreeMap<usize, u64>,
    start: Option<Instant>,
    total_duration: Option<Duration>,
}

impl Profiler {
    pub const DEFAULT_HOT_THRESHOLD: u64 = 100;

    pub fn new() -> Self {
        Self::with_threshold(Self::DEFAULT_HOT_THRESHOLD)
    }

    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            threshold,
            counts: BTreeMap::new(),
            start: None,
            total_duration: None,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn record(&mut self, pc: usize) {
        let counter = self.counts.entry(pc).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Executions recorded for `pc`, zero when never recorded.
    pub fn count(&self, pc: usize) -> u64 {
        self.counts.get(&pc).copied().unwrap_or(0)
    }

    /// Hot against this profiler's own threshold.
    pub fn is_hot(&self, pc: usize) -> bool {
        self.is_hot_above(pc, self.threshold)
    }

    /// Strictly more than `threshold` executions.
    pub fn is_hot_above(&self, pc: usize, threshold: u64) -> bool {
        self.count(pc) > threshold
    }

    pub fn hot_pcs(&self) -> Vec<usize> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > self.threshold)
            .map(|(pc, _)| *pc)
            .collect()
    }

    /// Total number of recorded steps.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    pub fn snapshot(&self) -> BTreeMap<usize, u64> {
        self.counts.clone()
    }

    pub(crate) fn begin(&mut self) {
        self.start = Some(Instant::now());
        self.total_duration = None;
    }

    pub(crate) fn end(&mut self) {
        if let Some(started) = self.start.take() {
            self.total_duration = Some(started.elapsed());
        }
    }

    /// Wall time of the last completed run.
    pub fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }

    /// Lists every program counter of a `program_len`-instruction program with its count.
    pub fn report(&self, program_len: usize) -> ProfileReport {
        let counters = (0..program_len)
            .map(|pc| PcCount {
                pc,
                count: self.count(pc),
                hot: self.is_hot(pc),
            })
            .collect();
        ProfileReport {
            threshold: self.threshold,
            total_steps: self.total(),
            duration_micros: self.total_duration.map(|d| d.as_micros()),
            counters,
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PcCount {
    pub pc: usize,
    pub count: u64,
    pub hot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileReport {
    pub threshold: u64,
    pub total_steps: u64,
    pub duration_micros: Option<u128>,
    pub counters: Vec<PcCount>,
}


//=====================================================
// End of file
//=====================================================
