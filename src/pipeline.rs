//=====================================================
// File: pipeline.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Drive one program through every tier
// Objective: Profile, optimize or load from cache, re-run the optimized
//            program, then hand it to the native backend
//=====================================================

use std::io::Write;

use tracing::{info, instrument, warn};

use crate::backend::{NativeBackend, NativeRun};
use crate::bytecode::Program;
use crate::config::TierConfig;
use crate::optimizer::{OptimizationReport, Optimizer};
use crate::vm::{Interpreter, ProfileReport, Profiler};
use crate::{RuntimeConfig, TierResult};

/// What the optimized-program cache contributed to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Caching is switched off.
    Disabled,
    /// A non-empty program was loaded; profiling and optimization were skipped.
    Loaded,
    /// No cache file existed.
    Missing,
    /// The cache file was unreadable or held no instructions.
    Empty,
    /// The cache file failed to parse.
    Rejected { reason: String },
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Loaded)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub cache: CacheOutcome,
    /// Whether a freshly optimized program was written back to the cache.
    pub saved: bool,
    pub profile: Option<ProfileReport>,
    pub optimization: Option<OptimizationReport>,
    pub original_len: usize,
    pub optimized: Program,
    pub native: NativeRun,
}

pub struct Pipeline {
    config: TierConfig,
    runtime: RuntimeConfig,
    optimizer: Optimizer,
    backend: NativeBackend,
}

impl Pipeline {
    pub fn new(config: TierConfig) -> TierResult<Self> {
        let runtime = config.runtime()?;
        let backend = if config.native {
            NativeBackend::new()
        } else {
            NativeBackend::interpreted_only("native execution disabled by configuration")
        }
        .with_config(runtime.clone());
        Ok(Self {
            config,
            runtime,
            optimizer: Optimizer::new(),
            backend,
        })
    }

    /// Replaces the native backend, keeping this pipeline's runtime limits.
    pub fn with_backend(mut self, backend: NativeBackend) -> Self {
        self.backend = backend.with_config(self.runtime.clone());
        self
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Runs every stage, writing all `PRINT` output to `out` in stage order.
    #[instrument(skip_all, fields(len = program.len()))]
    pub fn run<W: Write + ?Sized>(&self, program: &Program, out: &mut W) -> TierResult<PipelineReport> {
        // The interpreter checks again as it executes.
        if let Err(err) = program.validate() {
            warn!(%err, "program failed structural validation");
        }
        let (cached, cache) = self.lookup_cache();
        let mut saved = false;
        let (optimized, profile, optimization) = match cached {
            Some(optimized) => {
                info!(path = %self.config.cache_path.display(), "loaded optimized bytecode from cache");
                (optimized, None, None)
            }
            None => {
                info!("profiling program");
                let mut profiler = self.config.profiler();
                self.interpreter(program, &mut profiler).execute_to(out)?;
                let profile = profiler.report(program.len());
                for counter in &profile.counters {
                    info!(pc = counter.pc, count = counter.count, hot = counter.hot, "execution count");
                }

                info!("optimizing bytecode");
                let (optimized, report) = self.optimizer.optimize_with_report(program, &profiler);
                if self.config.use_cache {
                    match self
                        .optimizer
                        .save_optimized_bytecode(&optimized, &self.config.cache_path)
                    {
                        Ok(()) => saved = true,
                        Err(err) => warn!(%err, "continuing without a cached program"),
                    }
                }
                (optimized, Some(profile), Some(report))
            }
        };
        info!(
            original = program.len(),
            optimized = optimized.len(),
            "code size"
        );

        info!("running optimized bytecode");
        let mut profiler = self.config.profiler();
        self.interpreter(&optimized, &mut profiler).execute_to(out)?;

        info!(backend = self.backend.name(), "handing optimized bytecode to the native backend");
        let native = self.backend.compile_and_execute(&optimized, out)?;

        Ok(PipelineReport {
            cache,
            saved,
            profile,
            optimization,
            original_len: program.len(),
            optimized,
            native,
        })
    }

    fn interpreter<'a>(&self, program: &'a Program, profiler: &'a mut Profiler) -> Interpreter<'a> {
        Interpreter::new(program, profiler).with_config(self.runtime.clone())
    }

    fn lookup_cache(&self) -> (Option<Program>, CacheOutcome) {
        if !self.config.use_cache {
            return (None, CacheOutcome::Disabled);
        }
        let path = &self.config.cache_path;
        if !path.exists() {
            return (None, CacheOutcome::Missing);
        }
        match self.optimizer.load_optimized_bytecode(path) {
            Ok(program) if !program.is_empty() => (Some(program), CacheOutcome::Loaded),
            Ok(_) => {
                warn!(path = %path.display(), "cached program is empty, re-optimizing");
                (None, CacheOutcome::Empty)
            }
            Err(err) => {
                warn!(%err, "cached program rejected, re-optimizing");
                (
                    None,
                    CacheOutcome::Rejected {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }
}


//=====================================================
// End of file
//=====================================================
