//=====================================================
// File: main.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: tiervm CLI entry point
// Objective: Run cache-format programs through the profiling pipeline, and expose
//            the profile and optimize stages on their own
//=====================================================

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tiervm::bytecode::cache;
use tiervm::{Instruction, Interpreter, Optimizer, Pipeline, PipelineReport, Program, TierConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tiervm", version, about = "Profiling bytecode interpreter with a native tier")]
pub struct Args {
    /// Configuration file (defaults to <config dir>/tiervm/tiervm.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a cache-format program through every tier.
    Run(RunArgs),
    /// Run the built-in `1 + 2` sample through every tier.
    Demo(Overrides),
    /// Interpret once and list per-instruction execution counts.
    Profile(ProfileArgs),
    /// Profile, optimize, and write the optimized program.
    Optimize(OptimizeArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct Overrides {
    /// Hot threshold for constant folding.
    #[arg(long)]
    pub threshold: Option<u64>,
    /// Abort after this many interpreter steps.
    #[arg(long = "step-limit")]
    pub step_limit: Option<u64>,
    /// Optimized-program cache file.
    #[arg(long)]
    pub cache: Option<PathBuf>,
    /// Neither read nor write the cache.
    #[arg(long = "no-cache")]
    pub no_cache: bool,
    /// Skip native code generation and interpret the final stage.
    #[arg(long = "no-native")]
    pub no_native: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Program in the cache text format.
    pub program: PathBuf,
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ProfileArgs {
    pub program: PathBuf,
    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OptimizeArgs {
    pub program: PathBuf,
    /// Destination (defaults to the configured cache path).
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub overrides: Overrides,
}

fn main() -> Result<()> {
    install_tracing();
    let args = Args::parse();

    match args.command {
        Command::Run(cmd) => {
            let config = resolve_config(args.config.as_deref(), &cmd.overrides)?;
            let program = read_program(&cmd.program)?;
            run_pipeline(config, &program)
        }
        Command::Demo(overrides) => {
            let config = resolve_config(args.config.as_deref(), &overrides)?;
            run_pipeline(config, &sample_program())
        }
        Command::Profile(cmd) => {
            let config = resolve_config(args.config.as_deref(), &cmd.overrides)?;
            let program = read_program(&cmd.program)?;
            profile(&config, &program, cmd.json)
        }
        Command::Optimize(cmd) => {
            let config = resolve_config(args.config.as_deref(), &cmd.overrides)?;
            let program = read_program(&cmd.program)?;
            let output = cmd.output.unwrap_or_else(|| config.cache_path.clone());
            optimize(&config, &program, &output)
        }
    }
}

fn install_tracing() {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Ok(directive) = "tiervm=info".parse() {
        filter = filter.add_directive(directive);
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<TierConfig> {
    let mut config = match path {
        Some(path) => TierConfig::load_from(path)?,
        None => TierConfig::load()?,
    };
    if let Some(threshold) = overrides.threshold {
        config.hot_threshold = threshold;
    }
    if let Some(limit) = overrides.step_limit {
        config.step_limit = Some(limit);
    }
    if let Some(cache) = &overrides.cache {
        config.cache_path = cache.clone();
    }
    if overrides.no_cache {
        config.use_cache = false;
    }
    if overrides.no_native {
        config.native = false;
    }
    config.runtime()?;
    Ok(config)
}

fn read_program(path: &Path) -> Result<Program> {
    cache::read_program(path).with_context(|| format!("failed to load {}", path.display()))
}

fn sample_program() -> Program {
    Program::new(vec![
        Instruction::load_const(1),
        Instruction::load_const(2),
        Instruction::add(),
        Instruction::print(),
        Instruction::halt(),
    ])
}

fn run_pipeline(config: TierConfig, program: &Program) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = pipeline.run(program, &mut out).context("pipeline failed")?;
    out.flush()?;
    summarize(&report);
    Ok(())
}

fn summarize(report: &PipelineReport) {
    if let Some(profile) = &report.profile {
        eprintln!("Execution counts:");
        for counter in &profile.counters {
            eprintln!("PC {}: {}", counter.pc, counter.count);
        }
    }
    eprintln!("Cache: {:?}", report.cache);
    eprintln!("Original code size: {}", report.original_len);
    eprintln!("Optimized code size: {}", report.optimized.len());
    eprintln!("Final stage: {:?}", report.native.path);
}

fn profile(config: &TierConfig, program: &Program, json: bool) -> Result<()> {
    let mut profiler = config.profiler();
    Interpreter::new(program, &mut profiler)
        .with_config(config.runtime()?)
        .execute_to(&mut io::sink())
        .context("profiling run failed")?;
    let report = profiler.report(program.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for counter in &report.counters {
        let marker = if counter.hot { " (hot)" } else { "" };
        println!("PC {}: {}{}", counter.pc, counter.count, marker);
    }
    println!("total steps: {}", report.total_steps);
    Ok(())
}

fn optimize(config: &TierConfig, program: &Program, output: &Path) -> Result<()> {
    let mut profiler = config.profiler();
    Interpreter::new(program, &mut profiler)
        .with_config(config.runtime()?)
        .execute_to(&mut io::sink())
        .context("profiling run failed")?;
    let optimizer = Optimizer::new();
    let (optimized, report) = optimizer.optimize_with_report(program, &profiler);
    optimizer
        .save_optimized_bytecode(&optimized, output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Optimized -> {} ({} -> {} instructions, {} folded, {} eliminated)",
        output.display(),
        report.original_len,
        report.optimized_len,
        report.folds,
        report.eliminated
    );
    Ok(())
}
