#![cfg_attr(not(feature = "jit"), forbid(unsafe_code))]

//! tiervm – a small profiling bytecode pipeline.
//!
//! The crate is organised leaves first:
//!
//! * [`bytecode`] – the tagged [`Value`] type, the closed [`Opcode`] set, [`Instruction`] and
//!   [`Program`], plus the line-oriented text cache used to persist optimized programs.
//! * [`vm`] – the stack [`Interpreter`] and the per-program-counter [`Profiler`] it reports to.
//! * [`optimizer`] – profile-guided constant folding followed by backward dead-code elimination.
//! * [`backend`] – lowering of a fixed opcode subset to native code through Cranelift, with an
//!   interpreted fallback behind the same entry point.
//! * [`pipeline`] – the profile → optimize/cache → re-run → native driver used by the CLI.
//!
//! Program output produced by `PRINT` is written to a caller supplied sink; diagnostics are
//! emitted through `tracing` so the two never share a stream.

pub mod backend;
pub mod bytecode;
pub mod config;
pub mod optimizer;
pub mod pipeline;
pub mod vm;

use std::io;
use std::path::Path;

use thiserror::Error;

pub use backend::{CompilationState, ExecutionPath, NativeBackend, NativeRun};
pub use bytecode::cache::CacheError;
pub use bytecode::{Instruction, Opcode, Program, Value, ValueKind};
pub use config::TierConfig;
pub use optimizer::{OptimizationReport, Optimizer};
pub use pipeline::{Pipeline, PipelineReport};
pub use vm::{Interpreter, PrintSink, ProfileReport, Profiler};

/// Result type used across tiervm.
pub type TierResult<T> = std::result::Result<T, TierError>;

/// Arithmetic faults raised by `ADD`/`SUB`/`MUL`/`DIV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticFault {
    DivisionByZero,
    Overflow,
}

impl std::fmt::Display for ArithmeticFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithmeticFault::DivisionByZero => write!(f, "division by zero"),
            ArithmeticFault::Overflow => write!(f, "integer overflow"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TierError {
    #[error("stack underflow at pc {pc}: {opcode} needs {needed} value(s), stack holds {available}")]
    StackUnderflow {
        pc: usize,
        opcode: Opcode,
        needed: usize,
        available: usize,
    },
    #[error("type mismatch at pc {pc}: {opcode} cannot operate on {found}")]
    TypeMismatch {
        pc: usize,
        opcode: Opcode,
        found: ValueKind,
    },
    #[error("arithmetic error at pc {pc}: {kind}")]
    Arithmetic { pc: usize, kind: ArithmeticFault },
    #[error("invalid jump target {target} at pc {pc} (program length {len})")]
    InvalidJumpTarget { pc: usize, target: i64, len: usize },
    #[error("RET at pc {pc} with an empty return-address stack")]
    ReturnStackEmpty { pc: usize },
    #[error("malformed {opcode} at pc {pc}: {reason}")]
    MalformedInstruction {
        pc: usize,
        opcode: Opcode,
        reason: String,
    },
    #[error("execution exceeded the step limit of {limit}")]
    StepLimitExceeded { limit: u64 },
    #[error("failed to write program output: {0}")]
    Output(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("native backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("native translation failed at pc {pc}: {reason}")]
    Translation { pc: usize, reason: String },
    #[error("native verification failed: {0}")]
    Verification(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TierError {
    /// Whether the pipeline may continue on a fallback path after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TierError::Cache(_)
                | TierError::BackendUnavailable(_)
                | TierError::Translation { .. }
                | TierError::Verification(_)
        )
    }
}

impl From<io::Error> for TierError {
    fn from(err: io::Error) -> Self {
        TierError::Output(err.to_string())
    }
}

/// Interpreter-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of interpreter steps before execution aborts. `None` runs unbounded.
    pub step_limit: Option<u64>,
}

impl RuntimeConfig {
    /// Bounds execution to `limit` steps.
    pub fn with_step_limit(mut self, limit: u64) -> TierResult<Self> {
        if limit == 0 {
            return Err(TierError::Config(
                "step limit must be greater than zero".into(),
            ));
        }
        self.step_limit = Some(limit);
        Ok(self)
    }
}

/// Values emitted by `PRINT` during one execution, one entry per `PRINT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintLog {
    lines: Vec<String>,
}

impl PrintSink for PrintLog {
    fn emit(&mut self, value: &Value) -> io::Result<()> {
        self.lines.push(value.to_string());
        Ok(())
    }
}

impl PrintLog {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Interprets `program` once while `profiler` observes it, returning the printed lines.
pub fn interpret(program: &Program, profiler: &mut Profiler) -> TierResult<PrintLog> {
    let mut log = PrintLog::default();
    Interpreter::new(program, profiler).execute_to(&mut log)?;
    Ok(log)
}

/// Folds hot constant additions and removes dead value chains.
pub fn optimize(program: &Program, profiler: &Profiler) -> Program {
    Optimizer::new().optimize(program, profiler)
}

/// Writes `program` to the text cache at `path`.
pub fn save(program: &Program, path: impl AsRef<Path>) -> TierResult<()> {
    Ok(bytecode::cache::save_optimized_bytecode(program, path)?)
}

/// Reads a program from the text cache at `path`; an unreadable file yields an empty program.
pub fn load(path: impl AsRef<Path>) -> TierResult<Program> {
    Ok(bytecode::cache::load_optimized_bytecode(path)?)
}

/// Runs `program` through the native backend, interpreting it when native code is unavailable.
pub fn compile_and_execute(program: &Program) -> TierResult<PrintLog> {
    let mut log = PrintLog::default();
    NativeBackend::new().compile_and_execute(program, &mut log)?;
    Ok(log)
}
