//! Native execution with an interpreted fallback behind one entry point.
//!
//! The host capability is probed once per process. Callers always go through
//! [`NativeBackend::compile_and_execute`]; whether native code or the interpreter produced the
//! output is reported in the returned [`NativeRun`], never required up front.

use tracing::{info, instrument, warn};

#[cfg(feature = "jit")]
use cranelift_codegen::isa::OwnedTargetIsa;

use crate::bytecode::{Opcode, Program};
use crate::vm::{Interpreter, PrintSink, Profiler};
use crate::{RuntimeConfig, TierError, TierResult};

#[cfg(feature = "jit")]
pub mod cranelift;

/// Lifecycle of one compilation unit.
///
/// `Empty → Translating → Verified → Executed`, or `Translating → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationState {
    Empty,
    Translating,
    Verified,
    Executed,
    Failed,
}

impl CompilationState {
    pub fn can_advance_to(self, next: CompilationState) -> bool {
        matches!(
            (self, next),
            (CompilationState::Empty, CompilationState::Translating)
                | (CompilationState::Translating, CompilationState::Verified)
                | (CompilationState::Translating, CompilationState::Failed)
                | (CompilationState::Verified, CompilationState::Executed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CompilationState::Executed | CompilationState::Failed)
    }
}

/// Tracks one program through translation and execution. Never reused across calls.
#[derive(Debug)]
pub struct CompilationUnit {
    state: CompilationState,
}

impl CompilationUnit {
    pub fn new() -> Self {
        Self {
            state: CompilationState::Empty,
        }
    }

    pub fn state(&self) -> CompilationState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: CompilationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal compilation transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

impl Default for CompilationUnit {
    fn default() -> Self {
        Self::new()
    }
}

/// Which engine produced a run's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPath {
    Native,
    Interpreted { reason: String },
}

/// Outcome of a successful [`NativeBackend::compile_and_execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRun {
    pub path: ExecutionPath,
    pub state: CompilationState,
}

impl NativeRun {
    pub fn is_native(&self) -> bool {
        self.path == ExecutionPath::Native
    }
}

enum Capability {
    #[cfg(feature = "jit")]
    Native(OwnedTargetIsa),
    Unavailable(String),
}

pub struct NativeBackend {
    capability: Capability,
    config: RuntimeConfig,
}

impl NativeBackend {
    /// Probes the host for native code generation.
    pub fn new() -> Self {
        Self {
            capability: probe(),
            config: RuntimeConfig::default(),
        }
    }

    /// A backend that always interprets.
    pub fn interpreted_only(reason: impl Into<String>) -> Self {
        Self {
            capability: Capability::Unavailable(reason.into()),
            config: RuntimeConfig::default(),
        }
    }

    /// Runtime limits applied when falling back to the interpreter.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_native(&self) -> bool {
        !matches!(self.capability, Capability::Unavailable(_))
    }

    pub fn name(&self) -> &'static str {
        match self.capability {
            #[cfg(feature = "jit")]
            Capability::Native(_) => "cranelift",
            Capability::Unavailable(_) => "interpreter",
        }
    }

    /// Translates and verifies `program` without running it.
    #[cfg_attr(not(feature = "jit"), allow(unused_variables))]
    pub fn compile(&self, program: &Program) -> TierResult<CompilationState> {
        match &self.capability {
            #[cfg(feature = "jit")]
            Capability::Native(isa) => {
                let mut unit = CompilationUnit::new();
                cranelift::compile(isa.clone(), program, &mut unit)?.discard();
                Ok(unit.state())
            }
            Capability::Unavailable(reason) => Err(TierError::BackendUnavailable(reason.clone())),
        }
    }

    /// Runs `program` natively, interpreting it instead when native code is unavailable or the
    /// program falls outside the native subset. Fatal runtime errors are returned either way.
    ///
    /// Native code does not count steps, so a program that would run past the configured step
    /// limit is interpreted and fails there exactly as the interpreter would.
    #[instrument(skip_all, fields(backend = self.name(), len = program.len()))]
    pub fn compile_and_execute<S: PrintSink + ?Sized>(
        &self,
        program: &Program,
        out: &mut S,
    ) -> TierResult<NativeRun> {
        match &self.capability {
            #[cfg(feature = "jit")]
            Capability::Native(isa) => {
                if let Some(limit) = self.config.step_limit {
                    let steps = straight_line_steps(program);
                    if steps > limit {
                        let reason = format!("program runs {steps} steps, limit is {limit}");
                        warn!(%reason, "interpreting to enforce the step limit");
                        return self.interpret(program, out, reason, CompilationState::Empty);
                    }
                }
                let mut unit = CompilationUnit::new();
                info!("compiling program to native code");
                let compiled = match cranelift::compile(isa.clone(), program, &mut unit) {
                    Ok(compiled) => compiled,
                    Err(err) if err.is_recoverable() => {
                        warn!(%err, "native compilation failed, interpreting instead");
                        return self.interpret(program, out, err.to_string(), unit.state());
                    }
                    Err(err) => return Err(err),
                };
                info!("executing native code");
                compiled.execute(&mut unit, out)?;
                Ok(NativeRun {
                    path: ExecutionPath::Native,
                    state: unit.state(),
                })
            }
            Capability::Unavailable(reason) => {
                warn!(%reason, "native backend unavailable, interpreting instead");
                self.interpret(program, out, reason.clone(), CompilationState::Empty)
            }
        }
    }

    fn interpret<S: PrintSink + ?Sized>(
        &self,
        program: &Program,
        out: &mut S,
        reason: String,
        state: CompilationState,
    ) -> TierResult<NativeRun> {
        let mut profiler = Profiler::new();
        Interpreter::new(program, &mut profiler)
            .with_config(self.config.clone())
            .execute_to(out)?;
        Ok(NativeRun {
            path: ExecutionPath::Interpreted { reason },
            state,
        })
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Steps a straight-line program takes: through the first `HALT`, or every instruction.
#[cfg_attr(not(feature = "jit"), allow(dead_code))]
fn straight_line_steps(program: &Program) -> u64 {
    let executed = program
        .iter()
        .position(|instruction| instruction.opcode == Opcode::Halt)
        .map_or(program.len(), |pc| pc + 1);
    executed as u64
}

#[cfg(feature = "jit")]
fn probe() -> Capability {
    match cranelift::host_isa() {
        Ok(isa) => Capability::Native(isa),
        Err(reason) => {
            warn!(%reason, "host does not support native code generation");
            Capability::Unavailable(reason)
        }
    }
}

#[cfg(not(feature = "jit"))]
fn probe() -> Capability {
    Capability::Unavailable("built without the `jit` feature".into())
}
