use std::io::{self, Write};

use tracing::trace;

use crate::bytecode::instruction::resolve_target;
use crate::bytecode::value::NumericPair;
use crate::bytecode::{Instruction, Opcode, Program, Value};
use crate::{ArithmeticFault, RuntimeConfig, TierError, TierResult};

use super::profiling::Profiler;

/// Destination for the values `PRINT` pops, one call per `PRINT`.
pub trait PrintSink {
    fn emit(&mut self, value: &Value) -> io::Result<()>;
}

/// Byte sinks receive one rendered line per value.
impl<W: Write + ?Sized> PrintSink for W {
    fn emit(&mut self, value: &Value) -> io::Result<()> {
        writeln!(self, "{value}")
    }
}

/// How the program counter moves after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Advance,
    Transfer(usize),
    Halt,
}

/// Stack interpreter executing one [`Program`] while a [`Profiler`] observes every step.
pub struct Interpreter<'a> {
    program: &'a Program,
    profiler: &'a mut Profiler,
    config: RuntimeConfig,
    pc: usize,
    stack: Vec<Value>,
    return_addresses: Vec<usize>,
    steps: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program, profiler: &'a mut Profiler) -> Self {
        Self {
            program,
            profiler,
            config: RuntimeConfig::default(),
            pc: 0,
            stack: Vec::new(),
            return_addresses: Vec::new(),
            steps: 0,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs to completion, printing to standard output.
    pub fn execute(&mut self) -> TierResult<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let result = self.execute_to(&mut out);
        out.flush()?;
        result
    }

    /// Runs to completion, printing to `out`.
    pub fn execute_to<S: PrintSink + ?Sized>(&mut self, out: &mut S) -> TierResult<()> {
        self.profiler.begin();
        let result = self.run(out);
        self.profiler.end();
        result
    }

    fn run<S: PrintSink + ?Sized>(&mut self, out: &mut S) -> TierResult<()> {
        let program = self.program;
        while self.pc < program.len() {
            if let Some(limit) = self.config.step_limit {
                if self.steps >= limit {
                    return Err(TierError::StepLimitExceeded { limit });
                }
            }
            self.steps += 1;

            let pc = self.pc;
            self.profiler.record(pc);
            let instruction = &program[pc];
            trace!(pc, opcode = %instruction.opcode, depth = self.stack.len(), "step");
            match self.step(pc, instruction, out)? {
                Flow::Advance => self.pc += 1,
                Flow::Transfer(target) => self.pc = target,
                Flow::Halt => {
                    self.pc = program.len();
                    break;
                }
            }
        }
        Ok(())
    }

    fn step<S: PrintSink + ?Sized>(
        &mut self,
        pc: usize,
        instruction: &Instruction,
        out: &mut S,
    ) -> TierResult<Flow> {
        let opcode = instruction.opcode;
        match opcode {
            Opcode::LoadConst => {
                let value = instruction.operands.first().cloned().ok_or_else(|| {
                    TierError::MalformedInstruction {
                        pc,
                        opcode,
                        reason: "missing constant operand".into(),
                    }
                })?;
                self.stack.push(value);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                self.require_depth(pc, opcode, 2)?;
                let rhs = self.pop(pc, opcode)?;
                let lhs = self.pop(pc, opcode)?;
                let value = execute_arithmetic(pc, opcode, &lhs, &rhs)?;
                self.stack.push(value);
            }
            Opcode::Jump => {
                let target = resolve_target(pc, instruction, self.program.len())?;
                return Ok(Flow::Transfer(target));
            }
            Opcode::JumpIf => {
                let target = resolve_target(pc, instruction, self.program.len())?;
                let condition = self.pop(pc, opcode)?;
                let taken = condition
                    .truthiness()
                    .ok_or(TierError::TypeMismatch {
                        pc,
                        opcode,
                        found: condition.kind(),
                    })?;
                if taken {
                    return Ok(Flow::Transfer(target));
                }
            }
            Opcode::Call => {
                let target = resolve_target(pc, instruction, self.program.len())?;
                self.return_addresses.push(pc + 1);
                return Ok(Flow::Transfer(target));
            }
            Opcode::Ret => {
                let address = self
                    .return_addresses
                    .pop()
                    .ok_or(TierError::ReturnStackEmpty { pc })?;
                return Ok(Flow::Transfer(address));
            }
            Opcode::Print => {
                let value = self.pop(pc, opcode)?;
                out.emit(&value)?;
            }
            Opcode::Halt => return Ok(Flow::Halt),
        }
        Ok(Flow::Advance)
    }

    fn require_depth(&self, pc: usize, opcode: Opcode, needed: usize) -> TierResult<()> {
        if self.stack.len() < needed {
            return Err(TierError::StackUnderflow {
                pc,
                opcode,
                needed,
                available: self.stack.len(),
            });
        }
        Ok(())
    }

    fn pop(&mut self, pc: usize, opcode: Opcode) -> TierResult<Value> {
        self.stack.pop().ok_or(TierError::StackUnderflow {
            pc,
            opcode,
            needed: 1,
            available: 0,
        })
    }
}

fn execute_arithmetic(pc: usize, opcode: Opcode, lhs: &Value, rhs: &Value) -> TierResult<Value> {
    match Value::promote(lhs, rhs) {
        Ok(NumericPair::Integers(a, b)) => execute_integer_arithmetic(pc, opcode, a, b),
        Ok(NumericPair::Floats(a, b)) => execute_float_arithmetic(pc, opcode, a, b),
        Err(found) => Err(TierError::TypeMismatch { pc, opcode, found }),
    }
}

fn execute_integer_arithmetic(pc: usize, opcode: Opcode, lhs: i64, rhs: i64) -> TierResult<Value> {
    let result = match opcode {
        Opcode::Add => lhs.checked_add(rhs),
        Opcode::Sub => lhs.checked_sub(rhs),
        Opcode::Mul => lhs.checked_mul(rhs),
        Opcode::Div => {
            if rhs == 0 {
                return Err(TierError::Arithmetic {
                    pc,
                    kind: ArithmeticFault::DivisionByZero,
                });
            }
            lhs.checked_div(rhs)
        }
        other => {
            return Err(TierError::MalformedInstruction {
                pc,
                opcode: other,
                reason: "not an arithmetic opcode".into(),
            })
        }
    };
    result.map(Value::Integer).ok_or(TierError::Arithmetic {
        pc,
        kind: ArithmeticFault::Overflow,
    })
}

fn execute_float_arithmetic(pc: usize, opcode: Opcode, lhs: f64, rhs: f64) -> TierResult<Value> {
    let value = match opcode {
        Opcode::Add => lhs + rhs,
        Opcode::Sub => lhs - rhs,
        Opcode::Mul => lhs * rhs,
        Opcode::Div => {
            if rhs == 0.0 {
                return Err(TierError::Arithmetic {
                    pc,
                    kind: ArithmeticFault::DivisionByZero,
                });
            }
            lhs / rhs
        }
        other => {
            return Err(TierError::MalformedInstruction {
                pc,
                opcode: other,
                reason: "not an arithmetic opcode".into(),
            })
        }
    };
    Ok(Value::Float(value))
}
