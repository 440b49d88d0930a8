//=====================================================
// File: backend/cranelift.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Lower straight-line integer bytecode to host machine code
// Objective: Translate LOAD_CONST/ADD/PRINT/HALT through Cranelift, verify the
//            function, run it once, and release its memory
//=====================================================

use std::cell::{Cell, RefCell};

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder, Value as NativeValue};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::bytecode::{Opcode, Program, Value};
use crate::vm::PrintSink;
use crate::{ArithmeticFault, TierError, TierResult};

use super::{CompilationState, CompilationUnit};

const PRINT_SYMBOL: &str = "tiervm_print_i64";
const OVERFLOW_SYMBOL: &str = "tiervm_overflow";
const ENTRY_SYMBOL: &str = "tiervm_entry";

thread_local! {
    static HOST_OUTPUT: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
    static HOST_FAULT: Cell<Option<i64>> = const { Cell::new(None) };
}

extern "C" fn host_print(value: i64) {
    HOST_OUTPUT.with(|output| output.borrow_mut().push(value));
}

extern "C" fn host_overflow(pc: i64) {
    HOST_FAULT.with(|fault| fault.set(Some(pc)));
}

static HOST_ISA: OnceCell<Result<OwnedTargetIsa, String>> = OnceCell::new();

/// Builds the host ISA once per process.
pub(crate) fn host_isa() -> Result<OwnedTargetIsa, String> {
    HOST_ISA
        .get_or_init(|| {
            let mut flag_builder = settings::builder();
            flag_builder
                .set("use_colocated_libcalls", "false")
                .map_err(|err| err.to_string())?;
            flag_builder
                .set("is_pic", "false")
                .map_err(|err| err.to_string())?;
            let isa_builder = cranelift_native::builder().map_err(|err| err.to_string())?;
            isa_builder
                .finish(settings::Flags::new(flag_builder))
                .map_err(|err| err.to_string())
        })
        .clone()
}

/// A verified, finalized native function waiting to run.
pub(crate) struct CompiledProgram {
    module: JITModule,
    code: *const u8,
}

impl CompiledProgram {
    /// Runs the function once, copies its output to `out`, and frees the code memory.
    pub(crate) fn execute<S: PrintSink + ?Sized>(
        self,
        unit: &mut CompilationUnit,
        out: &mut S,
    ) -> TierResult<()> {
        let code = self.code;
        HOST_OUTPUT.with(|output| output.borrow_mut().clear());
        HOST_FAULT.with(|fault| fault.set(None));
        unsafe {
            let entry = std::mem::transmute::<*const u8, extern "C" fn()>(code);
            entry();
        }
        unit.advance(CompilationState::Executed);
        self.discard();

        let printed = HOST_OUTPUT.with(|output| output.take());
        for value in printed {
            out.emit(&Value::Integer(value))?;
        }
        match HOST_FAULT.with(|fault| fault.take()) {
            Some(pc) => Err(TierError::Arithmetic {
                pc: pc as usize,
                kind: ArithmeticFault::Overflow,
            }),
            None => Ok(()),
        }
    }

    /// Frees the code memory without running it.
    pub(crate) fn discard(self) {
        // No pointer into the module outlives this call.
        unsafe { self.module.free_memory() };
    }
}

/// Translates `program` into one argument-less, void function and verifies it.
pub(crate) fn compile(
    isa: OwnedTargetIsa,
    program: &Program,
    unit: &mut CompilationUnit,
) -> TierResult<CompiledProgram> {
    unit.advance(CompilationState::Translating);
    match translate(isa, program) {
        Ok(compiled) => {
            unit.advance(CompilationState::Verified);
            Ok(compiled)
        }
        Err(err) => {
            unit.advance(CompilationState::Failed);
            Err(err)
        }
    }
}

fn translate(isa: OwnedTargetIsa, program: &Program) -> TierResult<CompiledProgram> {
    let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    jit_builder.symbol(PRINT_SYMBOL, host_print as *const u8);
    jit_builder.symbol(OVERFLOW_SYMBOL, host_overflow as *const u8);
    let mut module = JITModule::new(jit_builder);

    let finalized = build_entry(&mut module, program).and_then(|entry| {
        module
            .finalize_definitions()
            .map_err(|err| TierError::Verification(format!("finalize: {err}")))?;
        Ok(module.get_finalized_function(entry))
    });
    match finalized {
        Ok(code) => Ok(CompiledProgram { module, code }),
        Err(err) => {
            unsafe { module.free_memory() };
            Err(err)
        }
    }
}

fn build_entry(module: &mut JITModule, program: &Program) -> TierResult<FuncId> {
    let mut hook_sig = module.make_signature();
    hook_sig.params.push(AbiParam::new(types::I64));
    let print_id = module
        .declare_function(PRINT_SYMBOL, Linkage::Import, &hook_sig)
        .map_err(|err| TierError::BackendUnavailable(format!("declare {PRINT_SYMBOL}: {err}")))?;
    let overflow_id = module
        .declare_function(OVERFLOW_SYMBOL, Linkage::Import, &hook_sig)
        .map_err(|err| {
            TierError::BackendUnavailable(format!("declare {OVERFLOW_SYMBOL}: {err}"))
        })?;

    let entry_sig = module.make_signature();
    let entry_id = module
        .declare_function(ENTRY_SYMBOL, Linkage::Export, &entry_sig)
        .map_err(|err| TierError::BackendUnavailable(format!("declare {ENTRY_SYMBOL}: {err}")))?;

    let mut ctx = module.make_context();
    ctx.func.signature = entry_sig;
    let print_ref = module.declare_func_in_func(print_id, &mut ctx.func);
    let overflow_ref = module.declare_func_in_func(overflow_id, &mut ctx.func);

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
    let entry = builder.create_block();
    builder.switch_to_block(entry);

    // Mirrors the interpreter's value stack with not-yet-materialized native values.
    let mut stack: Vec<NativeValue> = Vec::new();
    let mut returned = false;
    let mut translated = 0usize;
    for (pc, instruction) in program.iter().enumerate() {
        match instruction.opcode {
            Opcode::LoadConst => match instruction.operands.as_slice() {
                [Value::Integer(value)] => stack.push(builder.ins().iconst(types::I64, *value)),
                [other] => {
                    return Err(TierError::Translation {
                        pc,
                        reason: format!("{} constants are not supported natively", other.kind()),
                    })
                }
                _ => {
                    return Err(TierError::Translation {
                        pc,
                        reason: "LOAD_CONST needs exactly one operand".into(),
                    })
                }
            },
            Opcode::Add => {
                let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
                    return Err(TierError::Translation {
                        pc,
                        reason: "ADD with fewer than two values on the stack".into(),
                    });
                };
                let sum = builder.ins().iadd(lhs, rhs);
                // Signed overflow iff both operands differ in sign from the sum.
                let lhs_flip = builder.ins().bxor(lhs, sum);
                let rhs_flip = builder.ins().bxor(rhs, sum);
                let both = builder.ins().band(lhs_flip, rhs_flip);
                let overflowed = builder.ins().icmp_imm(IntCC::SignedLessThan, both, 0);

                let fault = builder.create_block();
                let next = builder.create_block();
                builder.ins().brif(overflowed, fault, &[], next, &[]);

                builder.switch_to_block(fault);
                let at = builder.ins().iconst(types::I64, pc as i64);
                builder.ins().call(overflow_ref, &[at]);
                builder.ins().return_(&[]);

                builder.switch_to_block(next);
                stack.push(sum);
            }
            Opcode::Print => {
                let Some(value) = stack.pop() else {
                    return Err(TierError::Translation {
                        pc,
                        reason: "PRINT with an empty stack".into(),
                    });
                };
                builder.ins().call(print_ref, &[value]);
            }
            Opcode::Halt => {
                builder.ins().return_(&[]);
                returned = true;
                translated += 1;
                break;
            }
            other => {
                return Err(TierError::Translation {
                    pc,
                    reason: format!("{other} has no native lowering"),
                })
            }
        }
        translated += 1;
    }
    if !returned {
        builder.ins().return_(&[]);
    }
    builder.seal_all_blocks();
    builder.finalize();

    cranelift_codegen::verify_function(&ctx.func, module.isa())
        .map_err(|errors| TierError::Verification(errors.to_string()))?;
    module
        .define_function(entry_id, &mut ctx)
        .map_err(|err| TierError::Verification(format!("define {ENTRY_SYMBOL}: {err}")))?;
    module.clear_context(&mut ctx);
    debug!(translated, len = program.len(), "translated program to native code");
    Ok(entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    fn compiled_output(program: &Program) -> (TierResult<()>, String, CompilationState) {
        let isa = host_isa().expect("host isa");
        let mut unit = CompilationUnit::new();
        let mut out = Vec::new();
        let result =
            compile(isa, program, &mut unit).and_then(|compiled| compiled.execute(&mut unit, &mut out));
        (result, String::from_utf8(out).unwrap(), unit.state())
    }

    #[test]
    fn straight_line_program_runs_natively() {
        let program = Program::new(vec![
            Instruction::load_const(40),
            Instruction::load_const(2),
            Instruction::add(),
            Instruction::print(),
            Instruction::load_const(-5),
            Instruction::print(),
        ]);
        let (result, out, state) = compiled_output(&program);
        result.unwrap();
        assert_eq!(out, "42\n-5\n");
        assert_eq!(state, CompilationState::Executed);
    }

    #[test]
    fn halt_ends_translation() {
        let program = Program::new(vec![
            Instruction::load_const(1),
            Instruction::print(),
            Instruction::halt(),
            Instruction::jump(0),
        ]);
        let (result, out, _) = compiled_output(&program);
        result.unwrap();
        assert_eq!(out, "1\n");
    }

    #[test]
    fn overflow_reports_pc_after_earlier_output() {
        let program = Program::new(vec![
            Instruction::load_const(7),
            Instruction::print(),
            Instruction::load_const(i64::MAX),
            Instruction::load_const(1),
            Instruction::add(),
            Instruction::print(),
        ]);
        let (result, out, state) = compiled_output(&program);
        assert_eq!(
            result,
            Err(TierError::Arithmetic {
                pc: 4,
                kind: ArithmeticFault::Overflow
            })
        );
        assert_eq!(out, "7\n");
        assert_eq!(state, CompilationState::Executed);
    }

    #[test]
    fn unsupported_opcode_fails_translation() {
        let program = Program::new(vec![
            Instruction::load_const(1),
            Instruction::load_const(2),
            Instruction::sub(),
        ]);
        let (result, out, state) = compiled_output(&program);
        assert!(matches!(result, Err(TierError::Translation { pc: 2, .. })));
        assert!(out.is_empty());
        assert_eq!(state, CompilationState::Failed);
    }

    #[test]
    fn float_constant_fails_translation() {
        let program = Program::new(vec![Instruction::load_const(1.5), Instruction::print()]);
        let (result, _, state) = compiled_output(&program);
        assert!(matches!(result, Err(TierError::Translation { pc: 0, .. })));
        assert_eq!(state, CompilationState::Failed);
    }
}

//=====================================================
// End of file
//=====================================================
