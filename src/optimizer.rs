//! Profile-guided peephole folding and backward dead-code elimination.
//!
//! Neither pass remaps jump targets, and the dead-code pass reads the program as one straight
//! line. Programs whose control flow lands after a segment that looks dead, or whose targets sit
//! past a folded triple, can change meaning. Both passes are sound on straight-line code.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::bytecode::cache::{self, CacheError};
use crate::bytecode::{Instruction, Opcode, Program};
use crate::vm::Profiler;

/// Size accounting for one optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationReport {
    pub original_len: usize,
    pub folded_len: usize,
    pub optimized_len: usize,
    pub folds: usize,
    pub eliminated: usize,
}

/// Stateless optimizer over `(Program, Profiler)` pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Optimizer;

impl Optimizer {
    pub fn new() -> Self {
        Optimizer
    }

    pub fn optimize(&self, program: &Program, profiler: &Profiler) -> Program {
        self.optimize_with_report(program, profiler).0
    }

    #[instrument(skip_all, fields(len = program.len()))]
    pub fn optimize_with_report(
        &self,
        program: &Program,
        profiler: &Profiler,
    ) -> (Program, OptimizationReport) {
        let (folded, folds) = fold_constants(program, profiler);
        let folded_len = folded.len();
        let optimized = eliminate_dead_code(&folded);
        let report = OptimizationReport {
            original_len: program.len(),
            folded_len,
            optimized_len: optimized.len(),
            folds,
            eliminated: folded_len - optimized.len(),
        };
        debug!(?report, "optimized program");
        (optimized, report)
    }

    pub fn save_optimized_bytecode(
        &self,
        program: &Program,
        path: impl AsRef<Path>,
    ) -> Result<(), CacheError> {
        cache::save_optimized_bytecode(program, path)
    }

    pub fn load_optimized_bytecode(&self, path: impl AsRef<Path>) -> Result<Program, CacheError> {
        cache::load_optimized_bytecode(path)
    }
}

/// Replaces `LOAD_CONST a; LOAD_CONST b; ADD` by `LOAD_CONST (a+b)` when both constants are
/// integers, the `ADD` is hot, and the sum fits. Returns the rewritten program and fold count.
pub fn fold_constants(program: &Program, profiler: &Profiler) -> (Program, usize) {
    let instructions = program.instructions();
    let mut folded = Vec::with_capacity(instructions.len());
    let mut folds = 0;
    let mut index = 0;
    while index < instructions.len() {
        if let Some(sum) = foldable_sum(instructions, index, profiler) {
            debug!(pc = index + 2, sum, "folded constant addition");
            folded.push(Instruction::load_const(sum));
            folds += 1;
            index += 3;
            continue;
        }
        folded.push(instructions[index].clone());
        index += 1;
    }
    (Program::new(folded), folds)
}

fn foldable_sum(instructions: &[Instruction], index: usize, profiler: &Profiler) -> Option<i64> {
    let [first, second, add] = instructions.get(index..index + 3)? else {
        return None;
    };
    if add.opcode != Opcode::Add || !profiler.is_hot(index + 2) {
        return None;
    }
    first
        .integer_constant()?
        .checked_add(second.integer_constant()?)
}

/// Backward scan keeping only value chains some `PRINT` consumes.
///
/// `pending` counts values still owed to a consumer further down the program.
pub fn eliminate_dead_code(program: &Program) -> Program {
    let mut kept = Vec::with_capacity(program.len());
    let mut pending: usize = 0;
    for instruction in program.iter().rev() {
        let keep = match instruction.opcode {
            Opcode::Print => {
                pending += 1;
                true
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                if pending > 0 {
                    pending += 1;
                    true
                } else {
                    false
                }
            }
            Opcode::LoadConst => {
                if pending > 0 {
                    pending -= 1;
                    true
                } else {
                    false
                }
            }
            Opcode::Halt | Opcode::Jump | Opcode::JumpIf | Opcode::Call | Opcode::Ret => true,
        };
        if keep {
            kept.push(instruction.clone());
        }
    }
    kept.reverse();
    Program::new(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hot_at(pc: usize) -> Profiler {
        let mut profiler = Profiler::new();
        for _ in 0..=Profiler::DEFAULT_HOT_THRESHOLD {
            profiler.record(pc);
        }
        profiler
    }

    fn triple(a: i64, b: i64) -> Program {
        Program::new(vec![
            Instruction::load_const(a),
            Instruction::load_const(b),
            Instruction::add(),
        ])
    }

    #[test]
    fn hot_addition_folds() {
        let (folded, folds) = fold_constants(&triple(2, 3), &hot_at(2));
        assert_eq!(folded, Program::new(vec![Instruction::load_const(5)]));
        assert_eq!(folds, 1);
    }

    #[test]
    fn cold_addition_is_copied() {
        let program = triple(2, 3);
        let mut profiler = Profiler::new();
        for _ in 0..Profiler::DEFAULT_HOT_THRESHOLD {
            profiler.record(2);
        }
        let (folded, folds) = fold_constants(&program, &profiler);
        assert_eq!(folded, program);
        assert_eq!(folds, 0);
    }

    #[test]
    fn only_integer_additions_fold() {
        let floats = Program::new(vec![
            Instruction::load_const(2.0),
            Instruction::load_const(3),
            Instruction::add(),
        ]);
        assert_eq!(fold_constants(&floats, &hot_at(2)).0, floats);

        let product = Program::new(vec![
            Instruction::load_const(2),
            Instruction::load_const(3),
            Instruction::mul(),
        ]);
        assert_eq!(fold_constants(&product, &hot_at(2)).0, product);
    }

    #[test]
    fn overflowing_sum_is_left_for_runtime() {
        let program = triple(i64::MAX, 1);
        assert_eq!(fold_constants(&program, &hot_at(2)).0, program);
    }

    #[test]
    fn scan_resumes_after_folded_triple() {
        let mut instructions = triple(1, 2).into_instructions();
        instructions.extend(triple(3, 4).into_instructions());
        let program = Program::new(instructions);
        let mut profiler = hot_at(2);
        for _ in 0..=Profiler::DEFAULT_HOT_THRESHOLD {
            profiler.record(5);
        }
        let (folded, folds) = fold_constants(&program, &profiler);
        assert_eq!(
            folded,
            Program::new(vec![Instruction::load_const(3), Instruction::load_const(7)])
        );
        assert_eq!(folds, 2);
    }

    #[test]
    fn unconsumed_chain_is_removed() {
        let program = Program::new(vec![
            Instruction::load_const(1),
            Instruction::load_const(2),
            Instruction::add(),
            Instruction::halt(),
        ]);
        assert_eq!(
            eliminate_dead_code(&program),
            Program::new(vec![Instruction::halt()])
        );
    }

    #[test]
    fn printed_chain_is_kept() {
        let program = Program::new(vec![
            Instruction::load_const(1),
            Instruction::load_const(2),
            Instruction::add(),
            Instruction::print(),
            Instruction::halt(),
        ]);
        assert_eq!(eliminate_dead_code(&program), program);
    }

    #[test]
    fn leftover_values_below_a_print_are_removed() {
        let program = Program::new(vec![
            Instruction::load_const("unused"),
            Instruction::load_const(4),
            Instruction::load_const(5),
            Instruction::mul(),
            Instruction::print(),
        ]);
        assert_eq!(
            eliminate_dead_code(&program),
            Program::new(vec![
                Instruction::load_const(4),
                Instruction::load_const(5),
                Instruction::mul(),
                Instruction::print(),
            ])
        );
    }

    #[test]
    fn jump_if_condition_is_not_treated_as_demand() {
        // The scan is linear: the constant feeding JUMP_IF looks dead and is dropped.
        let program = Program::new(vec![
            Instruction::load_const(1),
            Instruction::jump_if(2),
            Instruction::halt(),
        ]);
        assert_eq!(
            eliminate_dead_code(&program),
            Program::new(vec![Instruction::jump_if(2), Instruction::halt()])
        );
    }

    #[test]
    fn report_accounts_for_both_passes() {
        let program = Program::new(vec![
            Instruction::load_const(2),
            Instruction::load_const(3),
            Instruction::add(),
            Instruction::print(),
            Instruction::load_const(9),
            Instruction::halt(),
        ]);
        let (optimized, report) = Optimizer::new().optimize_with_report(&program, &hot_at(2));
        assert_eq!(
            optimized,
            Program::new(vec![
                Instruction::load_const(5),
                Instruction::print(),
                Instruction::halt(),
            ])
        );
        assert_eq!(
            report,
            OptimizationReport {
                original_len: 6,
                folded_len: 4,
                optimized_len: 3,
                folds: 1,
                eliminated: 1,
            }
        );
    }
}
