use anyhow::{anyhow, Context, Result};
use std::env;
use tiervm::bytecode::cache;
use tiervm::{Instruction, Opcode, Program};

fn main() -> Result<()> {
    let input = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("no input file provided"))?;
    let program =
        cache::read_program(&input).with_context(|| format!("failed to disassemble {input}"))?;

    println!("program: {} ({} instructions)", input, program.len());
    for (pc, instruction) in program.iter().enumerate() {
        println!("  {:04}: {}", pc, format_instruction(instruction, &program));
    }

    if let Err(err) = program.validate() {
        println!();
        println!("warning: {err}");
    }

    Ok(())
}

fn format_instruction(instruction: &Instruction, program: &Program) -> String {
    match instruction.opcode {
        Opcode::Jump | Opcode::JumpIf | Opcode::Call => {
            let target = instruction.operands.first().and_then(|value| value.as_integer());
            let landing = target
                .and_then(|target| usize::try_from(target).ok())
                .map(|target| match program.get(target) {
                    Some(landing) => landing.opcode.name(),
                    None if target == program.len() => "<end>",
                    None => "<invalid>",
                })
                .unwrap_or("<invalid>");
            format!("{instruction} (-> {landing})")
        }
        _ => instruction.to_string(),
    }
}
