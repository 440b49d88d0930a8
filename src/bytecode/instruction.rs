use std::convert::TryFrom;
use std::fmt;
use std::ops::Index;

use thiserror::Error;

use super::value::Value;
use crate::{TierError, TierResult};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown opcode tag {0}")]
pub struct UnknownOpcode(pub i64);

/// Closed opcode set. The discriminant is the tag written to the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    LoadConst = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Jump = 5,
    JumpIf = 6,
    Call = 7,
    Ret = 8,
    Print = 9,
    Halt = 10,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::LoadConst,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Jump,
        Opcode::JumpIf,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Print,
        Opcode::Halt,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Jump => "JUMP",
            Opcode::JumpIf => "JUMP_IF",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Print => "PRINT",
            Opcode::Halt => "HALT",
        }
    }

    pub fn operand_count(self) -> usize {
        match self {
            Opcode::LoadConst | Opcode::Jump | Opcode::JumpIf | Opcode::Call => 1,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Ret
            | Opcode::Print
            | Opcode::Halt => 0,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }

    /// Opcodes whose single operand names a program-counter index.
    pub fn takes_target(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIf | Opcode::Call)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i64> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let opcode = match value {
            0 => Opcode::LoadConst,
            1 => Opcode::Add,
            2 => Opcode::Sub,
            3 => Opcode::Mul,
            4 => Opcode::Div,
            5 => Opcode::Jump,
            6 => Opcode::JumpIf,
            7 => Opcode::Call,
            8 => Opcode::Ret,
            9 => Opcode::Print,
            10 => Opcode::Halt,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Value>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Value>) -> Self {
        Self { opcode, operands }
    }

    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, Vec::new())
    }

    pub fn load_const(value: impl Into<Value>) -> Self {
        Self::new(Opcode::LoadConst, vec![value.into()])
    }

    pub fn add() -> Self {
        Self::bare(Opcode::Add)
    }

    pub fn sub() -> Self {
        Self::bare(Opcode::Sub)
    }

    pub fn mul() -> Self {
        Self::bare(Opcode::Mul)
    }

    pub fn div() -> Self {
        Self::bare(Opcode::Div)
    }

    pub fn jump(target: i64) -> Self {
        Self::new(Opcode::Jump, vec![Value::Integer(target)])
    }

    pub fn jump_if(target: i64) -> Self {
        Self::new(Opcode::JumpIf, vec![Value::Integer(target)])
    }

    pub fn call(target: i64) -> Self {
        Self::new(Opcode::Call, vec![Value::Integer(target)])
    }

    pub fn ret() -> Self {
        Self::bare(Opcode::Ret)
    }

    pub fn print() -> Self {
        Self::bare(Opcode::Print)
    }

    pub fn halt() -> Self {
        Self::bare(Opcode::Halt)
    }

    /// The integer constant loaded by a well-formed `LOAD_CONST int`.
    pub fn integer_constant(&self) -> Option<i64> {
        match (self.opcode, self.operands.as_slice()) {
            (Opcode::LoadConst, [Value::Integer(value)]) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for operand in &self.operands {
            match operand {
                Value::Text(text) => write!(f, " {text:?}")?,
                other => write!(f, " {other}")?,
            }
        }
        Ok(())
    }
}

/// An ordered, read-only instruction sequence indexed `0..len`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Checks operand arity, operand kinds, and that every jump target lies in `[0, len]`.
    pub fn validate(&self) -> TierResult<()> {
        for (pc, instruction) in self.instructions.iter().enumerate() {
            let opcode = instruction.opcode;
            let expected = opcode.operand_count();
            if instruction.operands.len() != expected {
                return Err(TierError::MalformedInstruction {
                    pc,
                    opcode,
                    reason: format!(
                        "expects {expected} operand(s) but has {}",
                        instruction.operands.len()
                    ),
                });
            }
            if opcode.takes_target() {
                resolve_target(pc, instruction, self.len())?;
            }
        }
        Ok(())
    }
}

/// Resolves the target operand of `JUMP`, `JUMP_IF` or `CALL` against a program of `len`
/// instructions. Landing exactly on `len` is a valid way to terminate.
pub(crate) fn resolve_target(pc: usize, instruction: &Instruction, len: usize) -> TierResult<usize> {
    let target = match instruction.operands.first() {
        Some(Value::Integer(target)) => *target,
        Some(other) => {
            return Err(TierError::MalformedInstruction {
                pc,
                opcode: instruction.opcode,
                reason: format!("target must be an integer, found {}", other.kind()),
            })
        }
        None => {
            return Err(TierError::MalformedInstruction {
                pc,
                opcode: instruction.opcode,
                reason: "missing target operand".into(),
            })
        }
    };
    match usize::try_from(target) {
        Ok(index) if index <= len => Ok(index),
        _ => Err(TierError::InvalidJumpTarget { pc, target, len }),
    }
}

impl Index<usize> for Program {
    type Output = Instruction;

    fn index(&self, pc: usize) -> &Self::Output {
        &self.instructions[pc]
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// Disassembly listing, one `pc: instruction` line per instruction.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{pc:04}: {instruction}")?;
        }
        Ok(())
    }
}
