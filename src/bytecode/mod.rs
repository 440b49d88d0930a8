//! Value and instruction model shared by every stage of the pipeline.

pub mod cache;
pub mod instruction;
pub mod value;

pub use instruction::{Instruction, Opcode, Program, UnknownOpcode};
pub use value::{Value, ValueKind};
