//=====================================================
// File: bytecode/cache.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Persist optimized programs between runs
// Objective: Encode programs as one instruction per line
//            (`<opcode-tag> [<kind> <literal>]...`) and parse them back exactly
//=====================================================

use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};

use super::instruction::{Instruction, Opcode};
use super::value::{Value, ValueKind};
use super::Program;

/// Token standing for the empty string.
const EMPTY_TEXT: &str = "\\e";

/// Token separators. Both are escaped inside text literals; other whitespace is literal.
const SEPARATORS: [char; 2] = [' ', '\t'];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("could not open {} for {mode}: {reason}", .path.display())]
    Io {
        path: PathBuf,
        mode: &'static str,
        reason: String,
    },
    #[error("malformed cache line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl CacheError {
    fn io(path: &Path, mode: &'static str, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            mode,
            reason: err.to_string(),
        }
    }

    fn parse(line: usize, reason: impl Into<String>) -> Self {
        CacheError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

/// Renders `program` in the cache text format.
pub fn encode(program: &Program) -> String {
    let mut text = String::new();
    for instruction in program {
        text.push_str(&encode_instruction(instruction));
        text.push('\n');
    }
    text
}

fn encode_instruction(instruction: &Instruction) -> String {
    let mut line = instruction.opcode.tag().to_string();
    for operand in &instruction.operands {
        line.push(' ');
        line.push_str(operand.kind().cache_tag());
        line.push(' ');
        match operand {
            Value::Integer(value) => line.push_str(&value.to_string()),
            // Debug output of f64 reparses to the same bits.
            Value::Float(value) => line.push_str(&format!("{value:?}")),
            Value::Text(value) => line.push_str(&escape_text(value)),
        }
    }
    line
}

/// Parses the cache text format. Any malformed line rejects the whole program.
pub fn decode(text: &str) -> Result<Program, CacheError> {
    let mut instructions = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        if raw.trim().is_empty() {
            continue;
        }
        instructions.push(decode_instruction(line, raw)?);
    }
    Ok(Program::new(instructions))
}

fn decode_instruction(line: usize, raw: &str) -> Result<Instruction, CacheError> {
    let mut tokens = raw.split(SEPARATORS).filter(|token| !token.is_empty());
    let tag = tokens
        .next()
        .ok_or_else(|| CacheError::parse(line, "missing opcode"))?;
    let tag: i64 = tag
        .parse()
        .map_err(|_| CacheError::parse(line, format!("opcode tag `{tag}` is not an integer")))?;
    let opcode = Opcode::try_from(tag).map_err(|err| CacheError::parse(line, err.to_string()))?;

    let mut operands = Vec::new();
    while let Some(kind_tag) = tokens.next() {
        let kind = ValueKind::from_cache_tag(kind_tag)
            .ok_or_else(|| CacheError::parse(line, format!("unknown operand kind `{kind_tag}`")))?;
        let literal = tokens.next().ok_or_else(|| {
            CacheError::parse(line, format!("operand kind `{kind_tag}` has no literal"))
        })?;
        operands.push(decode_operand(line, kind, literal)?);
    }
    Ok(Instruction::new(opcode, operands))
}

fn decode_operand(line: usize, kind: ValueKind, literal: &str) -> Result<Value, CacheError> {
    match kind {
        ValueKind::Integer => literal
            .parse()
            .map(Value::Integer)
            .map_err(|_| CacheError::parse(line, format!("`{literal}` is not an int literal"))),
        ValueKind::Float => literal
            .parse()
            .map(Value::Float)
            .map_err(|_| CacheError::parse(line, format!("`{literal}` is not a float literal"))),
        ValueKind::Text => unescape_text(literal)
            .map(Value::Text)
            .ok_or_else(|| CacheError::parse(line, format!("bad escape in `{literal}`"))),
    }
}

fn escape_text(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_TEXT.to_string();
    }
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ' ' => escaped.push_str("\\s"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_text(token: &str) -> Option<String> {
    if token == EMPTY_TEXT {
        return Some(String::new());
    }
    let mut text = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            text.push(ch);
            continue;
        }
        match chars.next()? {
            '\\' => text.push('\\'),
            's' => text.push(' '),
            't' => text.push('\t'),
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            _ => return None,
        }
    }
    Some(text)
}

/// Writes `program` to `path`. A destination that cannot be opened is reported and nothing
/// is written.
pub fn save_optimized_bytecode(program: &Program, path: impl AsRef<Path>) -> Result<(), CacheError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|err| {
        error!(path = %path.display(), %err, "could not open cache file for writing");
        CacheError::io(path, "writing", err)
    })?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(encode(program).as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|err| {
            error!(path = %path.display(), %err, "failed to write cache file");
            CacheError::io(path, "writing", err)
        })?;
    debug!(path = %path.display(), instructions = program.len(), "saved optimized bytecode");
    Ok(())
}

/// Reads a program from `path`. A source that cannot be opened is reported and yields an empty
/// program; a malformed line is an error.
pub fn load_optimized_bytecode(path: impl AsRef<Path>) -> Result<Program, CacheError> {
    match read_program(path.as_ref()) {
        Err(CacheError::Io { path, reason, .. }) => {
            error!(path = %path.display(), %reason, "could not open cache file for reading");
            Ok(Program::default())
        }
        other => other,
    }
}

/// Strict variant of [`load_optimized_bytecode`] that also fails on I/O errors.
pub fn read_program(path: impl AsRef<Path>) -> Result<Program, CacheError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|err| CacheError::io(path, "reading", err))?;
    let program = decode(&text)?;
    debug!(path = %path.display(), instructions = program.len(), "loaded bytecode");
    Ok(program)
}


//=====================================================
// End of file
//=====================================================
