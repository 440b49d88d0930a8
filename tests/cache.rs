use std::fs;

use tempfile::tempdir;
use tiervm::bytecode::cache::{self, CacheError};
use tiervm::pipeline::CacheOutcome;
use tiervm::{load, save, Instruction, NativeBackend, Pipeline, Program, TierConfig, TierError};

fn mixed_program() -> Program {
    Program::new(vec![
        Instruction::load_const(-42),
        Instruction::load_const(0.1),
        Instruction::load_const("hello world"),
        Instruction::load_const(""),
        Instruction::load_const(i64::MIN),
        Instruction::load_const(1e-300),
        Instruction::add(),
        Instruction::jump_if(0),
        Instruction::call(9),
        Instruction::ret(),
        Instruction::print(),
        Instruction::halt(),
    ])
}

#[test]
fn save_then_load_is_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("optimized_code.txt");
    let program = mixed_program();
    save(&program, &path).expect("save");
    assert_eq!(load(&path).expect("load"), program);
}

#[test]
fn written_file_uses_integer_tags_and_kind_tokens() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("optimized_code.txt");
    let program = Program::new(vec![
        Instruction::load_const(1),
        Instruction::load_const(2),
        Instruction::add(),
        Instruction::print(),
        Instruction::halt(),
    ]);
    save(&program, &path).unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "0 int 1\n0 int 2\n1\n9\n10\n"
    );
}

#[test]
fn missing_file_loads_as_empty_program() {
    let dir = tempdir().unwrap();
    let program = load(dir.path().join("absent.txt")).expect("recoverable");
    assert!(program.is_empty());
    assert!(matches!(
        cache::read_program(dir.path().join("absent.txt")),
        Err(CacheError::Io { mode: "reading", .. })
    ));
}

#[test]
fn unwritable_destination_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("no-such-dir").join("cache.txt");
    let err = save(&mixed_program(), &path).unwrap_err();
    assert!(matches!(
        err,
        TierError::Cache(CacheError::Io { mode: "writing", .. })
    ));
    assert!(err.is_recoverable());
    assert!(!path.exists());
}

#[test]
fn malformed_file_is_a_fatal_load_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.txt");
    fs::write(&path, "0 int 1\n0 int x\n9\n").unwrap();
    assert!(matches!(
        load(&path),
        Err(TierError::Cache(CacheError::Parse { line: 2, .. }))
    ));
}

#[test]
fn rejected_cache_is_rebuilt_by_the_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("optimized_code.txt");
    fs::write(&path, "99\n").unwrap();
    let config = TierConfig {
        cache_path: path.clone(),
        ..TierConfig::default()
    };
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_backend(NativeBackend::interpreted_only("test"));
    let program = Program::new(vec![Instruction::load_const(7), Instruction::print()]);

    let report = pipeline.run(&program, &mut Vec::new()).unwrap();
    assert!(matches!(report.cache, CacheOutcome::Rejected { .. }));
    assert!(report.saved);
    assert_eq!(load(&path).unwrap(), program);
}

#[test]
fn empty_cache_file_forces_reoptimization() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("optimized_code.txt");
    fs::write(&path, "").unwrap();
    let config = TierConfig {
        cache_path: path,
        ..TierConfig::default()
    };
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_backend(NativeBackend::interpreted_only("test"));
    let program = Program::new(vec![Instruction::load_const(7), Instruction::print()]);
    let mut out = Vec::new();
    let report = pipeline.run(&program, &mut out).unwrap();
    assert_eq!(report.cache, CacheOutcome::Empty);
    assert!(report.profile.is_some());
    assert_eq!(out, b"7\n7\n7\n");
}
