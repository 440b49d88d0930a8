use rand::Rng;
use tiervm::{
    compile_and_execute, interpret, optimize, Instruction, Interpreter, NativeBackend, Pipeline,
    Profiler, Program, RuntimeConfig, TierConfig, TierError,
};

fn sample_program() -> Program {
    Program::new(vec![
        Instruction::load_const(1),
        Instruction::load_const(2),
        Instruction::add(),
        Instruction::print(),
        Instruction::halt(),
    ])
}

#[test]
fn sample_program_survives_every_tier() {
    let program = sample_program();
    let mut profiler = Profiler::new();
    let printed = interpret(&program, &mut profiler).expect("interpret");
    assert_eq!(printed.lines(), ["3"]);
    assert_eq!(profiler.count(2), 1);

    let optimized = optimize(&program, &profiler);
    assert_eq!(optimized, program);

    let mut second = Profiler::new();
    assert_eq!(interpret(&optimized, &mut second).unwrap().lines(), ["3"]);
    assert_eq!(compile_and_execute(&optimized).unwrap().lines(), ["3"]);
}

#[test]
fn unavailable_backend_still_prints() {
    let mut out = Vec::new();
    NativeBackend::interpreted_only("code generation library missing")
        .compile_and_execute(&sample_program(), &mut out)
        .expect("fallback run");
    assert_eq!(String::from_utf8(out).unwrap(), "3\n");
}

#[test]
fn hot_loop_is_folded_after_a_bounded_run() {
    let program = Program::new(vec![
        Instruction::load_const(2),
        Instruction::load_const(3),
        Instruction::add(),
        Instruction::print(),
        Instruction::jump(0),
    ]);
    let mut profiler = Profiler::new();
    let config = RuntimeConfig::default().with_step_limit(1_000).unwrap();
    let result = Interpreter::new(&program, &mut profiler)
        .with_config(config)
        .execute_to(&mut std::io::sink());
    assert_eq!(result, Err(TierError::StepLimitExceeded { limit: 1_000 }));
    assert_eq!(profiler.count(2), 200);
    assert!(profiler.is_hot(2));

    assert_eq!(
        optimize(&program, &profiler),
        Program::new(vec![
            Instruction::load_const(5),
            Instruction::print(),
            Instruction::jump(0),
        ])
    );
}

#[test]
fn fatal_errors_are_distinguishable_from_short_runs() {
    let program = Program::new(vec![
        Instruction::load_const(1),
        Instruction::print(),
        Instruction::load_const(1),
        Instruction::load_const(0),
        Instruction::div(),
        Instruction::print(),
    ]);
    let mut profiler = Profiler::new();
    assert!(matches!(
        interpret(&program, &mut profiler),
        Err(TierError::Arithmetic { pc: 4, .. })
    ));
}

/// Stack-valid straight-line program over small integers.
fn random_program(rng: &mut impl Rng) -> Program {
    let mut instructions = Vec::new();
    let mut depth = 0usize;
    let mut constants = 0usize;
    while constants < 15 {
        let choice = rng.gen_range(0..10);
        if depth >= 2 && choice < 4 {
            instructions.push(match rng.gen_range(0..3) {
                0 => Instruction::add(),
                1 => Instruction::sub(),
                _ => Instruction::mul(),
            });
            depth -= 1;
        } else if depth >= 1 && choice < 6 {
            instructions.push(Instruction::print());
            depth -= 1;
        } else {
            instructions.push(Instruction::load_const(rng.gen_range(-10i64..=10)));
            depth += 1;
            constants += 1;
        }
    }
    if rng.gen_bool(0.5) {
        instructions.push(Instruction::halt());
    }
    Program::new(instructions)
}

#[test]
fn optimization_preserves_output_of_straight_line_programs() {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let program = random_program(&mut rng);

        let mut profiler = Profiler::with_threshold(0);
        let expected = interpret(&program, &mut profiler).expect("interpret");
        let mut again = Profiler::with_threshold(0);
        assert_eq!(interpret(&program, &mut again).unwrap(), expected);

        let optimized = optimize(&program, &profiler);
        assert!(optimized.len() <= program.len());
        let mut rerun = Profiler::new();
        assert_eq!(
            interpret(&optimized, &mut rerun).unwrap(),
            expected,
            "optimized:\n{optimized}"
        );
        assert_eq!(compile_and_execute(&optimized).unwrap(), expected);
    }
}

#[test]
fn pipeline_without_cache_prints_each_stage() {
    let config = TierConfig {
        use_cache: false,
        native: false,
        ..TierConfig::default()
    };
    let pipeline = Pipeline::new(config).unwrap();
    let mut out = Vec::new();
    let report = pipeline.run(&sample_program(), &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "3\n3\n3\n");
    assert!(!report.native.is_native());
    let optimization = report.optimization.unwrap();
    assert_eq!(optimization.original_len, 5);
    assert_eq!(optimization.optimized_len, 5);
}

#[test]
fn zero_step_limit_is_a_configuration_error() {
    let config = TierConfig {
        step_limit: Some(0),
        ..TierConfig::default()
    };
    assert!(matches!(Pipeline::new(config), Err(TierError::Config(_))));
}
