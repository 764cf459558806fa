use std::fs;

use bflang::error::ErrorKind;
use bflang::ir::Op;
use bflang::state::{CompilationState, CompilerOptions};

/// Compile one test program from disk, asserting success.
fn compile_file(name: &str, options: CompilerOptions) -> CompilationState {
    let path = format!("tests/programs/{}", name);
    let source = fs::read_to_string(&path).expect("Failed to read test program");
    let mut state = CompilationState::new(options);
    bflang::compile_source(&mut state, &path, &source)
        .unwrap_or_else(|e| panic!("unexpected error in {}: {}", name, e));
    state
}

fn program_for(name: &str) -> String {
    let state = compile_file(name, CompilerOptions {
        optimize: true,
        ..Default::default()
    });
    bflang::build_program(&state).expect("program should build")
}

/// Brackets must balance and nest properly for the interpreter's scanner.
fn assert_balanced(program: &str) {
    let mut depth = 0i32;
    for c in program.chars() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                assert!(depth >= 0, "unmatched ']' in program");
            }
            _ => {}
        }
    }
    assert_eq!(depth, 0, "unmatched '[' in program");
}

#[test]
fn programs_use_only_the_tape_alphabet() {
    for name in [
        "hello.bfl",
        "counter.bfl",
        "pair.bfl",
        "square.bfl",
        "multi_return.bfl",
        "echo.bfl",
    ] {
        let program = program_for(name);
        for c in program.chars() {
            assert!(
                matches!(c, '+' | '-' | '<' | '>' | '.' | ',' | '[' | ']' | '@'),
                "{} produced unexpected byte {:?}",
                name,
                c
            );
        }
    }
}

#[test]
fn programs_are_bracket_balanced() {
    for name in [
        "hello.bfl",
        "counter.bfl",
        "pair.bfl",
        "square.bfl",
        "multi_return.bfl",
        "echo.bfl",
    ] {
        assert_balanced(&program_for(name));
    }
}

#[test]
fn program_opens_with_dispatcher_prologue() {
    // main's frame extent is one cell, so the prologue walks three cells
    // onto the dispatch cell, loads the entry label, and sets the marker.
    let program = program_for("hello.bfl");
    assert!(program.starts_with(">>>"));
    assert!(program.ends_with(']'));
}

#[test]
fn every_jump_target_has_exactly_one_label() {
    for name in ["counter.bfl", "pair.bfl", "square.bfl", "multi_return.bfl"] {
        let state = compile_file(name, CompilerOptions::default());
        let labels: Vec<u32> = state
            .ir
            .iter()
            .filter_map(|i| match i.op {
                Op::Label { label } => Some(label),
                _ => None,
            })
            .collect();
        let mut targets: Vec<u32> = Vec::new();
        for instr in &state.ir {
            match instr.op {
                Op::Jump { target } => targets.push(target),
                Op::Call { return_label, .. } => targets.push(return_label),
                Op::Test {
                    true_label,
                    false_label,
                    ..
                } => {
                    targets.push(true_label);
                    targets.push(false_label);
                }
                _ => {}
            }
        }
        for target in targets {
            assert_eq!(
                labels.iter().filter(|&&l| l == target).count(),
                1,
                "{}: target {} should name exactly one label",
                name,
                target
            );
        }
    }
}

#[test]
fn listing_carries_file_line_and_mnemonic() {
    let state = compile_file("square.bfl", CompilerOptions::default());
    let listing = bflang::build_listing(&state);
    let first = listing.lines().next().unwrap();
    assert!(
        first.starts_with("tests/programs/square.bfl:"),
        "listing line: {}",
        first
    );
    assert!(listing.contains(" .L "));
    assert!(listing.contains(" CALL "));
    assert!(listing.contains(" RETURN "));
    assert!(listing.contains(" POP_STACK "));
}

#[test]
fn symbol_dump_hides_temporaries_by_default() {
    let state = compile_file("square.bfl", CompilerOptions::default());
    let mut dump = Vec::new();
    state.symbols.write_dump(&mut dump, false, false).unwrap();
    let dump = String::from_utf8(dump).unwrap();
    assert!(dump.contains("Function square entry=1"));
    assert!(dump.contains("Function main entry=2"));
    // x sits after square's return-address slot and return slot.
    assert!(dump.contains("Variable x address=2 size=1 length=1 type=cell"));
    assert!(!dump.contains("__tmp"));
    assert!(!dump.contains("__ret"));

    let mut verbose = Vec::new();
    state.symbols.write_dump(&mut verbose, true, false).unwrap();
    let verbose = String::from_utf8(verbose).unwrap();
    assert!(verbose.contains("__ret"));
    assert!(verbose.contains("__tmp"));
}

#[test]
fn debug_mode_produces_annotated_stream() {
    let state = compile_file("hello.bfl", CompilerOptions {
        debug: true,
        ..Default::default()
    });
    let artifact = bflang::build_program(&state).unwrap();
    // Annotated with listing lines, and not wrapped.
    assert!(artifact.contains("ILOAD"));
    assert!(!artifact.starts_with(">>>"));
}

#[test]
fn optimization_shrinks_but_preserves_shape() {
    let optimized = program_for("counter.bfl");
    let state = compile_file("counter.bfl", CompilerOptions::default());
    let plain = bflang::build_program(&state).unwrap();
    assert!(optimized.len() < plain.len());
    assert_balanced(&plain);
    assert_balanced(&optimized);
}

#[test]
fn missing_main_is_an_error() {
    let mut state = CompilationState::new(CompilerOptions::default());
    bflang::compile_source(&mut state, "lib.bfl", "f() -> (cell r) { r = 1; }").unwrap();
    let err = bflang::build_program(&state).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingMain);
}

#[test]
fn diagnostics_carry_file_and_line() {
    let mut state = CompilationState::new(CompilerOptions::default());
    let err = bflang::compile_source(
        &mut state,
        "bad.bfl",
        "main() {\n    cell x;\n    x = nope;\n}\n",
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "bad.bfl:3 Error 2: Unresolved identifier 'nope'");
}

#[test]
fn two_sources_compile_into_one_program() {
    let mut state = CompilationState::new(CompilerOptions {
        optimize: true,
        ..Default::default()
    });
    bflang::compile_source(
        &mut state,
        "lib.bfl",
        "double(cell x) -> (cell r) { r = x + x; }",
    )
    .unwrap();
    bflang::compile_source(
        &mut state,
        "app.bfl",
        "main() { cell y; y = double(2); output y; }",
    )
    .unwrap();
    let program = bflang::build_program(&state).unwrap();
    assert_balanced(&program);
}

#[test]
fn label_overflow_is_reported() {
    // Each if burns three labels; pile up enough to pass 255.
    let body = "if x { } ".repeat(90);
    let source = format!("main() {{ cell x; {} }}", body);
    let mut state = CompilationState::new(CompilerOptions::default());
    let err = bflang::compile_source(&mut state, "big.bfl", &source).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LabelOverflow);
}
