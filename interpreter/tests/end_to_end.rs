//! Compile source programs with the compiler crate and run the resulting
//! tape programs on the machine, asserting on observable output.

use std::io::Cursor;

use bf_interp::{Config, Halt, Machine};
use bflang::state::{CompilationState, CompilerOptions};

fn compile(source: &str, optimize: bool) -> String {
    let mut state = CompilationState::new(CompilerOptions {
        optimize,
        ..Default::default()
    });
    bflang::compile_source(&mut state, "test.bfl", source)
        .unwrap_or_else(|e| panic!("compile error: {}", e));
    bflang::build_program(&state).unwrap_or_else(|e| panic!("build error: {}", e))
}

fn run(program: &str, input: &[u8]) -> (Vec<u8>, Halt) {
    let mut machine = Machine::new(program, &Config::default());
    let mut output = Vec::new();
    let halt = machine
        .run(&mut Cursor::new(input.to_vec()), &mut output)
        .unwrap_or_else(|e| panic!("machine error at pc {}: {}", machine.pc(), e));
    (output, halt)
}

fn run_source(source: &str, input: &[u8]) -> Vec<u8> {
    run(&compile(source, true), input).0
}

#[test]
fn outputs_a_literal_byte() {
    assert_eq!(run_source("main() { output 65; }", b""), b"A");
}

#[test]
fn assignment_and_addition() {
    assert_eq!(
        run_source("main() { cell x; x = 3; x = x + 2; output x; }", b""),
        vec![5]
    );
}

#[test]
fn while_loop_counts_to_three() {
    assert_eq!(
        run_source(
            "main() { cell x; x = 0; while x - 3 { x = x + 1; output x; } }",
            b""
        ),
        vec![1, 2, 3]
    );
}

#[test]
fn record_fields() {
    assert_eq!(
        run_source(
            "type Pair { cell a; cell b; } \
             main() { Pair p; p.a = 7; p.b = p.a + 1; output p.b; }",
            b""
        ),
        vec![8]
    );
}

#[test]
fn function_call_with_return_value() {
    assert_eq!(
        run_source(
            "square(cell x) -> (cell r) { r = x + x; } \
             main() { cell y; y = square(3); output y; }",
            b""
        ),
        vec![6]
    );
}

#[test]
fn string_output() {
    assert_eq!(run_source("main() { output \"Hi\"; }", b""), b"Hi");
}

#[test]
fn empty_main_terminates_silently() {
    let (output, halt) = run(&compile("main() { }", true), b"");
    assert!(output.is_empty());
    assert_eq!(halt, Halt::Finished);
}

#[test]
fn unoptimized_output_matches_optimized() {
    let source = "square(cell x) -> (cell r) { r = x + x; } \
                  main() { cell y; y = square(3); output y; }";
    let plain = run(&compile(source, false), b"").0;
    let optimized = run(&compile(source, true), b"").0;
    assert_eq!(plain, vec![6]);
    assert_eq!(plain, optimized);
}

#[test]
fn subtraction() {
    assert_eq!(
        run_source("main() { cell x; x = 9; x = x - 4; output x; }", b""),
        vec![5]
    );
}

#[test]
fn if_takes_the_true_branch() {
    assert_eq!(
        run_source(
            "main() { cell x; x = 1; if x { output 65; } else { output 66; } output 67; }",
            b""
        ),
        b"AC"
    );
}

#[test]
fn if_takes_the_false_branch() {
    assert_eq!(
        run_source(
            "main() { cell x; x = 0; if x { output 65; } else { output 66; } output 67; }",
            b""
        ),
        b"BC"
    );
}

#[test]
fn if_without_else_falls_through() {
    assert_eq!(
        run_source(
            "main() { cell x; x = 0; if x { output 65; } output 66; }",
            b""
        ),
        b"B"
    );
}

#[test]
fn named_condition_survives_the_test() {
    // Testing a named variable must not consume it.
    assert_eq!(
        run_source(
            "main() { cell x; x = 2; if x { } output x; }",
            b""
        ),
        vec![2]
    );
}

#[test]
fn input_feeds_the_program() {
    assert_eq!(
        run_source(
            "main() { cell x; input x; x = x + 1; output x; }",
            &[10]
        ),
        vec![11]
    );
}

#[test]
fn tuple_output_walks_left_to_right() {
    assert_eq!(
        run_source(
            "main() { cell a; cell b; a = 65; b = 66; output a, b; }",
            b""
        ),
        b"AB"
    );
}

#[test]
fn tuple_assignment_swap_via_literals() {
    assert_eq!(
        run_source(
            "main() { cell a; cell b; a, b = 1, 2; output a, b; }",
            b""
        ),
        vec![1, 2]
    );
}

#[test]
fn multi_value_return() {
    assert_eq!(
        run_source(
            "pair() -> (cell a, cell b) { a = 1; b = 2; } \
             main() { cell x; cell y; x, y = pair(); output x, y; }",
            b""
        ),
        vec![1, 2]
    );
}

#[test]
fn member_function_reads_receiver_fields() {
    assert_eq!(
        run_source(
            "type Pair { cell a; cell b; } \
             Pair.sum() -> (cell s) { s = this.a + this.b; } \
             main() { Pair p; cell x; p.a = 3; p.b = 4; x = p.sum(); output x; }",
            b""
        ),
        vec![7]
    );
}

#[test]
fn member_function_leaves_receiver_intact() {
    assert_eq!(
        run_source(
            "type Pair { cell a; cell b; } \
             Pair.sum() -> (cell s) { s = this.a + this.b; } \
             main() { Pair p; cell x; p.a = 3; p.b = 4; x = p.sum(); output p.a, p.b; }",
            b""
        ),
        vec![3, 4]
    );
}

#[test]
fn nested_calls() {
    assert_eq!(
        run_source(
            "inc(cell v) -> (cell r) { r = v + 1; } \
             twice(cell v) -> (cell r) { r = inc(inc(v)); } \
             main() { cell y; y = twice(5); output y; }",
            b""
        ),
        vec![7]
    );
}

#[test]
fn forward_call_to_a_later_function() {
    assert_eq!(
        run_source(
            "main() { cell y; y = one(); output y; } \
             one() -> (cell r) { r = 1; }",
            b""
        ),
        vec![1]
    );
}

#[test]
fn call_argument_is_preserved() {
    // Passing a named variable copies it; the original stays usable.
    assert_eq!(
        run_source(
            "id(cell v) -> (cell r) { r = v + 0; } \
             main() { cell x; cell y; x = 9; y = id(x); output x, y; }",
            b""
        ),
        vec![9, 9]
    );
}

#[test]
fn while_loop_with_call_in_body() {
    assert_eq!(
        run_source(
            "dec(cell v) -> (cell r) { r = v - 1; } \
             main() { cell x; x = 3; while x { output x; x = dec(x); } }",
            b""
        ),
        vec![3, 2, 1]
    );
}

#[test]
fn exit_statement_halts_with_code() {
    let (output, halt) = run(&compile("main() { output 65; exit 7; output 66; }", true), b"");
    assert_eq!(output, b"A");
    assert_eq!(halt, Halt::Exited(7));
}

#[test]
fn inline_tape_text_runs_verbatim() {
    // 65 pluses and a dot, straight onto the tape at the frame base.
    let source = format!("main() {{ inline \"{}.\"; }}", "+".repeat(65));
    assert_eq!(run_source(&source, b""), b"A");
}

#[test]
fn wrapping_subtraction_underflows() {
    assert_eq!(
        run_source("main() { cell x; x = 0; x = x - 1; output x; }", b""),
        vec![255]
    );
}

#[test]
fn iload_output_law_holds_across_the_range() {
    for value in [0u8, 1, 7, 65, 128, 254, 255] {
        let source = format!("main() {{ output {}; }}", value);
        assert_eq!(run_source(&source, b""), vec![value], "value {}", value);
    }
}

#[test]
fn copy_keeps_source_and_scratch_clean() {
    // b = a + 1 copies a; a keeps its value and can be reused after.
    assert_eq!(
        run_source(
            "main() { cell a; cell b; a = 4; b = a + 1; output a, b; }",
            b""
        ),
        vec![4, 5]
    );
}

#[test]
fn nested_blocks_scope_their_locals() {
    assert_eq!(
        run_source(
            "main() { cell x; x = 1; { cell y; y = x + 1; output y; } output x; }",
            b""
        ),
        vec![2, 1]
    );
}

#[test]
fn move_round_trip_restores_cells() {
    use bflang::ir::{Instr, Op};

    // MOVE a<-b then MOVE b<-a leaves the tape as it started, modulo the
    // zeroed scratch.
    let ir = vec![
        Instr::new("t", 1, Op::Move { dst: 1, src: 0, size: 1 }, ""),
        Instr::new("t", 1, Op::Move { dst: 0, src: 1, size: 1 }, ""),
    ];
    let body = bflang::emitter::emit(&ir, false).unwrap().replace('\n', "");
    let program = format!("+++++{}.>.", body);
    let (output, _) = run(&program, b"");
    assert_eq!(output, vec![5, 0]);
}

#[test]
fn chained_field_arithmetic() {
    assert_eq!(
        run_source(
            "type Triple { cell a; cell b; cell c; } \
             main() { Triple t; t.a = 1; t.b = 2; t.c = t.a + t.b; output t.c; }",
            b""
        ),
        vec![3]
    );
}
