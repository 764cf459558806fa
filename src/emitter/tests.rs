#[cfg(test)]
mod tests {
    use crate::emitter::{emit, wrap};
    use crate::ir::{Instr, Op};
    use crate::optimizer::optimize;

    fn emit_one(op: Op) -> String {
        let ir = vec![Instr::new("test.bfl", 1, op, "")];
        emit(&ir, false).unwrap().replace('\n', "")
    }

    #[test]
    fn iload_zeroes_then_adds() {
        assert_eq!(
            emit_one(Op::ILoad {
                dst: 2,
                size: 1,
                value: 3
            }),
            ">>[-]<<>>+++<<"
        );
    }

    #[test]
    fn iload_at_base() {
        assert_eq!(
            emit_one(Op::ILoad {
                dst: 0,
                size: 1,
                value: 65
            }),
            format!("[-]{}", "+".repeat(65))
        );
    }

    #[test]
    fn isub_emits_decrements() {
        assert_eq!(
            emit_one(Op::ISub {
                dst: 1,
                size: 1,
                value: 2
            }),
            ">--<"
        );
    }

    #[test]
    fn move_pattern() {
        assert_eq!(
            emit_one(Op::Move {
                dst: 0,
                src: 1,
                size: 1
            }),
            "[-]>[<>-<+>]<"
        );
    }

    #[test]
    fn move_optimizes_to_classic_form() {
        let raw = emit_one(Op::Move {
            dst: 0,
            src: 1,
            size: 1,
        });
        assert_eq!(optimize(&raw), "[-]>[-<+>]<");
    }

    #[test]
    fn add_does_not_zero_destination() {
        let raw = emit_one(Op::Add {
            dst: 0,
            src: 1,
            size: 1,
        });
        assert!(!raw.starts_with("[-]"));
        assert_eq!(optimize(&raw), ">[-<+>]<");
    }

    #[test]
    fn sub_decrements_destination() {
        let raw = emit_one(Op::Sub {
            dst: 0,
            src: 1,
            size: 1,
        });
        assert_eq!(optimize(&raw), ">[-<->]<");
    }

    #[test]
    fn multi_cell_move_touches_each_cell() {
        let raw = emit_one(Op::Move {
            dst: 0,
            src: 2,
            size: 2,
        });
        // Two zeroing loops, two drain loops.
        assert_eq!(raw.matches("[-]").count(), 2);
        assert_eq!(raw.matches('[').count(), 4);
    }

    #[test]
    fn compare_pattern() {
        assert_eq!(
            emit_one(Op::Compare {
                condition: 0,
                is_zero: 2,
                not_zero: 1
            }),
            ">>[-]<<>>+<<>[-]<[[-]>+<>>-<<]"
        );
    }

    #[test]
    fn copy_restores_source() {
        let raw = emit_one(Op::Copy {
            dst: 0,
            src: 1,
            aux: 2,
            size: 1,
            aux_size: 1,
        });
        // Phase 1 drains src into dst and aux, phase 2 drains aux back.
        assert_eq!(optimize(&raw), "[-]>>[-]<[-<+>>+<]>[-<+>]<<");
    }

    #[test]
    fn stack_ops_move_the_base() {
        assert_eq!(emit_one(Op::PushStack { offset: 3 }), ">>>");
        assert_eq!(emit_one(Op::PopStack { offset: 2 }), "<<");
    }

    #[test]
    fn io_walks_each_byte() {
        assert_eq!(
            emit_one(Op::Output { src: 1, size: 2 }),
            ">.<>>.<<"
        );
        assert_eq!(emit_one(Op::Input { src: 0, size: 1 }), ",");
    }

    #[test]
    fn jump_loads_target_and_closes() {
        assert_eq!(
            emit_one(Op::Jump { target: 2 }),
            ">[-]>[-]+<<[-]++>]<>]>[[-]<+>]<"
        );
    }

    #[test]
    fn label_subtracts_own_address() {
        assert_eq!(
            emit_one(Op::Label { label: 3 }),
            "[[-]>[-]<<[->+>+<<]>[-<+>]+<>>---[[-]<->]<<>>+<<>[<"
        );
    }

    #[test]
    fn ret_sets_continue_flag_except_for_main() {
        let normal = emit_one(Op::Ret {
            return_cell: 0,
            is_main: false,
        });
        let main = emit_one(Op::Ret {
            return_cell: 0,
            is_main: true,
        });
        assert_eq!(normal, ">[-]>[-]+<<>]<>]>[[-]<+>]<");
        assert_eq!(main, ">[-]>[-]<<>]<>]>[[-]<+>]<");
    }

    #[test]
    fn ret_walks_to_return_cell() {
        let raw = emit_one(Op::Ret {
            return_cell: 2,
            is_main: false,
        });
        assert!(raw.starts_with(">>"));
    }

    #[test]
    fn call_stores_return_label() {
        assert_eq!(
            emit_one(Op::Call {
                return_cell: 1,
                return_label: 4
            }),
            ">[-]<>++++<"
        );
    }

    #[test]
    fn test_transfers_through_jump_register() {
        let raw = emit_one(Op::Test {
            jump_register: 2,
            is_true: 3,
            is_false: 4,
            true_label: 5,
            false_label: 6,
        });
        // Ends on the jump register with the standard transfer close.
        assert!(raw.ends_with(">>>[-]>[-]+<<>]<>]>[[-]<+>]<"));
        assert!(raw.contains("+++++"));
        assert!(raw.contains("++++++"));
    }

    #[test]
    fn exit_loads_code_and_halts() {
        assert_eq!(emit_one(Op::Exit { code: 5 }), "[-]+++++@");
        assert_eq!(emit_one(Op::Exit { code: 0 }), "[-]@");
    }

    #[test]
    fn inline_is_verbatim() {
        assert_eq!(
            emit_one(Op::Inline {
                code: "+++.".into()
            }),
            "+++."
        );
    }

    #[test]
    fn nop_emits_nothing() {
        assert_eq!(emit_one(Op::Nop), "");
    }

    #[test]
    fn wrap_builds_dispatcher_shell() {
        assert_eq!(wrap("", 1, 1, false), ">>>+>+[]");
        assert_eq!(wrap("", 2, 3, false), ">>>>>++>+[]");
    }

    #[test]
    fn wrap_strips_newlines_even_unoptimized() {
        assert_eq!(wrap("+\n+", 1, 1, false), ">>>+>+[++]");
    }

    #[test]
    fn debug_mode_annotates_with_listing_lines() {
        let ir = vec![Instr::new(
            "demo.bfl",
            7,
            Op::ILoad {
                dst: 0,
                size: 1,
                value: 1,
            },
            "x@0:1 1",
        )];
        let out = emit(&ir, true).unwrap();
        assert!(out.starts_with("demo.bfl:7 ILOAD x@0:1 1\n"));
        assert!(out.contains("[-]+"));
    }
}
