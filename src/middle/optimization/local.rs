//! The safe local passes: constant folding, liveness-based dead-code
//! elimination, peephole rewrites, branch threading, base-twelve annotation,
//! and the final NOP sweep.

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::intern::InternedSymbol,
    middle::lir::{self, Instruction, OpCode, Operand, RegisterId},
    middle::optimization::OptimizationStats,
};

/// Registers that are loaded with an immediate exactly once and never
/// written again. Their uses can be replaced with the constant.
fn single_constant_loads(function: &lir::Function) -> HashMap<RegisterId, i64> {
    let mut constants: HashMap<RegisterId, i64> = HashMap::new();
    let mut write_counts: HashMap<RegisterId, usize> = HashMap::new();

    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            if let Some(register) = instruction.defined_register() {
                *write_counts.entry(register).or_default() += 1;

                if instruction.opcode == OpCode::Mov {
                    if let Some(value) = instruction.src1.and_then(|op| op.as_immediate()) {
                        constants.insert(register, value);
                    }
                }
            }
        }
    }

    constants.retain(|register, _| write_counts.get(register) == Some(&1));
    constants
}

/// Rewrites arithmetic over two immediates into a `MOV` of the result.
/// Division by zero aborts the fold; signed 64-bit wraparound is the only
/// overflow semantics. Runs to a fixed point together with constant
/// substitution.
pub fn fold_constants(function: &mut lir::Function, stats: &mut OptimizationStats) {
    loop {
        let constants = single_constant_loads(function);
        let mut changed = false;

        for block in function.blocks.iter_mut() {
            for instruction in &mut block.instructions {
                // Substitute known-constant registers into value positions
                let substitutable = instruction.opcode.is_arithmetic()
                    || instruction.opcode == OpCode::Mov
                    || instruction.opcode == OpCode::Cmp;

                if substitutable {
                    for source in [&mut instruction.src1, &mut instruction.src2] {
                        if let Some(Operand::Register(register)) = source {
                            if let Some(value) = constants.get(register) {
                                *source = Some(Operand::Immediate(*value));
                                changed = true;
                            }
                        }
                    }
                }

                if !instruction.opcode.is_arithmetic() {
                    continue;
                }

                let (Some(lhs), Some(rhs)) = (
                    instruction.src1.and_then(|op| op.as_immediate()),
                    instruction.src2.and_then(|op| op.as_immediate()),
                ) else {
                    continue;
                };

                let value = match instruction.opcode {
                    OpCode::Add => lhs.wrapping_add(rhs),
                    OpCode::Sub => lhs.wrapping_sub(rhs),
                    OpCode::Mul => lhs.wrapping_mul(rhs),
                    OpCode::Div => {
                        if rhs == 0 {
                            continue;
                        }
                        lhs.wrapping_div(rhs)
                    }
                    _ => unreachable!(),
                };

                *instruction = Instruction {
                    opcode: OpCode::Mov,
                    dest: instruction.dest,
                    src1: Some(Operand::Immediate(value)),
                    src2: None,
                    comment: instruction.comment.take(),
                };

                stats.constants_folded += 1;
                changed = true;
            }
        }

        if !changed {
            return;
        }
    }
}

/// Def/use liveness. Roots are the side-effecting instructions and every
/// write to a register that backs a named source variable; everything a live
/// instruction reads is transitively kept. Pure instructions outside that
/// set are swept.
pub fn eliminate_dead_code(function: &mut lir::Function, stats: &mut OptimizationStats) {
    let mut needed: HashSet<RegisterId> = HashSet::new();
    needed.extend(function.parameters.iter().copied());

    // Seed with everything side-effecting instructions read
    for block in function.blocks.iter() {
        for instruction in &block.instructions {
            if instruction.opcode.has_side_effects() {
                needed.extend(instruction.used_registers());
            }
        }
    }

    // A compare is the flags producer for a conditional branch later in its
    // block; keep the pairing alive
    let mut live_compares: HashSet<(lir::BlockId, usize)> = HashSet::new();

    for block in function.blocks.iter() {
        let mut last_compare = None;

        for (index, instruction) in block.instructions.iter().enumerate() {
            if instruction.opcode == OpCode::Cmp {
                last_compare = Some(index);
            }

            if instruction.opcode.is_conditional_branch() {
                if let Some(compare) = last_compare {
                    live_compares.insert((block.id, compare));
                    needed.extend(block.instructions[compare].used_registers());
                }
            }
        }
    }

    // Transitively require the inputs of every needed definition
    loop {
        let mut changed = false;

        for block in function.blocks.iter() {
            for instruction in &block.instructions {
                let live = match instruction.defined_register() {
                    Some(register) => {
                        needed.contains(&register)
                            || function.variable_registers.contains(&register)
                    }
                    None => false,
                };

                if live {
                    for used in instruction.used_registers() {
                        changed |= needed.insert(used);
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }

    for block in function.blocks.iter_mut() {
        let block_id = block.id;
        let before = block.instructions.len();

        let mut index = 0;
        block.instructions.retain(|instruction| {
            let current = index;
            index += 1;

            if instruction.opcode.has_side_effects() {
                return true;
            }

            if instruction.opcode == OpCode::Cmp {
                return live_compares.contains(&(block_id, current));
            }

            match instruction.defined_register() {
                Some(register) => {
                    needed.contains(&register)
                        || function.variable_registers.contains(&register)
                }
                // Labels and NOPs are structural, not dead code
                None => true,
            }
        });

        stats.instructions_eliminated += before - block.instructions.len();
    }
}

/// The small-pattern rewrites, run to a fixed point within each block:
/// `MOV r,r` becomes `NOP`; adding zero and multiplying by one become moves;
/// multiplying by zero loads zero; a move chain `MOV r1,X; MOV r2,r1`
/// forwards `X`.
pub fn peephole(function: &mut lir::Function, stats: &mut OptimizationStats) {
    for block in function.blocks.iter_mut() {
        loop {
            let mut changed = false;

            for index in 0..block.instructions.len() {
                let instruction = &block.instructions[index];

                let rewrite = match instruction.opcode {
                    OpCode::Mov => {
                        if instruction.dest.is_some() && instruction.dest == instruction.src1 {
                            Some(Instruction::nullary(OpCode::Nop))
                        } else {
                            None
                        }
                    }
                    OpCode::Add => match (instruction.dest, instruction.src1, instruction.src2) {
                        (Some(dest), Some(src), Some(Operand::Immediate(0))) => {
                            Some(Instruction::binary(OpCode::Mov, dest, src))
                        }
                        _ => None,
                    },
                    OpCode::Mul => match (instruction.dest, instruction.src1, instruction.src2) {
                        (Some(dest), Some(src), Some(Operand::Immediate(1))) => {
                            Some(Instruction::binary(OpCode::Mov, dest, src))
                        }
                        (Some(dest), Some(_), Some(Operand::Immediate(0))) => {
                            Some(Instruction::binary(OpCode::Mov, dest, Operand::Immediate(0)))
                        }
                        _ => None,
                    },
                    _ => None,
                };

                if let Some(rewrite) = rewrite {
                    block.instructions[index] = rewrite;
                    stats.peephole_rewrites += 1;
                    changed = true;
                    continue;
                }

                // MOV r1, X; MOV r2, r1  =>  MOV r1, X; MOV r2, X
                if index + 1 < block.instructions.len() {
                    let first = &block.instructions[index];
                    let second = &block.instructions[index + 1];

                    if first.opcode == OpCode::Mov && second.opcode == OpCode::Mov {
                        if let (Some(source), Some(first_dest)) = (first.src1, first.dest) {
                            if second.src1 == Some(first_dest) && second.src1 != Some(source) {
                                block.instructions[index + 1].src1 = Some(source);
                                stats.peephole_rewrites += 1;
                                changed = true;
                            }
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }
}

/// Branch-chain simplification: a jump or conditional branch whose target
/// block consists of a single `JMP` is retargeted past it. Conservative;
/// never removes a block. The round count is bounded by the block count so
/// a degenerate trampoline cycle cannot spin forever.
pub fn simplify_branches(function: &mut lir::Function, stats: &mut OptimizationStats) {
    for _ in 0..function.blocks.len() {
        // Map every trampoline block to where it forwards
        let mut forwards: HashMap<lir::BlockId, lir::BlockId> = HashMap::new();

        for block in function.blocks.iter() {
            if block.instructions.len() != 1 {
                continue;
            }

            let only = &block.instructions[0];
            if only.opcode == OpCode::Jmp {
                if let Some(target) = only
                    .branch_target()
                    .and_then(|label| function.block_by_label(label))
                {
                    if target != block.id {
                        forwards.insert(block.id, target);
                    }
                }
            }
        }

        if forwards.is_empty() {
            return;
        }

        let ids_by_label: HashMap<InternedSymbol, lir::BlockId> = function
            .blocks
            .iter()
            .map(|block| (block.label, block.id))
            .collect();
        let labels_by_id: HashMap<lir::BlockId, InternedSymbol> = function
            .blocks
            .iter()
            .map(|block| (block.id, block.label))
            .collect();

        let mut changed = false;

        for block in function.blocks.iter_mut() {
            for instruction in &mut block.instructions {
                if !instruction.opcode.is_branch() {
                    continue;
                }

                let Some(Operand::Label(label)) = instruction.dest else {
                    continue;
                };

                let Some(target) = ids_by_label.get(&label) else {
                    continue;
                };

                if let Some(forwarded) = forwards.get(target) {
                    instruction.dest = Some(Operand::Label(labels_by_id[forwarded]));
                    stats.branches_simplified += 1;
                    changed = true;
                }
            }
        }

        function.recompute_successors();

        if !changed {
            return;
        }
    }
}

/// Tags multiplication and division by twelve for the backend, which may
/// expand them into shift-and-add forms.
pub fn annotate_base_twelve(function: &mut lir::Function) {
    for block in function.blocks.iter_mut() {
        for instruction in &mut block.instructions {
            if matches!(instruction.opcode, OpCode::Mul | OpCode::Div)
                && instruction.comment.is_none()
                && (instruction.src1.and_then(|op| op.as_immediate()) == Some(12)
                    || instruction.src2.and_then(|op| op.as_immediate()) == Some(12))
            {
                instruction.comment = Some("base12".to_owned());
            }
        }
    }
}

/// Drops the NOPs earlier rewrites left behind. Always the final pass.
pub fn remove_nops(function: &mut lir::Function, stats: &mut OptimizationStats) {
    for block in function.blocks.iter_mut() {
        let before = block.instructions.len();
        block.instructions.retain(|i| i.opcode != OpCode::Nop);
        stats.moves_removed += before - block.instructions.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diagnostics::DiagnosticEngine,
        frontend::{intern::InternedSymbol, parser::Parser, SourceFile},
        middle::lir::ast_lowering::lower_to_lir,
    };

    fn lower(source: &str) -> lir::Module {
        let file: &'static SourceFile = Box::leak(Box::new(SourceFile::in_memory(source)));
        let mut diagnostics = DiagnosticEngine::new();
        let result = Parser::parse_program(file, &mut diagnostics);
        assert!(!result.had_error);
        lower_to_lir(&result.program, &mut diagnostics)
    }

    fn run_level_one(function: &mut lir::Function) -> OptimizationStats {
        let mut stats = OptimizationStats::default();
        fold_constants(function, &mut stats);
        peephole(function, &mut stats);
        eliminate_dead_code(function, &mut stats);
        simplify_branches(function, &mut stats);
        annotate_base_twelve(function);
        remove_nops(function, &mut stats);
        stats
    }

    #[test]
    fn initializer_folds_to_a_single_move() {
        let mut module = lower("let x = 2 + 3 * 4;");
        let main = &mut module.functions[0];

        run_level_one(main);

        let moves_of_14: Vec<_> = main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter(|i| {
                i.opcode == OpCode::Mov && i.src1 == Some(Operand::Immediate(14))
            })
            .collect();

        assert_eq!(moves_of_14.len(), 1);

        // All the temporaries are gone: just the initializer and the return
        let total: usize = main.blocks.iter().map(|b| b.instructions.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let mut module = lower("let x = 1 / 0;");
        let main = &mut module.functions[0];

        let mut stats = OptimizationStats::default();
        fold_constants(main, &mut stats);

        assert!(main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .any(|i| i.opcode == OpCode::Div));
    }

    #[test]
    fn folding_wraps_on_overflow() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let a = function.allocate_register();
        let b = function.allocate_register();
        let c = function.allocate_register();
        function.variable_registers.insert(c);

        function.blocks[entry].instructions.extend([
            Instruction::binary(OpCode::Mov, Operand::Register(a), Operand::Immediate(i64::MAX)),
            Instruction::binary(OpCode::Mov, Operand::Register(b), Operand::Immediate(1)),
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(c),
                Operand::Register(a),
                Operand::Register(b),
            ),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        fold_constants(&mut function, &mut stats);

        assert!(function.blocks[entry].instructions.iter().any(|i| {
            i.opcode == OpCode::Mov && i.src1 == Some(Operand::Immediate(i64::MIN))
        }));
    }

    #[test]
    fn dead_code_elimination_respects_side_effects_and_variables() {
        let mut module = lower("let x = 1; let unused_temp = 2 + 3; wait 1s;");
        let main = &mut module.functions[0];

        run_level_one(main);

        let instructions: Vec<_> = main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .collect();

        // Both variable initializers and the WAIT survive
        assert!(instructions
            .iter()
            .any(|i| i.src1 == Some(Operand::Immediate(1))));
        assert!(instructions
            .iter()
            .any(|i| i.src1 == Some(Operand::Immediate(5))));
        assert!(instructions.iter().any(|i| i.opcode == OpCode::Wait));
    }

    #[test]
    fn dead_temporaries_are_swept() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let t = function.allocate_register();

        function.blocks[entry].instructions.extend([
            Instruction::binary(OpCode::Mov, Operand::Register(t), Operand::Immediate(9)),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        eliminate_dead_code(&mut function, &mut stats);

        assert_eq!(stats.instructions_eliminated, 1);
        assert_eq!(function.blocks[entry].instructions.len(), 1);
    }

    #[test]
    fn compare_feeding_a_branch_stays_alive() {
        let mut module = lower("if x == 0: return 1; else: return 2;");
        let main = &mut module.functions[0];

        run_level_one(main);

        let entry = &main.blocks[main.entry()];
        let len = entry.instructions.len();

        assert_eq!(entry.instructions[len - 2].opcode, OpCode::Cmp);
        assert_eq!(entry.instructions[len - 1].opcode, OpCode::Je);
    }

    #[test]
    fn peephole_rewrites_identities() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let a = function.allocate_register();
        let b = function.allocate_register();
        function.variable_registers.extend([a, b]);

        function.blocks[entry].instructions.extend([
            // MOV a, a  ->  NOP
            Instruction::binary(OpCode::Mov, Operand::Register(a), Operand::Register(a)),
            // ADD b, a, 0  ->  MOV b, a
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(b),
                Operand::Register(a),
                Operand::Immediate(0),
            ),
            // MUL b, b, 0  ->  MOV b, 0
            Instruction::ternary(
                OpCode::Mul,
                Operand::Register(b),
                Operand::Register(b),
                Operand::Immediate(0),
            ),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        peephole(&mut function, &mut stats);
        remove_nops(&mut function, &mut stats);

        let kinds: Vec<_> = function.blocks[entry]
            .instructions
            .iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(kinds, vec![OpCode::Mov, OpCode::Mov, OpCode::Ret]);
        assert!(stats.peephole_rewrites >= 3);
        assert_eq!(stats.moves_removed, 1);
    }

    #[test]
    fn move_chains_forward_their_source() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let a = function.allocate_register();
        let b = function.allocate_register();
        function.variable_registers.extend([a, b]);

        function.blocks[entry].instructions.extend([
            Instruction::binary(OpCode::Mov, Operand::Register(a), Operand::Immediate(7)),
            Instruction::binary(OpCode::Mov, Operand::Register(b), Operand::Register(a)),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        peephole(&mut function, &mut stats);

        assert_eq!(
            function.blocks[entry].instructions[1].src1,
            Some(Operand::Immediate(7))
        );
    }

    #[test]
    fn trampoline_jumps_are_threaded() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));
        let hop = function.create_block(InternedSymbol::new("hop"));
        let target = function.create_block(InternedSymbol::new("target"));

        function.blocks[entry].instructions.push(Instruction::unary(
            OpCode::Jmp,
            Operand::Label(InternedSymbol::new("hop")),
        ));
        function.blocks[hop].instructions.push(Instruction::unary(
            OpCode::Jmp,
            Operand::Label(InternedSymbol::new("target")),
        ));
        function.blocks[target]
            .instructions
            .push(Instruction::nullary(OpCode::Ret));
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        simplify_branches(&mut function, &mut stats);

        assert_eq!(
            function.blocks[entry].instructions[0]
                .branch_target()
                .unwrap()
                .value(),
            "target"
        );
        assert!(stats.branches_simplified >= 1);
    }

    #[test]
    fn multiplication_by_twelve_gets_annotated() {
        let mut module = lower("let x = y * 10;");
        let main = &mut module.functions[0];

        let mut stats = OptimizationStats::default();
        fold_constants(main, &mut stats);
        annotate_base_twelve(main);

        // 10 in base twelve is decimal 12
        let mul = main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.opcode == OpCode::Mul)
            .unwrap();

        assert_eq!(mul.src2, Some(Operand::Immediate(12)));
        assert_eq!(mul.comment.as_deref(), Some("base12"));
    }
}
