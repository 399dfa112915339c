//! Level-2 work: naive back-edge detection over the CFG, full unrolling of
//! short counted loops, tail-call marking, and opportunity tagging for the
//! backend.

use hashbrown::HashSet;

use crate::{
    index::Index,
    middle::lir::{self, OpCode, Operand, RegisterId},
    middle::optimization::{OptimizationStats, ProfileData},
};

/// A detected natural loop. Only single-block loops are exploited; nested
/// loops are allowed but left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loop {
    pub header: lir::BlockId,
    pub back_edge_from: lir::BlockId,
}

/// Depth-first back-edge detection: an edge `(u, v)` where `v` is already on
/// the current DFS path.
pub fn detect_loops(function: &lir::Function) -> Vec<Loop> {
    let mut loops = Vec::new();
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();

    fn visit(
        function: &lir::Function,
        block: lir::BlockId,
        visited: &mut HashSet<lir::BlockId>,
        on_path: &mut HashSet<lir::BlockId>,
        loops: &mut Vec<Loop>,
    ) {
        visited.insert(block);
        on_path.insert(block);

        for successor in function.blocks[block].successors.clone() {
            if on_path.contains(&successor) {
                loops.push(Loop {
                    header: successor,
                    back_edge_from: block,
                });
            } else if !visited.contains(&successor) {
                visit(function, successor, visited, on_path, loops);
            }
        }

        on_path.remove(&block);
    }

    if !function.blocks.is_empty() {
        visit(
            function,
            function.entry(),
            &mut visited,
            &mut on_path,
            &mut loops,
        );
    }

    loops
}

/// The counted-loop shape the unroller recognizes in a single-block loop:
/// an induction register stepped by one, compared against a bound, with a
/// conditional back-branch.
struct CountedLoop {
    induction: RegisterId,
    bound: Option<i64>,
    back_branch: OpCode,
}

fn match_counted_loop(block: &lir::BasicBlock) -> Option<CountedLoop> {
    let back = block.instructions.last()?;

    if !back.opcode.is_conditional_branch() || back.branch_target() != Some(block.label) {
        return None;
    }

    let compare = &block.instructions[block.instructions.len().checked_sub(2)?];
    if compare.opcode != OpCode::Cmp {
        return None;
    }

    let induction = compare.dest.and_then(|op| op.as_register())?;
    let bound = compare.src1.and_then(|op| op.as_immediate());

    // The induction register must step by exactly one inside the loop
    let steps = block
        .instructions
        .iter()
        .filter(|i| {
            i.opcode == OpCode::Add
                && i.dest == Some(Operand::Register(induction))
                && i.src1 == Some(Operand::Register(induction))
                && i.src2 == Some(Operand::Immediate(1))
        })
        .count();

    if steps != 1 {
        return None;
    }

    Some(CountedLoop {
        induction,
        bound,
        back_branch: back.opcode,
    })
}

/// The initial value of the induction register: the last immediate move into
/// it in any predecessor outside the loop.
fn initial_value(
    function: &lir::Function,
    header: lir::BlockId,
    induction: RegisterId,
) -> Option<i64> {
    let mut init = None;

    for block in function.blocks.iter() {
        if block.id == header || !block.successors.contains(&header) {
            continue;
        }

        for instruction in &block.instructions {
            if instruction.opcode == OpCode::Mov
                && instruction.dest == Some(Operand::Register(induction))
            {
                init = instruction.src1.and_then(|op| op.as_immediate());
            }
        }
    }

    init
}

fn trip_count(
    function: &lir::Function,
    header: lir::BlockId,
    counted: &CountedLoop,
    profile: &ProfileData,
) -> Option<i64> {
    if let Some(bound) = counted.bound {
        let init = initial_value(function, header, counted.induction)?;

        let trips = match counted.back_branch {
            OpCode::Jl | OpCode::Jne => bound - init,
            OpCode::Jle => bound - init + 1,
            _ => return None,
        };

        return (trips > 0).then_some(trips);
    }

    // No literal bound: fall back to profiled average iteration counts
    let label = function.blocks[header].label.value();
    let average = *profile.avg_loop_iterations.get(label)?;

    let rounded = average.round();
    ((average - rounded).abs() < 0.01 && rounded > 0.0).then_some(rounded as i64)
}

/// Fully unrolls single-block loops whose trip count is known and at most
/// twelve. The loop body is duplicated per iteration and the compare and
/// back-branch are dropped, so the function keeps no back edge.
pub fn unroll_dozen_loops(
    function: &mut lir::Function,
    profile: &ProfileData,
    stats: &mut OptimizationStats,
) {
    const UNROLL_LIMIT: i64 = 12;

    let loops = detect_loops(function);

    for detected in loops {
        // Single-block loops only
        if detected.header != detected.back_edge_from {
            continue;
        }

        let header = detected.header;

        let Some(counted) = match_counted_loop(&function.blocks[header]) else {
            continue;
        };

        let Some(trips) = trip_count(function, header, &counted, profile) else {
            continue;
        };

        if trips > UNROLL_LIMIT {
            continue;
        }

        let block = &mut function.blocks[header];
        let body: Vec<lir::Instruction> = block.instructions
            [..block.instructions.len() - 2]
            .to_vec();

        let mut unrolled = Vec::with_capacity(body.len() * trips as usize);
        for _ in 0..trips {
            unrolled.extend(body.iter().cloned());
        }

        block.instructions = unrolled;
        stats.loops_unrolled += 1;
    }

    function.recompute_successors();
}

/// Marks a `CALL` immediately followed by `RET` for the backend, which is
/// responsible for the actual jump-instead-of-call.
pub fn mark_tail_calls(function: &mut lir::Function, stats: &mut OptimizationStats) {
    for block in function.blocks.iter_mut() {
        for index in 0..block.instructions.len().saturating_sub(1) {
            if block.instructions[index].opcode == OpCode::Call
                && block.instructions[index + 1].opcode == OpCode::Ret
                && block.instructions[index].comment.is_none()
            {
                block.instructions[index].comment = Some("TAIL_CALL".to_owned());
                stats.tail_calls_marked += 1;
            }
        }
    }
}

/// Tags straight-line runs of identical arithmetic as vectorization
/// candidates and adjacent single-block loops as fusion candidates. Tags
/// only; semantics never change here.
pub fn tag_vector_opportunities(function: &mut lir::Function, stats: &mut OptimizationStats) {
    const MIN_RUN: usize = 4;

    for block in function.blocks.iter_mut() {
        let mut run_start = 0;
        let mut run_opcode: Option<OpCode> = None;
        let mut run_length = 0;

        let mut tags = Vec::new();

        for (index, instruction) in block.instructions.iter().enumerate() {
            let arithmetic = instruction.opcode.is_arithmetic();

            if arithmetic && Some(instruction.opcode) == run_opcode {
                run_length += 1;
            } else {
                if run_length >= MIN_RUN {
                    tags.push(run_start);
                }

                run_opcode = arithmetic.then_some(instruction.opcode);
                run_start = index;
                run_length = usize::from(arithmetic);
            }
        }

        if run_length >= MIN_RUN {
            tags.push(run_start);
        }

        for index in tags {
            if block.instructions[index].comment.is_none() {
                block.instructions[index].comment = Some("vectorize candidate".to_owned());
                stats.vector_opportunities += 1;
            }
        }
    }

    // Adjacent single-block loops are fusion candidates
    let loops = detect_loops(function);
    let single: HashSet<_> = loops
        .iter()
        .filter(|l| l.header == l.back_edge_from)
        .map(|l| l.header)
        .collect();

    for header in &single {
        let next = lir::BlockId::new(header.index() + 1);

        if single.contains(&next) {
            let block = &mut function.blocks[*header];
            if let Some(first) = block.instructions.first_mut() {
                if first.comment.is_none() {
                    first.comment = Some("fusion candidate".to_owned());
                    stats.vector_opportunities += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::lir::Instruction,
    };

    /// entry: MOV i, 0
    /// loop:  <payload> ADD i, i, 1; CMP i, <bound>; JL loop
    /// exit:  RET
    fn counted_loop_function(bound: Option<i64>) -> lir::Function {
        let mut function = lir::Function::new(InternedSymbol::new("f"));

        let entry = function.create_block(InternedSymbol::new("entry"));
        let header = function.create_block(InternedSymbol::new("loop"));
        let exit = function.create_block(InternedSymbol::new("exit"));

        let i = function.allocate_register();
        let acc = function.allocate_register();
        let limit = function.allocate_register();
        function.variable_registers.insert(acc);

        function.blocks[entry].instructions.push(Instruction::binary(
            OpCode::Mov,
            Operand::Register(i),
            Operand::Immediate(0),
        ));

        function.blocks[header].instructions.extend([
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(acc),
                Operand::Register(acc),
                Operand::Register(i),
            ),
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(i),
                Operand::Register(i),
                Operand::Immediate(1),
            ),
            Instruction::binary(
                OpCode::Cmp,
                Operand::Register(i),
                match bound {
                    Some(value) => Operand::Immediate(value),
                    None => Operand::Register(limit),
                },
            ),
            Instruction::unary(OpCode::Jl, Operand::Label(InternedSymbol::new("loop"))),
        ]);

        function.blocks[exit]
            .instructions
            .push(Instruction::nullary(OpCode::Ret));

        function.recompute_successors();
        function
    }

    fn has_back_edge(function: &lir::Function) -> bool {
        detect_loops(function)
            .iter()
            .any(|l| l.header == l.back_edge_from)
    }

    #[test]
    fn back_edges_are_detected() {
        let function = counted_loop_function(Some(12));
        let loops = detect_loops(&function);

        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, loops[0].back_edge_from);
        assert_eq!(function.blocks[loops[0].header].label.value(), "loop");
    }

    #[test]
    fn dozen_trip_loops_unroll_completely() {
        let mut function = counted_loop_function(Some(12));
        let mut stats = OptimizationStats::default();

        unroll_dozen_loops(&mut function, &ProfileData::default(), &mut stats);

        assert_eq!(stats.loops_unrolled, 1);
        assert!(!has_back_edge(&function));

        // Twelve copies of the two-instruction payload, no compare, no branch
        let header = function.block_by_label(InternedSymbol::new("loop")).unwrap();
        let body = &function.blocks[header].instructions;
        assert_eq!(body.len(), 24);
        assert!(body.iter().all(|i| i.opcode == OpCode::Add));
    }

    #[test]
    fn loops_beyond_a_dozen_trips_stay_rolled() {
        let mut function = counted_loop_function(Some(13));
        let mut stats = OptimizationStats::default();

        unroll_dozen_loops(&mut function, &ProfileData::default(), &mut stats);

        assert_eq!(stats.loops_unrolled, 0);
        assert!(has_back_edge(&function));
    }

    #[test]
    fn profiled_iteration_counts_enable_unrolling() {
        let mut function = counted_loop_function(None);
        let mut stats = OptimizationStats::default();

        let mut profile = ProfileData::default();
        profile.avg_loop_iterations.insert("loop".to_owned(), 4.0);

        unroll_dozen_loops(&mut function, &profile, &mut stats);

        assert_eq!(stats.loops_unrolled, 1);
        assert!(!has_back_edge(&function));

        let header = function.block_by_label(InternedSymbol::new("loop")).unwrap();
        assert_eq!(function.blocks[header].instructions.len(), 8);
    }

    #[test]
    fn unprofiled_unbounded_loops_are_left_alone() {
        let mut function = counted_loop_function(None);
        let mut stats = OptimizationStats::default();

        unroll_dozen_loops(&mut function, &ProfileData::default(), &mut stats);

        assert_eq!(stats.loops_unrolled, 0);
        assert!(has_back_edge(&function));
    }

    #[test]
    fn call_then_return_is_marked_as_a_tail_call() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        function.blocks[entry].instructions.extend([
            Instruction::unary(OpCode::Call, Operand::Label(InternedSymbol::new("helper"))),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        mark_tail_calls(&mut function, &mut stats);

        assert_eq!(stats.tail_calls_marked, 1);
        assert_eq!(
            function.blocks[entry].instructions[0].comment.as_deref(),
            Some("TAIL_CALL")
        );
    }

    #[test]
    fn arithmetic_runs_are_tagged_for_vectorization() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let registers: Vec<_> = (0..4).map(|_| function.allocate_register()).collect();

        for register in &registers {
            function.blocks[entry].instructions.push(Instruction::ternary(
                OpCode::Add,
                Operand::Register(*register),
                Operand::Register(*register),
                Operand::Immediate(1),
            ));
        }
        function.blocks[entry]
            .instructions
            .push(Instruction::nullary(OpCode::Ret));
        function.recompute_successors();

        let before = function.blocks[entry].instructions.clone();

        let mut stats = OptimizationStats::default();
        tag_vector_opportunities(&mut function, &mut stats);

        assert_eq!(stats.vector_opportunities, 1);
        assert_eq!(
            function.blocks[entry].instructions[0].comment.as_deref(),
            Some("vectorize candidate")
        );

        // Tags only; instruction order and opcodes are untouched
        for (before, after) in before.iter().zip(&function.blocks[entry].instructions) {
            assert_eq!(before.opcode, after.opcode);
            assert_eq!(before.dest, after.dest);
        }
    }
}
