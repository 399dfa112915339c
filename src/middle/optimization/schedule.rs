//! Level-3 work: dependence-safe instruction scheduling within blocks and
//! profile-guided block layout. Neither changes what a function computes.

use hashbrown::HashSet;

use crate::{
    index::Index,
    middle::lir::{self, Instruction, OpCode, Operand},
    middle::optimization::{OptimizationStats, ProfileData},
};

/// Instructions no reordering may cross: everything observable, the flag
/// producers/consumers, and structural markers.
fn is_scheduling_barrier(instruction: &Instruction) -> bool {
    instruction.opcode.has_side_effects()
        || matches!(instruction.opcode, OpCode::Cmp | OpCode::Label | OpCode::Load)
}

fn conflicts(earlier: &Instruction, later: &Instruction) -> bool {
    let earlier_def = earlier.defined_register();
    let later_def = later.defined_register();

    // Read-after-write
    if let Some(def) = earlier_def {
        if later.used_registers().contains(&def) {
            return true;
        }
    }

    // Write-after-read and write-after-write
    if let Some(def) = later_def {
        if earlier.used_registers().contains(&def) || earlier_def == Some(def) {
            return true;
        }
    }

    false
}

/// Reorders one barrier-free region: constant loads hoist to the front,
/// everything else keeps source order, and no instruction crosses one of its
/// dependences.
fn schedule_region(region: &[Instruction]) -> Vec<Instruction> {
    let n = region.len();
    let mut emitted = vec![false; n];
    let mut output = Vec::with_capacity(n);

    while output.len() < n {
        let mut choice: Option<usize> = None;

        for candidate in 0..n {
            if emitted[candidate] {
                continue;
            }

            let ready = (0..candidate)
                .all(|earlier| emitted[earlier] || !conflicts(&region[earlier], &region[candidate]));

            if !ready {
                continue;
            }

            let is_constant_load = region[candidate].opcode == OpCode::Mov
                && matches!(region[candidate].src1, Some(Operand::Immediate(_)));

            match choice {
                None => choice = Some(candidate),
                Some(current) => {
                    let current_is_load = region[current].opcode == OpCode::Mov
                        && matches!(region[current].src1, Some(Operand::Immediate(_)));

                    if is_constant_load && !current_is_load {
                        choice = Some(candidate);
                    }
                }
            }

            // The first ready constant load wins outright
            if choice.is_some_and(|c| {
                region[c].opcode == OpCode::Mov
                    && matches!(region[c].src1, Some(Operand::Immediate(_)))
            }) {
                break;
            }
        }

        let chosen = choice.expect("an acyclic dependence order always has a ready instruction");
        emitted[chosen] = true;
        output.push(region[chosen].clone());
    }

    output
}

/// Synchronized scheduling: reorder within each block under the data
/// dependence constraint, never across `WAIT`, `CALL`, or any branch.
pub fn schedule_instructions(function: &mut lir::Function, stats: &mut OptimizationStats) {
    for block in function.blocks.iter_mut() {
        let original = std::mem::take(&mut block.instructions);

        let mut scheduled: Vec<Instruction> = Vec::with_capacity(original.len());
        let mut region: Vec<Instruction> = Vec::new();

        for instruction in original.iter().cloned() {
            if is_scheduling_barrier(&instruction) {
                scheduled.extend(schedule_region(&region));
                region.clear();
                scheduled.push(instruction);
            } else {
                region.push(instruction);
            }
        }

        scheduled.extend(schedule_region(&region));

        stats.instructions_scheduled += scheduled
            .iter()
            .zip(&original)
            .filter(|(a, b)| a != b)
            .count();

        block.instructions = scheduled;
    }
}

/// Makes every fallthrough edge explicit so blocks can be permuted freely.
fn normalize_fallthroughs(function: &mut lir::Function) {
    let labels: Vec<_> = function.blocks.iter().map(|block| block.label).collect();
    let count = function.blocks.len();

    for (index, block) in function.blocks.iter_mut().enumerate() {
        if index + 1 < count && !block.has_terminator() {
            block.instructions.push(Instruction::unary(
                OpCode::Jmp,
                Operand::Label(labels[index + 1]),
            ));
        }
    }
}

/// Profile-guided layout: hot blocks become contiguous, with the hottest
/// successor placed directly after its predecessor; cold blocks sink. The
/// entry block never moves. Instruction semantics are untouched.
pub fn layout_by_profile(
    function: &mut lir::Function,
    profile: &ProfileData,
    stats: &mut OptimizationStats,
) {
    if profile.block_exec_count.is_empty() || function.blocks.len() < 3 {
        return;
    }

    normalize_fallthroughs(function);
    function.recompute_successors();

    let heat = |block: &lir::BasicBlock| -> u64 {
        profile
            .block_exec_count
            .get(block.label.value())
            .copied()
            .unwrap_or(0)
    };

    let mut order: Vec<lir::BlockId> = Vec::with_capacity(function.blocks.len());
    let mut placed: HashSet<lir::BlockId> = HashSet::new();

    let mut current = function.entry();
    order.push(current);
    placed.insert(current);

    while order.len() < function.blocks.len() {
        // Prefer the hottest not-yet-placed successor of the last block
        let next = function.blocks[current]
            .successors
            .iter()
            .filter(|id| !placed.contains(*id))
            .max_by_key(|id| heat(&function.blocks[**id]))
            .copied()
            .or_else(|| {
                // Otherwise the hottest remaining block anywhere
                function
                    .blocks
                    .indices()
                    .filter(|id| !placed.contains(id))
                    .max_by_key(|id| heat(&function.blocks[*id]))
            });

        let Some(next) = next else { break };

        order.push(next);
        placed.insert(next);
        current = next;
    }

    let moved = order
        .iter()
        .enumerate()
        .filter(|(position, id)| id.index() != *position)
        .count();

    if moved == 0 {
        return;
    }

    // Permute the block storage and re-index
    let mut old_blocks: Vec<Option<lir::BasicBlock>> =
        std::mem::take(&mut function.blocks.raw).into_iter().map(Some).collect();

    for id in &order {
        let mut block = old_blocks[id.index()].take().expect("each block placed once");
        block.id = function.blocks.next_index();
        function.blocks.raw.push(block);
    }

    function.recompute_successors();
    stats.blocks_reordered += moved;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::intern::InternedSymbol;

    #[test]
    fn constant_loads_hoist_within_a_region() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let a = function.allocate_register();
        let b = function.allocate_register();
        let c = function.allocate_register();
        let x = function.allocate_register();

        function.blocks[entry].instructions.extend([
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(c),
                Operand::Register(a),
                Operand::Register(b),
            ),
            Instruction::binary(OpCode::Mov, Operand::Register(x), Operand::Immediate(5)),
            Instruction::nullary(OpCode::Ret),
        ]);
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        schedule_instructions(&mut function, &mut stats);

        let kinds: Vec<_> = function.blocks[entry]
            .instructions
            .iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(kinds, vec![OpCode::Mov, OpCode::Add, OpCode::Ret]);
        assert!(stats.instructions_scheduled > 0);
    }

    #[test]
    fn nothing_crosses_a_wait() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let t = function.allocate_register();
        let u = function.allocate_register();

        let original = vec![
            Instruction::binary(OpCode::Mov, Operand::Register(t), Operand::Immediate(100)),
            Instruction::unary(OpCode::Wait, Operand::Register(t)),
            Instruction::binary(OpCode::Mov, Operand::Register(u), Operand::Immediate(7)),
            Instruction::nullary(OpCode::Ret),
        ];

        function.blocks[entry].instructions = original.clone();
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        schedule_instructions(&mut function, &mut stats);

        assert_eq!(function.blocks[entry].instructions, original);
    }

    #[test]
    fn dependences_keep_their_order() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));

        let a = function.allocate_register();
        let b = function.allocate_register();

        let original = vec![
            Instruction::binary(OpCode::Mov, Operand::Register(a), Operand::Immediate(1)),
            Instruction::ternary(
                OpCode::Add,
                Operand::Register(b),
                Operand::Register(a),
                Operand::Immediate(2),
            ),
            Instruction::ternary(
                OpCode::Mul,
                Operand::Register(a),
                Operand::Register(b),
                Operand::Immediate(3),
            ),
            Instruction::nullary(OpCode::Ret),
        ];

        function.blocks[entry].instructions = original.clone();
        function.recompute_successors();

        let mut stats = OptimizationStats::default();
        schedule_instructions(&mut function, &mut stats);

        assert_eq!(function.blocks[entry].instructions, original);
    }

    #[test]
    fn hot_blocks_become_contiguous() {
        let mut function = lir::Function::new(InternedSymbol::new("f"));
        let entry = function.create_block(InternedSymbol::new("entry"));
        let cold = function.create_block(InternedSymbol::new("cold"));
        let hot = function.create_block(InternedSymbol::new("hot"));

        function.blocks[entry].instructions.extend([
            Instruction::binary(
                OpCode::Cmp,
                Operand::Register(lir::RegisterId::RETURN),
                Operand::Immediate(0),
            ),
            Instruction::unary(OpCode::Je, Operand::Label(InternedSymbol::new("hot"))),
        ]);
        function.blocks[cold]
            .instructions
            .push(Instruction::nullary(OpCode::Ret));
        function.blocks[hot]
            .instructions
            .push(Instruction::nullary(OpCode::Ret));
        function.recompute_successors();

        let mut profile = ProfileData::default();
        profile.block_exec_count.insert("hot".to_owned(), 1000);
        profile.block_exec_count.insert("cold".to_owned(), 1);
        profile.block_exec_count.insert("entry".to_owned(), 1001);

        let mut stats = OptimizationStats::default();
        layout_by_profile(&mut function, &profile, &mut stats);

        let labels: Vec<_> = function
            .blocks
            .iter()
            .map(|block| block.label.value())
            .collect();
        assert_eq!(labels, vec!["entry", "hot", "cold"]);
        assert!(stats.blocks_reordered > 0);

        // The CFG stays consistent after the permutation
        crate::middle::optimization::debug_assert_function_invariants(&mut function);
    }
}
