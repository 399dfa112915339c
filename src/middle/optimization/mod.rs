//! The multi-pass linear-IR optimizer. Pass selection is driven by the
//! `-O` level: level 0 is the identity, level 1 enables the safe local
//! passes, level 2 adds loop-level and tail-call work, level 3 enables
//! scheduling and profile-guided layout.

use std::collections::HashMap;

use serde::Deserialize;

use crate::middle::lir;

pub mod local;
pub mod loops;
pub mod schedule;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum OptLevel {
    #[default]
    #[value(name = "0")]
    Zero,
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
    #[value(name = "3")]
    Three,
}

/// Execution counts gathered by an instrumented run; consumed by the level-3
/// passes. Empty by default.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileData {
    pub block_exec_count: HashMap<String, u64>,
    pub branch_taken_count: HashMap<String, u64>,
    pub avg_loop_iterations: HashMap<String, f64>,
}

impl ProfileData {
    pub fn is_empty(&self) -> bool {
        self.block_exec_count.is_empty()
            && self.branch_taken_count.is_empty()
            && self.avg_loop_iterations.is_empty()
    }
}

/// Transformation counts, reported once per run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationStats {
    pub constants_folded: usize,
    pub instructions_eliminated: usize,
    pub peephole_rewrites: usize,
    pub branches_simplified: usize,
    pub loops_unrolled: usize,
    pub tail_calls_marked: usize,
    pub vector_opportunities: usize,
    pub instructions_scheduled: usize,
    pub blocks_reordered: usize,
    pub moves_removed: usize,
}

impl core::fmt::Display for OptimizationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "folded {} constants, eliminated {} dead instructions, \
             {} peephole rewrites, {} branches simplified, {} loops unrolled, \
             {} tail calls marked, {} vector opportunities, \
             {} instructions scheduled, {} blocks reordered, {} moves removed",
            self.constants_folded,
            self.instructions_eliminated,
            self.peephole_rewrites,
            self.branches_simplified,
            self.loops_unrolled,
            self.tail_calls_marked,
            self.vector_opportunities,
            self.instructions_scheduled,
            self.blocks_reordered,
            self.moves_removed,
        )
    }
}

/// Runs the pass sequence selected by `level` over every function in the
/// module. Each pass is a whole-function mutation; the sequence never
/// re-enters itself.
pub fn optimize_module(
    module: &mut lir::Module,
    level: OptLevel,
    profile: &ProfileData,
) -> OptimizationStats {
    let mut stats = OptimizationStats::default();

    if level == OptLevel::Zero {
        return stats;
    }

    for function in &mut module.functions {
        local::fold_constants(function, &mut stats);
        local::peephole(function, &mut stats);
        local::eliminate_dead_code(function, &mut stats);
        local::simplify_branches(function, &mut stats);
        local::annotate_base_twelve(function);

        if level >= OptLevel::Two {
            loops::unroll_dozen_loops(function, profile, &mut stats);
            loops::mark_tail_calls(function, &mut stats);
            loops::tag_vector_opportunities(function, &mut stats);
        }

        if level >= OptLevel::Three {
            schedule::schedule_instructions(function, &mut stats);
            schedule::layout_by_profile(function, profile, &mut stats);
        }

        // Cleanup of NOPs produced by earlier rewrites always runs last
        local::remove_nops(function, &mut stats);

        debug_assert_function_invariants(function);
    }

    stats
}

/// Structural invariants every pass must preserve. A violation is a compiler
/// bug, not a user error.
pub fn debug_assert_function_invariants(function: &mut lir::Function) {
    if cfg!(debug_assertions) {
        assert!(!function.blocks.is_empty(), "function has no blocks");
        assert_eq!(
            function.blocks[function.entry()].label.value(),
            "entry",
            "entry block must stay first"
        );

        let stored: Vec<Vec<lir::BlockId>> = function
            .blocks
            .iter()
            .map(|block| block.successors.clone())
            .collect();

        function.recompute_successors();

        let recomputed: Vec<Vec<lir::BlockId>> = function
            .blocks
            .iter()
            .map(|block| block.successors.clone())
            .collect();

        assert_eq!(
            stored, recomputed,
            "successor lists disagree with terminating branches"
        );
    }
}
