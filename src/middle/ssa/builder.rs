//! Construction of SSA form from the linear IR: CFG derivation, iterative
//! dominator computation over a reverse postorder, dominance frontiers,
//! Φ insertion at iterated frontiers, and dominator-tree renaming.

use hashbrown::{HashMap, HashSet};

use crate::{
    diagnostics::DiagnosticEngine,
    frontend::ast::Program,
    index::Index,
    middle::{
        lir::{self, OpCode, Operand, RegisterId},
        lir::ast_lowering::lower_to_lir,
        ssa::{SsaBlockId, SsaFunction, SsaInstruction, SsaModule, SsaOpCode, SsaValueKind, ValueId},
    },
};

pub fn build_module(module: &lir::Module) -> SsaModule {
    SsaModule {
        functions: module.functions.iter().map(build_function).collect(),
    }
}

/// The AST-direct path: lowering composed with SSA construction. Equivalent
/// to running [`build_module`] over the lowered module.
pub fn build_from_program(program: &Program, diagnostics: &mut DiagnosticEngine) -> SsaModule {
    let lowered = lower_to_lir(program, diagnostics);
    build_module(&lowered)
}

/// The control-flow skeleton of one LIR function, restricted to the blocks
/// reachable from entry.
struct Cfg {
    /// Reachable LIR blocks in reverse postorder; index 0 is entry
    order: Vec<lir::BlockId>,
    /// LIR block id -> position in `order`
    position: HashMap<lir::BlockId, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

fn derive_successors(function: &lir::Function, block: lir::BlockId) -> Vec<lir::BlockId> {
    let data = &function.blocks[block];
    let mut successors = Vec::new();

    for instruction in &data.instructions {
        if let Some(label) = instruction.branch_target() {
            if let Some(target) = function.block_by_label(label) {
                if !successors.contains(&target) {
                    successors.push(target);
                }
            }
        }
    }

    if !data.has_terminator() {
        let next = lir::BlockId::new(block.index() + 1);
        if next.index() < function.blocks.len() && !successors.contains(&next) {
            successors.push(next);
        }
    }

    successors
}

fn build_cfg(function: &lir::Function) -> Cfg {
    // Depth-first postorder from entry; unreachable blocks are dropped
    let mut postorder = Vec::new();
    let mut visited = HashSet::new();

    fn visit(
        function: &lir::Function,
        block: lir::BlockId,
        visited: &mut HashSet<lir::BlockId>,
        postorder: &mut Vec<lir::BlockId>,
    ) {
        visited.insert(block);

        for successor in derive_successors(function, block) {
            if !visited.contains(&successor) {
                visit(function, successor, visited, postorder);
            }
        }

        postorder.push(block);
    }

    if !function.blocks.is_empty() {
        visit(function, function.entry(), &mut visited, &mut postorder);
    }

    let order: Vec<lir::BlockId> = postorder.into_iter().rev().collect();
    let position: HashMap<lir::BlockId, usize> = order
        .iter()
        .enumerate()
        .map(|(index, block)| (*block, index))
        .collect();

    let successors: Vec<Vec<usize>> = order
        .iter()
        .map(|block| {
            derive_successors(function, *block)
                .into_iter()
                .filter_map(|successor| position.get(&successor).copied())
                .collect()
        })
        .collect();

    let mut predecessors = vec![Vec::new(); order.len()];
    for (from, successor_list) in successors.iter().enumerate() {
        for to in successor_list {
            predecessors[*to].push(from);
        }
    }

    Cfg {
        order,
        position,
        successors,
        predecessors,
    }
}

/// Immediate dominators by the classical iterative data-flow algorithm over
/// the reverse postorder. `idom[0]` (entry) is itself.
fn compute_idoms(cfg: &Cfg) -> Vec<usize> {
    let n = cfg.order.len();
    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[0] = Some(0);

    let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| -> usize {
        while a != b {
            while a > b {
                a = idom[a].unwrap();
            }
            while b > a {
                b = idom[b].unwrap();
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;

        for block in 1..n {
            let mut new_idom: Option<usize> = None;

            for &pred in &cfg.predecessors[block] {
                if idom[pred].is_none() {
                    continue;
                }

                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }

            if new_idom.is_some() && idom[block] != new_idom {
                idom[block] = new_idom;
                changed = true;
            }
        }
    }

    idom.into_iter().map(|d| d.unwrap_or(0)).collect()
}

/// Cooper-style dominance frontiers: for each join block, walk each
/// predecessor's dominator chain up to the join's immediate dominator.
fn compute_dominance_frontiers(cfg: &Cfg, idom: &[usize]) -> Vec<HashSet<usize>> {
    let mut frontiers: Vec<HashSet<usize>> = vec![HashSet::new(); cfg.order.len()];

    for block in 0..cfg.order.len() {
        if cfg.predecessors[block].len() < 2 {
            continue;
        }

        for &pred in &cfg.predecessors[block] {
            let mut runner = pred;

            while runner != idom[block] {
                frontiers[runner].insert(block);
                runner = idom[runner];
            }
        }
    }

    frontiers
}

/// Maps the conditional jump opcodes to the comparison they consume.
fn comparison_for_jump(opcode: OpCode) -> Option<SsaOpCode> {
    Some(match opcode {
        OpCode::Je => SsaOpCode::Eq,
        OpCode::Jne => SsaOpCode::Ne,
        OpCode::Jg => SsaOpCode::Gt,
        OpCode::Jl => SsaOpCode::Lt,
        OpCode::Jge => SsaOpCode::Ge,
        OpCode::Jle => SsaOpCode::Le,
        _ => return None,
    })
}

struct Builder<'lir> {
    function: &'lir lir::Function,
    cfg: Cfg,
    idom: Vec<usize>,
    output: SsaFunction,
    /// Per-variable stacks of current SSA names
    stacks: HashMap<RegisterId, Vec<ValueId>>,
    /// One shared undef value per variable read before any write
    undefs: HashMap<RegisterId, ValueId>,
    /// (block position, variable) -> operands per predecessor position
    phis: HashMap<(usize, RegisterId), HashMap<usize, ValueId>>,
    /// Variables with a phi at a given block position, in insertion order
    phi_variables: Vec<Vec<RegisterId>>,
}

pub fn build_function(function: &lir::Function) -> SsaFunction {
    let cfg = build_cfg(function);
    let idom = compute_idoms(&cfg);
    let frontiers = compute_dominance_frontiers(&cfg, &idom);

    let mut output = SsaFunction::new(function.name);

    for block in &cfg.order {
        output.create_block(function.blocks[*block].label);
    }

    let phi_count = cfg.order.len();
    let mut builder = Builder {
        function,
        cfg,
        idom,
        output,
        stacks: HashMap::new(),
        undefs: HashMap::new(),
        phis: HashMap::new(),
        phi_variables: vec![Vec::new(); phi_count],
    };

    builder.insert_phis(&frontiers);
    builder.seed_parameters();
    builder.rename(0);
    builder.finalize()
}

impl<'lir> Builder<'lir> {
    /// Definition sites per variable, counting a parameter as an entry-block
    /// definition.
    fn definition_sites(&self) -> HashMap<RegisterId, HashSet<usize>> {
        let mut sites: HashMap<RegisterId, HashSet<usize>> = HashMap::new();

        for parameter in &self.function.parameters {
            sites.entry(*parameter).or_default().insert(0);
        }

        for (position, block) in self.cfg.order.iter().enumerate() {
            for instruction in &self.function.blocks[*block].instructions {
                let mut record = |register: Option<RegisterId>| {
                    if let Some(register) = register {
                        sites.entry(register).or_default().insert(position);
                    }
                };

                // A move's destination counts even though no SSA instruction
                // is emitted for it, and a call defines R0 by convention
                record(instruction.defined_register());

                if instruction.opcode == OpCode::Call {
                    record(Some(RegisterId::RETURN));
                }
            }
        }

        sites
    }

    /// Φ insertion at the iterated dominance frontier of each variable that
    /// is defined in more than one block.
    fn insert_phis(&mut self, frontiers: &[HashSet<usize>]) {
        for (variable, sites) in self.definition_sites() {
            if sites.len() < 2 {
                continue;
            }

            let mut worklist: Vec<usize> = sites.iter().copied().collect();
            let mut has_phi: HashSet<usize> = HashSet::new();

            while let Some(site) = worklist.pop() {
                for &join in &frontiers[site] {
                    if has_phi.insert(join) {
                        self.phi_variables[join].push(variable);
                        self.phis.insert((join, variable), HashMap::new());

                        // The phi itself is a new definition site
                        if !sites.contains(&join) {
                            worklist.push(join);
                        }
                    }
                }
            }
        }
    }

    fn seed_parameters(&mut self) {
        for (index, parameter) in self.function.parameters.iter().enumerate() {
            let value = self.output.create_value(SsaValueKind::Parameter(index));
            self.stacks.entry(*parameter).or_default().push(value);
        }
    }

    fn read_variable(&mut self, register: RegisterId) -> ValueId {
        if let Some(value) = self.stacks.get(&register).and_then(|stack| stack.last()) {
            return *value;
        }

        // Read before any write: a single shared placeholder per variable
        if let Some(value) = self.undefs.get(&register) {
            return *value;
        }

        let value = self.output.create_value(SsaValueKind::Register);
        self.undefs.insert(register, value);
        value
    }

    fn read_operand(&mut self, operand: Operand) -> ValueId {
        match operand {
            Operand::Register(register) => self.read_variable(register),
            Operand::Immediate(value) => self.output.constant(value),
            Operand::Memory(address) => {
                let existing = self
                    .output
                    .values
                    .enumerate()
                    .find(|(_, v)| v.kind == SsaValueKind::Global(address))
                    .map(|(id, _)| id);

                if let Some(id) = existing {
                    id
                } else {
                    self.output.create_value(SsaValueKind::Global(address))
                }
            }
            Operand::Label(_) => unreachable!("labels are not value operands"),
        }
    }

    fn write_variable(&mut self, register: RegisterId, value: ValueId) -> usize {
        self.stacks.entry(register).or_default().push(value);
        1
    }

    /// Renames one block and its dominator-tree children, restoring the
    /// name stacks on the way out.
    fn rename(&mut self, position: usize) {
        let mut pushes: Vec<RegisterId> = Vec::new();

        // Φs define first
        for variable in self.phi_variables[position].clone() {
            let value = self.output.create_value(SsaValueKind::Register);
            self.write_variable(variable, value);
            pushes.push(variable);

            let block = SsaBlockId::new(position);
            self.output.blocks[block]
                .instructions
                .push(SsaInstruction::new(SsaOpCode::Phi).with_result(value));
        }

        let lir_block = self.cfg.order[position];
        let instructions = self.function.blocks[lir_block].instructions.clone();
        let block = SsaBlockId::new(position);

        let mut skip_next_jump = false;

        for (index, instruction) in instructions.iter().enumerate() {
            match instruction.opcode {
                OpCode::Mov => {
                    let source = instruction
                        .src1
                        .expect("MOV carries a source operand");
                    let value = self.read_operand(source);

                    let destination = instruction
                        .dest
                        .and_then(|op| op.as_register())
                        .expect("MOV destination is a register");

                    self.write_variable(destination, value);
                    pushes.push(destination);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let lhs = self.read_operand(instruction.src1.unwrap());
                    let rhs = self.read_operand(instruction.src2.unwrap());
                    let result = self.output.create_value(SsaValueKind::Register);

                    let opcode = match instruction.opcode {
                        OpCode::Add => SsaOpCode::Add,
                        OpCode::Sub => SsaOpCode::Sub,
                        OpCode::Mul => SsaOpCode::Mul,
                        OpCode::Div => SsaOpCode::Div,
                        _ => unreachable!(),
                    };

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(opcode)
                            .with_result(result)
                            .with_operands(vec![lhs, rhs]),
                    );

                    let destination = instruction.dest.and_then(|op| op.as_register()).unwrap();
                    self.write_variable(destination, result);
                    pushes.push(destination);
                }
                OpCode::Cmp => {
                    // A compare immediately consumed by a conditional jump
                    // becomes comparison + CondBr; a bare compare's value is
                    // unspecified downstream and is dropped
                    let Some(next) = instructions.get(index + 1) else {
                        continue;
                    };

                    let Some(comparison) = comparison_for_jump(next.opcode) else {
                        continue;
                    };

                    let lhs = self.read_operand(instruction.dest.unwrap());
                    let rhs = self.read_operand(instruction.src1.unwrap());
                    let condition = self.output.create_value(SsaValueKind::Register);

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(comparison)
                            .with_result(condition)
                            .with_operands(vec![lhs, rhs]),
                    );

                    let taken = next
                        .branch_target()
                        .and_then(|label| self.function.block_by_label(label))
                        .and_then(|id| self.cfg.position.get(&id).copied())
                        .map(SsaBlockId::new)
                        .expect("conditional jump targets a known block");

                    // The fallthrough edge goes to the textual-next block
                    let fallthrough = self
                        .cfg
                        .position
                        .get(&lir::BlockId::new(lir_block.index() + 1))
                        .copied()
                        .map(SsaBlockId::new)
                        .expect("conditional jump falls through to a block");

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::CondBr)
                            .with_operands(vec![condition])
                            .with_targets(vec![taken, fallthrough]),
                    );

                    skip_next_jump = true;
                }
                OpCode::Je
                | OpCode::Jne
                | OpCode::Jg
                | OpCode::Jl
                | OpCode::Jge
                | OpCode::Jle => {
                    if skip_next_jump {
                        // Consumed together with its compare above
                        skip_next_jump = false;
                        continue;
                    }

                    // A conditional jump with no flags producer keeps both
                    // edges; its condition is unspecified
                    let taken = instruction
                        .branch_target()
                        .and_then(|label| self.function.block_by_label(label))
                        .and_then(|id| self.cfg.position.get(&id).copied())
                        .map(SsaBlockId::new)
                        .expect("conditional jump targets a known block");

                    let fallthrough = self
                        .cfg
                        .position
                        .get(&lir::BlockId::new(lir_block.index() + 1))
                        .copied()
                        .map(SsaBlockId::new);

                    let condition = self.output.constant(0);

                    match fallthrough {
                        Some(fallthrough) => {
                            self.output.blocks[block].instructions.push(
                                SsaInstruction::new(SsaOpCode::CondBr)
                                    .with_operands(vec![condition])
                                    .with_targets(vec![taken, fallthrough]),
                            );
                        }
                        None => {
                            self.output.blocks[block]
                                .instructions
                                .push(SsaInstruction::new(SsaOpCode::Br).with_targets(vec![taken]));
                        }
                    }
                }
                OpCode::Jmp => {
                    let target = instruction
                        .branch_target()
                        .and_then(|label| self.function.block_by_label(label))
                        .and_then(|id| self.cfg.position.get(&id).copied())
                        .map(SsaBlockId::new)
                        .expect("jump targets a known block");

                    self.output.blocks[block]
                        .instructions
                        .push(SsaInstruction::new(SsaOpCode::Br).with_targets(vec![target]));
                }
                OpCode::Call => {
                    let callee = match instruction.dest {
                        Some(Operand::Label(label)) => label,
                        _ => unreachable!("CALL targets a label"),
                    };

                    let result = self.output.create_value(SsaValueKind::Register);

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::Call)
                            .with_result(result)
                            .with_symbol(callee),
                    );

                    // The result lands in R0 by convention
                    self.write_variable(RegisterId::RETURN, result);
                    pushes.push(RegisterId::RETURN);
                }
                OpCode::Ret => {
                    let value = self
                        .stacks
                        .get(&RegisterId::RETURN)
                        .and_then(|stack| stack.last())
                        .copied();

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::Ret)
                            .with_operands(value.into_iter().collect()),
                    );
                }
                OpCode::Wait => {
                    let operand = self.read_operand(instruction.dest.unwrap());

                    // A constant interval is materialized as a duration value
                    let operand = if matches!(
                        self.output.values[operand].kind,
                        SsaValueKind::Constant(_)
                    ) {
                        let duration = self.output.create_value(SsaValueKind::Register);
                        self.output.blocks[block].instructions.push(
                            SsaInstruction::new(SsaOpCode::DurationCreate)
                                .with_result(duration)
                                .with_operands(vec![operand]),
                        );
                        duration
                    } else {
                        operand
                    };

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::Wait).with_operands(vec![operand]),
                    );
                }
                OpCode::Dodecap | OpCode::Sample | OpCode::Delta => {
                    let source = self.read_operand(instruction.src1.unwrap());
                    let result = self.output.create_value(SsaValueKind::Register);

                    let opcode = match instruction.opcode {
                        OpCode::Dodecap => SsaOpCode::Dodecap,
                        OpCode::Sample => SsaOpCode::Sample,
                        OpCode::Delta => SsaOpCode::Delta,
                        _ => unreachable!(),
                    };

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(opcode)
                            .with_result(result)
                            .with_operands(vec![source]),
                    );

                    let destination = instruction.dest.and_then(|op| op.as_register()).unwrap();
                    self.write_variable(destination, result);
                    pushes.push(destination);
                }
                OpCode::Load => {
                    let source = self.read_operand(instruction.src1.unwrap());
                    let result = self.output.create_value(SsaValueKind::Register);

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::Load)
                            .with_result(result)
                            .with_operands(vec![source]),
                    );

                    let destination = instruction.dest.and_then(|op| op.as_register()).unwrap();
                    self.write_variable(destination, result);
                    pushes.push(destination);
                }
                OpCode::Store => {
                    let destination = self.read_operand(instruction.dest.unwrap());
                    let value = self.read_operand(instruction.src1.unwrap());

                    self.output.blocks[block].instructions.push(
                        SsaInstruction::new(SsaOpCode::Store)
                            .with_operands(vec![destination, value]),
                    );
                }
                OpCode::Label | OpCode::Nop => {}
            }
        }

        // A block that falls through gets an explicit Br
        if !self.output.blocks[block]
            .instructions
            .last()
            .is_some_and(|i| i.opcode.is_terminator())
        {
            if let Some(next) = self
                .cfg
                .position
                .get(&lir::BlockId::new(lir_block.index() + 1))
                .copied()
            {
                self.output.blocks[block]
                    .instructions
                    .push(SsaInstruction::new(SsaOpCode::Br).with_targets(vec![SsaBlockId::new(next)]));
            }
        }

        // Fill in this block's slot of every successor's phis
        for &successor in &self.cfg.successors[position].clone() {
            for variable in self.phi_variables[successor].clone() {
                let value = self.read_variable(variable);
                self.phis
                    .get_mut(&(successor, variable))
                    .expect("phi was inserted")
                    .insert(position, value);
            }
        }

        // Dominator-tree children, in block order
        for child in 0..self.cfg.order.len() {
            if child != 0 && self.idom[child] == position && child != position {
                self.rename(child);
            }
        }

        // Restore the stacks to their entry state
        for variable in pushes {
            self.stacks.get_mut(&variable).unwrap().pop();
        }
    }

    fn finalize(mut self) -> SsaFunction {
        // CFG edges from the emitted terminators
        for position in 0..self.cfg.order.len() {
            let block = SsaBlockId::new(position);

            let targets: Vec<SsaBlockId> = self.output.blocks[block]
                .instructions
                .iter()
                .flat_map(|instruction| instruction.targets.iter().copied())
                .collect();

            for target in targets {
                if !self.output.blocks[block].successors.contains(&target) {
                    self.output.blocks[block].successors.push(target);
                }
                if !self.output.blocks[target].predecessors.contains(&block) {
                    self.output.blocks[target].predecessors.push(block);
                }
            }
        }

        // Phi operands, one per predecessor, in predecessor-list order
        for position in 0..self.cfg.order.len() {
            let block = SsaBlockId::new(position);
            let predecessors = self.output.blocks[block].predecessors.clone();

            for (phi_index, variable) in self.phi_variables[position].clone().into_iter().enumerate()
            {
                let sources = self
                    .phis
                    .remove(&(position, variable))
                    .expect("phi operands were recorded");

                let mut operands = Vec::with_capacity(predecessors.len());

                for pred in &predecessors {
                    let value = match sources.get(&pred.index()) {
                        Some(value) => *value,
                        // An edge with no reaching definition keeps the
                        // shared placeholder for the variable
                        None => match self.undefs.get(&variable) {
                            Some(value) => *value,
                            None => {
                                let value = self.output.create_value(SsaValueKind::Register);
                                self.undefs.insert(variable, value);
                                value
                            }
                        },
                    };

                    operands.push(value);
                }

                self.output.blocks[block].instructions[phi_index].operands = operands;
            }
        }

        self.output
    }
}
