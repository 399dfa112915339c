//! The linear IR. In this form, abstract concepts like temporal loops and
//! conditionals are simplified to labels and jumps, and expression trees are
//! flattened into three-address instructions over an infinite virtual
//! register file.

use std::collections::BTreeSet;

use crate::{
    frontend::intern::InternedSymbol,
    index::{simple_index, IndexVec},
};

pub mod ast_lowering;
pub mod pretty_print;

#[derive(Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: InternedSymbol) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: InternedSymbol,
    pub parameters: Vec<RegisterId>,
    pub blocks: IndexVec<BlockId, BasicBlock>,
    /// Registers that back named source variables. Writes to these are
    /// observable and must survive dead-code elimination.
    pub variable_registers: BTreeSet<RegisterId>,
    next_register: u32,
}

simple_index! {
    /// Identifies a basic block within its function
    pub struct BlockId;
}

impl BlockId {
    pub const ZERO: Self = Self(0);
}

simple_index! {
    /// Identifies a virtual register within its function
    pub struct RegisterId;
}

impl RegisterId {
    /// R0, the conventional return-value register
    pub const RETURN: Self = Self(0);
}

impl Function {
    pub fn new(name: InternedSymbol) -> Self {
        let mut function = Self {
            name,
            parameters: Vec::new(),
            blocks: IndexVec::new(),
            variable_registers: BTreeSet::new(),
            next_register: 0,
        };

        // R0 is reserved before any parameter or temporary
        let r0 = function.allocate_register();
        debug_assert_eq!(r0, RegisterId::RETURN);

        function
    }

    pub fn allocate_register(&mut self) -> RegisterId {
        let id = RegisterId(self.next_register);
        self.next_register += 1;
        id
    }

    pub fn register_count(&self) -> usize {
        self.next_register as usize
    }

    pub fn create_block(&mut self, label: InternedSymbol) -> BlockId {
        let id = self.blocks.next_index();
        self.blocks.push(BasicBlock {
            id,
            label,
            instructions: Vec::new(),
            successors: Vec::new(),
        })
    }

    pub fn entry(&self) -> BlockId {
        BlockId::ZERO
    }

    pub fn block_by_label(&self, label: InternedSymbol) -> Option<BlockId> {
        self.blocks
            .enumerate()
            .find(|(_, block)| block.label == label)
            .map(|(id, _)| id)
    }

    /// Rebuilds every block's successor list from its terminating
    /// instructions and the textual block order. Passes that restructure
    /// control flow call this before handing the function on.
    pub fn recompute_successors(&mut self) {
        let targets: Vec<Vec<BlockId>> = self
            .blocks
            .iter()
            .map(|block| {
                let mut successors = Vec::new();

                for instruction in &block.instructions {
                    if instruction.opcode.is_branch() {
                        if let Some(Operand::Label(label)) = instruction.dest {
                            if let Some(target) = self.block_by_label(label) {
                                successors.push(target);
                            }
                        }
                    }
                }

                // A block that does not end in an unconditional transfer
                // falls through to the textual-next block
                let falls_through = !block
                    .instructions
                    .last()
                    .is_some_and(|i| matches!(i.opcode, OpCode::Jmp | OpCode::Ret));

                if falls_through {
                    let next = BlockId(block.id.0 + 1);
                    if (next.0 as usize) < self.blocks.len() && !successors.contains(&next) {
                        successors.push(next);
                    }
                }

                successors
            })
            .collect();

        for (block, successors) in self.blocks.iter_mut().zip(targets) {
            block.successors = successors;
        }
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: InternedSymbol,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    pub fn returns(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| i.opcode == OpCode::Ret)
    }

    /// True when the block's last instruction unconditionally leaves it
    pub fn has_terminator(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| matches!(i.opcode, OpCode::Jmp | OpCode::Ret))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /* Data movement */
    Mov,
    Load,
    Store,

    /* Arithmetic */
    Add,
    Sub,
    Mul,
    Div,

    /* Comparison */
    Cmp,

    /* Control flow */
    Jmp,
    Je,
    Jne,
    Jg,
    Jl,
    Jge,
    Jle,

    /* Function calls */
    Call,
    Ret,

    /* Temporal */
    Wait,
    Dodecap,
    Sample,
    Delta,

    /* Special */
    Label,
    Nop,
}

impl OpCode {
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::Je | Self::Jne | Self::Jg | Self::Jl | Self::Jge | Self::Jle
        )
    }

    pub fn is_conditional_branch(&self) -> bool {
        self.is_branch() && *self != Self::Jmp
    }

    /// Instructions whose effect is observable beyond the register file;
    /// these root liveness and are never deleted by any pass.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::Call | Self::Ret | Self::Store | Self::Wait) || self.is_branch()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(RegisterId),
    Immediate(i64),
    Memory(i64),
    Label(InternedSymbol),
}

impl Operand {
    pub fn as_register(&self) -> Option<RegisterId> {
        match self {
            Operand::Register(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_immediate(&self) -> Option<i64> {
        match self {
            Operand::Immediate(value) => Some(*value),
            _ => None,
        }
    }
}

/// A flat three-address instruction: opcode plus up to three operands and an
/// optional comment for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub dest: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
    pub comment: Option<String>,
}

impl Instruction {
    pub fn nullary(opcode: OpCode) -> Self {
        Self {
            opcode,
            dest: None,
            src1: None,
            src2: None,
            comment: None,
        }
    }

    pub fn unary(opcode: OpCode, dest: Operand) -> Self {
        Self {
            dest: Some(dest),
            ..Self::nullary(opcode)
        }
    }

    pub fn binary(opcode: OpCode, dest: Operand, src1: Operand) -> Self {
        Self {
            src1: Some(src1),
            ..Self::unary(opcode, dest)
        }
    }

    pub fn ternary(opcode: OpCode, dest: Operand, src1: Operand, src2: Operand) -> Self {
        Self {
            src2: Some(src2),
            ..Self::binary(opcode, dest, src1)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// The register this instruction writes, if any. `CMP`'s `dest` slot is a
    /// read, branches and calls carry labels, and `STORE` writes memory.
    pub fn defined_register(&self) -> Option<RegisterId> {
        match self.opcode {
            OpCode::Mov
            | OpCode::Load
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Dodecap
            | OpCode::Sample
            | OpCode::Delta => self.dest.and_then(|op| op.as_register()),
            _ => None,
        }
    }

    /// Every register this instruction reads. `RET` implicitly reads R0 (the
    /// return-value convention).
    pub fn used_registers(&self) -> Vec<RegisterId> {
        let mut used = Vec::new();

        match self.opcode {
            OpCode::Mov
            | OpCode::Load
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Dodecap
            | OpCode::Sample
            | OpCode::Delta => {
                used.extend(self.src1.and_then(|op| op.as_register()));
                used.extend(self.src2.and_then(|op| op.as_register()));
            }
            OpCode::Cmp | OpCode::Store => {
                used.extend(self.dest.and_then(|op| op.as_register()));
                used.extend(self.src1.and_then(|op| op.as_register()));
                used.extend(self.src2.and_then(|op| op.as_register()));
            }
            OpCode::Wait => {
                used.extend(self.dest.and_then(|op| op.as_register()));
            }
            OpCode::Ret => {
                used.push(RegisterId::RETURN);
            }
            OpCode::Jmp
            | OpCode::Je
            | OpCode::Jne
            | OpCode::Jg
            | OpCode::Jl
            | OpCode::Jge
            | OpCode::Jle
            | OpCode::Call
            | OpCode::Label
            | OpCode::Nop => {}
        }

        used
    }

    pub fn branch_target(&self) -> Option<InternedSymbol> {
        if !self.opcode.is_branch() {
            return None;
        }

        match self.dest {
            Some(Operand::Label(label)) => Some(label),
            _ => None,
        }
    }
}
