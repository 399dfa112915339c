//! The SSA intermediate form: every value defined at most once, confluences
//! represented by Φ nodes at block heads, and a CFG whose predecessor and
//! successor lists are kept symmetric.

use crate::{
    frontend::intern::InternedSymbol,
    index::{simple_index, Index, IndexVec},
    middle::ty::TypeId,
};

pub mod builder;
pub mod type_annotation;

simple_index! {
    /// Identifies an SSA value within its function
    pub struct ValueId;
}

simple_index! {
    /// Identifies an SSA basic block within its function
    pub struct SsaBlockId;
}

#[derive(Debug, Default)]
pub struct SsaModule {
    pub functions: Vec<SsaFunction>,
}

#[derive(Debug)]
pub struct SsaFunction {
    pub name: InternedSymbol,
    pub values: IndexVec<ValueId, SsaValue>,
    pub blocks: IndexVec<SsaBlockId, SsaBasicBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SsaValue {
    pub id: ValueId,
    pub kind: SsaValueKind,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsaValueKind {
    Register,
    Constant(i64),
    Parameter(usize),
    /// A static memory address
    Global(i64),
}

#[derive(Debug)]
pub struct SsaBasicBlock {
    pub id: SsaBlockId,
    pub label: InternedSymbol,
    pub instructions: Vec<SsaInstruction>,
    pub predecessors: Vec<SsaBlockId>,
    pub successors: Vec<SsaBlockId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SsaInstruction {
    pub opcode: SsaOpCode,
    pub result: Option<ValueId>,
    pub operands: Vec<ValueId>,
    /// Branch targets: `[destination]` for `Br`, `[taken, fallthrough]` for
    /// `CondBr`, empty otherwise
    pub targets: Vec<SsaBlockId>,
    /// Callee for `Call`
    pub symbol: Option<InternedSymbol>,
}

impl SsaInstruction {
    pub fn new(opcode: SsaOpCode) -> Self {
        Self {
            opcode,
            result: None,
            operands: Vec::new(),
            targets: Vec::new(),
            symbol: None,
        }
    }

    pub fn with_result(mut self, result: ValueId) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_operands(mut self, operands: Vec<ValueId>) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_targets(mut self, targets: Vec<SsaBlockId>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_symbol(mut self, symbol: InternedSymbol) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsaOpCode {
    /* Arithmetic */
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    /* Logical */
    And,
    Or,
    Xor,
    Not,

    /* Comparison */
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /* Memory */
    Load,
    Store,
    Alloca,

    /* Control flow */
    Br,
    CondBr,
    Ret,
    Call,

    /* SSA-specific */
    Phi,

    /* Vector-prefix variants */
    VectorLoad,
    VectorStore,
    VectorAdd,
    VectorMul,

    /* Domain-specific */
    DodecConvert,
    DurationCreate,
    Wait,
    Dodecap,
    Sample,
    Delta,
}

impl SsaOpCode {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br | Self::CondBr | Self::Ret)
    }
}

impl SsaFunction {
    pub fn new(name: InternedSymbol) -> Self {
        Self {
            name,
            values: IndexVec::new(),
            blocks: IndexVec::new(),
        }
    }

    pub fn create_value(&mut self, kind: SsaValueKind) -> ValueId {
        let id = self.values.next_index();
        self.values.push(SsaValue { id, kind, ty: None })
    }

    /// Constants are deduplicated per function.
    pub fn constant(&mut self, value: i64) -> ValueId {
        if let Some((id, _)) = self
            .values
            .enumerate()
            .find(|(_, v)| v.kind == SsaValueKind::Constant(value))
        {
            return id;
        }

        self.create_value(SsaValueKind::Constant(value))
    }

    pub fn create_block(&mut self, label: InternedSymbol) -> SsaBlockId {
        let id = self.blocks.next_index();
        self.blocks.push(SsaBasicBlock {
            id,
            label,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        })
    }

    pub fn block_by_label(&self, label: InternedSymbol) -> Option<&SsaBasicBlock> {
        self.blocks.iter().find(|block| block.label == label)
    }

    /// The structural SSA invariants. A violation is a compiler bug.
    pub fn assert_invariants(&self) {
        // No value is defined by more than one instruction
        let mut defined = vec![0usize; self.values.len()];

        for block in self.blocks.iter() {
            for instruction in &block.instructions {
                if let Some(result) = instruction.result {
                    defined[result.index()] += 1;
                    assert!(
                        defined[result.index()] == 1,
                        "value defined more than once in `{}`",
                        self.name
                    );
                }
            }
        }

        for block in self.blocks.iter() {
            // Phis appear only as a block prefix, one operand per
            // predecessor in predecessor order
            let mut past_phis = false;

            for instruction in &block.instructions {
                if instruction.opcode == SsaOpCode::Phi {
                    assert!(!past_phis, "phi after non-phi in `{}`", block.label);
                    assert_eq!(
                        instruction.operands.len(),
                        block.predecessors.len(),
                        "phi arity must match predecessor count in `{}`",
                        block.label
                    );
                } else {
                    past_phis = true;
                }
            }

            // CFG edges are symmetric
            for successor in &block.successors {
                assert!(
                    self.blocks[*successor].predecessors.contains(&block.id),
                    "edge {} -> {} missing from predecessor list",
                    block.label,
                    self.blocks[*successor].label
                );
            }

            for predecessor in &block.predecessors {
                assert!(
                    self.blocks[*predecessor].successors.contains(&block.id),
                    "edge {} -> {} missing from successor list",
                    self.blocks[*predecessor].label,
                    block.label
                );
            }
        }
    }
}

impl core::fmt::Display for SsaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SsaValueKind::Register => write!(f, "%r{}", self.id.index()),
            SsaValueKind::Constant(value) => write!(f, "%c{} ({value})", self.id.index()),
            SsaValueKind::Parameter(index) => write!(f, "%p{index}"),
            SsaValueKind::Global(address) => write!(f, "@g{address}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut function = SsaFunction::new(InternedSymbol::new("f"));

        let a = function.constant(47);
        let b = function.constant(47);
        let c = function.constant(12);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(function.values.len(), 2);
    }

    #[test]
    fn invariants_catch_asymmetric_edges() {
        let mut function = SsaFunction::new(InternedSymbol::new("f"));
        let a = function.create_block(InternedSymbol::new("a"));
        let b = function.create_block(InternedSymbol::new("b"));

        function.blocks[a].successors.push(b);

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            function.assert_invariants();
        }));

        assert!(caught.is_err());
    }
}
