use super::{intern::InternedSymbol, numeric::Duration, SourceFile};
use crate::frontend::lexer::Span;

#[derive(Debug)]
pub struct Program<'source> {
    pub source_file: &'source SourceFile,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    Block(Block),
    VarDecl {
        name: Identifier,
        initializer: Option<Box<Expression>>,
    },
    FunctionDecl(Box<FunctionDecl>),
    If {
        condition: Box<Expression>,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    Every {
        interval: DurationLiteral,
        body: Block,
    },
    /// `derive x = expr;` captures a sample; `derive x over dur: body end;`
    /// runs a time-windowed body
    Derive {
        name: Identifier,
        expression: Option<Box<Expression>>,
        interval: Option<DurationLiteral>,
        body: Option<Block>,
    },
    Wait(DurationLiteral),
    Return(Option<Box<Expression>>),
    /// `break;` / `continue;` parse but have no lowering yet
    LoopControl(LoopControlKind),
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControlKind {
    Break,
    Continue,
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub parameters: Vec<Identifier>,
    pub body: Block,
}

#[derive(Debug)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub symbol: InternedSymbol,
}

/// A time-suffixed numeric literal, already normalized to nanoseconds. The
/// lexer fuses the magnitude and unit into one token, so this is a leaf.
#[derive(Debug, Clone, Copy)]
pub struct DurationLiteral {
    pub id: NodeId,
    pub span: Span,
    pub duration: Duration,
    /// True when the magnitude-unit product overflowed and was saturated
    pub saturated: bool,
}

#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    NumberLiteral(i64),
    StringLiteral(InternedSymbol),
    BooleanLiteral(bool),
    Identifier(InternedSymbol),
    Binary {
        operator: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Assignment {
        name: Identifier,
        value: Box<Expression>,
    },
    Call {
        name: Identifier,
        arguments: Vec<Expression>,
    },
    Duration(DurationLiteral),
    /// `d(expr)` — the change in `expr` across the sample window supplied by
    /// an enclosing temporal construct
    Derivative(Box<Expression>),
    Grouping(Box<Expression>),
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryOperator {
    pub span: Span,
    pub kind: BinaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LogicalAnd,
}

impl BinaryOperatorKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "and",
        })
    }
}
