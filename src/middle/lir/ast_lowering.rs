use hashbrown::HashMap;

use crate::{
    diagnostics::{DiagnosticEngine, SourceLocation},
    frontend::{
        ast::{
            BinaryOperatorKind, Block, Expression, ExpressionKind, FunctionDecl, Program,
            Statement, StatementKind,
        },
        intern::InternedSymbol,
    },
    middle::lir::{self, Instruction, OpCode, Operand, RegisterId},
};

struct LoweringContext<'diag> {
    diagnostics: &'diag mut DiagnosticEngine,
    source_name: String,
    functions: Vec<lir::Function>,
    /// Source name to virtual register, scoped to the current function
    symbol_table: HashMap<InternedSymbol, RegisterId>,
    current_block: lir::BlockId,
    next_label_id: u32,
}

/// Lowers a parsed program to the linear IR. Function declarations become IR
/// functions; any top-level statements are collected into an implicit `main`.
pub fn lower_to_lir(program: &Program, diagnostics: &mut DiagnosticEngine) -> lir::Module {
    let mut ctx = LoweringContext {
        diagnostics,
        source_name: program.source_file.name.clone(),
        functions: Vec::new(),
        symbol_table: HashMap::new(),
        current_block: lir::BlockId::ZERO,
        next_label_id: 0,
    };

    let mut top_level = Vec::new();

    for statement in &program.statements {
        match &statement.kind {
            StatementKind::FunctionDecl(decl) => ctx.lower_function(decl),
            _ => top_level.push(statement),
        }
    }

    if !top_level.is_empty() {
        ctx.lower_implicit_main(&top_level);
    }

    lir::Module {
        functions: ctx.functions,
    }
}

impl<'diag> LoweringContext<'diag> {
    fn current_function(&mut self) -> &mut lir::Function {
        self.functions.last_mut().expect("a function is being lowered")
    }

    fn create_label(&mut self, prefix: &str) -> InternedSymbol {
        InternedSymbol::new(&format!("{prefix}{}", self.next_label_id))
    }

    fn bump_label_counter(&mut self) {
        self.next_label_id += 1;
    }

    fn push_instruction(&mut self, instruction: Instruction) {
        let block = self.current_block;
        self.current_function().blocks[block]
            .instructions
            .push(instruction);
    }

    fn start_block(&mut self, label: InternedSymbol) {
        self.current_block = self.current_function().create_block(label);
    }

    fn allocate_register(&mut self) -> RegisterId {
        self.current_function().allocate_register()
    }

    fn variable_register(&mut self, name: InternedSymbol) -> RegisterId {
        if let Some(register) = self.symbol_table.get(&name) {
            return *register;
        }

        let register = self.allocate_register();
        self.symbol_table.insert(name, register);
        self.current_function().variable_registers.insert(register);
        register
    }

    fn warn_unlowered(&mut self, what: &str, span_hint: &str) {
        self.diagnostics.warn(
            SourceLocation::new(self.source_name.clone(), 0, 0),
            format!("{what} is not lowered yet; skipping {span_hint}"),
        );
    }

    fn lower_function(&mut self, decl: &FunctionDecl) {
        self.functions.push(lir::Function::new(decl.name.symbol));
        self.symbol_table.clear();

        for parameter in &decl.parameters {
            let register = self.variable_register(parameter.symbol);
            self.current_function().parameters.push(register);
        }

        self.start_block(InternedSymbol::new("entry"));
        self.lower_block(&decl.body);

        // Missing-return paths are benign at this stage
        self.push_instruction(Instruction::nullary(OpCode::Ret));

        self.current_function().recompute_successors();
    }

    fn lower_implicit_main(&mut self, statements: &[&Statement]) {
        self.functions
            .push(lir::Function::new(InternedSymbol::new("main")));
        self.symbol_table.clear();

        self.start_block(InternedSymbol::new("entry"));

        for statement in statements {
            self.lower_statement(statement);
        }

        self.push_instruction(Instruction::nullary(OpCode::Ret));

        self.current_function().recompute_successors();
    }

    fn lower_block(&mut self, block: &Block) {
        for statement in &block.statements {
            self.lower_statement(statement);
        }
    }

    fn lower_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Block(block) => self.lower_block(block),
            StatementKind::VarDecl { name, initializer } => {
                let register = self.variable_register(name.symbol);

                if let Some(initializer) = initializer {
                    let value = self.lower_expression(initializer);
                    self.push_instruction(Instruction::binary(
                        OpCode::Mov,
                        Operand::Register(register),
                        Operand::Register(value),
                    ));
                }
            }
            StatementKind::FunctionDecl(decl) => {
                // Nested declarations hoist to module level; the enclosing
                // function's state is restored afterwards
                let saved_table = std::mem::take(&mut self.symbol_table);
                let saved_block = self.current_block;
                let enclosing = self.functions.len() - 1;

                self.lower_function(decl);

                let last = self.functions.len() - 1;
                self.functions.swap(enclosing, last);
                self.symbol_table = saved_table;
                self.current_block = saved_block;
            }
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.lower_if(condition, then_branch, else_branch.as_ref()),
            StatementKind::Every { interval, body } => {
                let start_label = self.create_label("every_start");
                let end_label = self.create_label("every_end");
                self.bump_label_counter();

                let interval_register = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(interval_register),
                    Operand::Immediate(interval.duration.nanoseconds()),
                ));

                self.start_block(start_label);
                self.push_instruction(Instruction::unary(
                    OpCode::Wait,
                    Operand::Register(interval_register),
                ));

                self.lower_block(body);

                // The loop is infinite; `break` is not lowered
                self.push_instruction(Instruction::unary(
                    OpCode::Jmp,
                    Operand::Label(start_label),
                ));

                self.start_block(end_label);
            }
            StatementKind::Derive {
                name,
                expression,
                body,
                ..
            } => {
                if let Some(expression) = expression {
                    let register = self.variable_register(name.symbol);
                    let value = self.lower_expression(expression);

                    // The runtime captures the current sample of the
                    // expression into the destination
                    self.push_instruction(Instruction::binary(
                        OpCode::Dodecap,
                        Operand::Register(register),
                        Operand::Register(value),
                    ));
                } else if let Some(body) = body {
                    // The windowed difference is delegated to runtime calls
                    // the body is expected to contain
                    self.lower_block(body);
                }
            }
            StatementKind::Wait(duration) => {
                let register = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(register),
                    Operand::Immediate(duration.duration.nanoseconds()),
                ));
                self.push_instruction(Instruction::unary(
                    OpCode::Wait,
                    Operand::Register(register),
                ));
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    let register = self.lower_expression(value);
                    self.push_instruction(Instruction::binary(
                        OpCode::Mov,
                        Operand::Register(RegisterId::RETURN),
                        Operand::Register(register),
                    ));
                }

                self.push_instruction(Instruction::nullary(OpCode::Ret));
            }
            StatementKind::LoopControl(kind) => {
                self.warn_unlowered("loop control", &format!("`{kind:?}`").to_lowercase());
            }
            StatementKind::Expression(expression) => {
                self.lower_expression(expression);
            }
        }
    }

    fn lower_if(
        &mut self,
        condition: &Expression,
        then_branch: &Block,
        else_branch: Option<&Block>,
    ) {
        let then_label = self.create_label("then");
        let else_label = self.create_label("else");
        let end_label = self.create_label("endif");
        self.bump_label_counter();

        let condition_register = self.lower_expression(condition);

        self.push_instruction(Instruction::binary(
            OpCode::Cmp,
            Operand::Register(condition_register),
            Operand::Immediate(0),
        ));

        // Zero means false: skip the then branch
        self.push_instruction(Instruction::unary(
            OpCode::Je,
            Operand::Label(if else_branch.is_some() {
                else_label
            } else {
                end_label
            }),
        ));

        self.start_block(then_label);
        self.lower_block(then_branch);
        self.push_instruction(Instruction::unary(OpCode::Jmp, Operand::Label(end_label)));

        if let Some(else_branch) = else_branch {
            self.start_block(else_label);
            self.lower_block(else_branch);
        }

        self.start_block(end_label);
    }

    fn lower_expression(&mut self, expression: &Expression) -> RegisterId {
        match &expression.kind {
            ExpressionKind::NumberLiteral(value) => {
                let register = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(register),
                    Operand::Immediate(*value),
                ));
                register
            }
            ExpressionKind::BooleanLiteral(value) => {
                let register = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(register),
                    Operand::Immediate(*value as i64),
                ));
                register
            }
            ExpressionKind::StringLiteral(_) => {
                self.warn_unlowered("string data", "the literal");
                self.allocate_register()
            }
            ExpressionKind::Identifier(symbol) => self.variable_register(*symbol),
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);
                let result = self.allocate_register();

                let opcode = match operator.kind {
                    BinaryOperatorKind::Add => OpCode::Add,
                    BinaryOperatorKind::Subtract => OpCode::Sub,
                    BinaryOperatorKind::Multiply => OpCode::Mul,
                    BinaryOperatorKind::Divide => OpCode::Div,
                    kind if kind.is_comparison() => {
                        // Comparisons only set up the compare; the branch, if
                        // any, is the consumer's problem
                        self.push_instruction(Instruction::binary(
                            OpCode::Cmp,
                            Operand::Register(lhs),
                            Operand::Register(rhs),
                        ));
                        return result;
                    }
                    BinaryOperatorKind::LogicalAnd => {
                        self.warn_unlowered("logical conjunction", "the operator");
                        return result;
                    }
                    _ => unreachable!(),
                };

                self.push_instruction(Instruction::ternary(
                    opcode,
                    Operand::Register(result),
                    Operand::Register(lhs),
                    Operand::Register(rhs),
                ));

                result
            }
            ExpressionKind::Assignment { name, value } => {
                let value = self.lower_expression(value);
                let target = self.variable_register(name.symbol);

                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(target),
                    Operand::Register(value),
                ));

                target
            }
            ExpressionKind::Call { name, arguments } => {
                // Arguments evaluate for effect; the calling convention does
                // not pass them yet
                for argument in arguments {
                    self.lower_expression(argument);
                }

                self.push_instruction(Instruction::unary(
                    OpCode::Call,
                    Operand::Label(name.symbol),
                ));

                // The result arrives in R0 by convention
                let result = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(result),
                    Operand::Register(RegisterId::RETURN),
                ));

                result
            }
            ExpressionKind::Duration(duration) => {
                let register = self.allocate_register();
                self.push_instruction(Instruction::binary(
                    OpCode::Mov,
                    Operand::Register(register),
                    Operand::Immediate(duration.duration.nanoseconds()),
                ));
                register
            }
            ExpressionKind::Derivative(inner) => {
                let inner = self.lower_expression(inner);
                let result = self.allocate_register();

                self.push_instruction(Instruction::binary(
                    OpCode::Dodecap,
                    Operand::Register(result),
                    Operand::Register(inner),
                ));

                result
            }
            ExpressionKind::Grouping(inner) => self.lower_expression(inner),
        }
    }
}
