use crate::{
    diagnostics::{DiagnosticEngine, SourceLocation},
    frontend::{
        ast::{
            BinaryOperator, BinaryOperatorKind, Block, DurationLiteral, Expression,
            ExpressionKind, FunctionDecl, Identifier, LoopControlKind, NodeId, Program, Statement,
            StatementKind,
        },
        intern::InternedSymbol,
        lexer::{Keyword, Lexer, Span, StreamError, Token, TokenKind, TokenStream},
        numeric::Duration,
        SourceFile,
    },
};

#[derive(Debug)]
pub struct Parser<'source, 'diag> {
    stream: TokenStream<'source>,
    diagnostics: &'diag mut DiagnosticEngine,
    next_node_id: u32,
    previous_kind: Option<TokenKind>,
    had_error: bool,
}

#[derive(Debug, Clone)]
struct SyntaxError {
    location: SourceLocation,
    message: String,
}

impl From<StreamError> for SyntaxError {
    fn from(e: StreamError) -> Self {
        Self {
            location: e.location,
            message: e.message,
        }
    }
}

pub struct ParseResult<'source> {
    pub program: Program<'source>,
    /// Set when any lex or parse error occurred. The program is still
    /// complete up to recovery, so downstream passes may proceed or abort as
    /// configured.
    pub had_error: bool,
}

impl<'source, 'diag> Parser<'source, 'diag> {
    pub fn parse_program(
        source_file: &'source SourceFile,
        diagnostics: &'diag mut DiagnosticEngine,
    ) -> ParseResult<'source> {
        let mut parser = Self {
            stream: TokenStream::new(Lexer::new(source_file)),
            diagnostics,
            next_node_id: 0,
            previous_kind: None,
            had_error: false,
        };

        let mut program = Program {
            source_file,
            statements: Vec::new(),
        };

        while !parser.at_eof() {
            match parser.parse_statement() {
                Ok(statement) => program.statements.push(statement),
                Err(e) => {
                    parser.report(e);
                    parser.synchronize();
                }
            }
        }

        // Lexical errors surface at the same phase boundary as parse errors
        for error in parser.stream.lexer().errors() {
            parser.had_error = true;
            parser
                .diagnostics
                .error(error.location.clone(), error.to_string());
        }

        ParseResult {
            program,
            had_error: parser.had_error,
        }
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn at_eof(&mut self) -> bool {
        matches!(
            self.stream.peek_kind(),
            None | Some(TokenKind::EndOfFile)
        )
    }

    fn report(&mut self, error: SyntaxError) {
        self.had_error = true;
        self.diagnostics.error(error.location, error.message);
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.stream.next();
        self.previous_kind = token.as_ref().map(|t| t.kind);
        token
    }

    fn matches(&mut self, kind: TokenKind) -> Option<Token> {
        if self.stream.peek_kind() == Some(kind) {
            return self.next();
        }

        None
    }

    fn expect(&mut self, kind: TokenKind, expecting: &str) -> Result<Token, SyntaxError> {
        let token = self.stream.expect(kind, expecting)?;
        self.previous_kind = Some(token.kind);
        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token, SyntaxError> {
        self.expect(TokenKind::Keyword(keyword), &format!("`{keyword}`"))
    }

    fn error_at_current(&mut self, message: impl Into<String>) -> SyntaxError {
        let location = match self.stream.peek() {
            Some(token) => token.location,
            None => SourceLocation::new(self.stream.lexer().source().name.clone(), 0, 0),
        };

        SyntaxError {
            location,
            message: message.into(),
        }
    }

    /// Panic-mode recovery: discard tokens until the previous token is a
    /// semicolon or the current token begins a statement.
    fn synchronize(&mut self) {
        self.next();

        while !self.at_eof() {
            if self.previous_kind == Some(TokenKind::Semicolon) {
                return;
            }

            if self
                .stream
                .peek_kind()
                .is_some_and(|kind| kind.starts_statement())
            {
                return;
            }

            self.next();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let Some(peeked) = self.stream.peek() else {
            return Err(self.error_at_current("unexpected end of file"));
        };

        match peeked.kind {
            TokenKind::Invalid => {
                self.next();
                Err(SyntaxError {
                    location: peeked.location,
                    message: format!(
                        "invalid token `{}`",
                        self.stream.lexer().source().value_of_span(peeked.span)
                    ),
                })
            }
            TokenKind::Keyword(Keyword::Fn) => self.parse_function_decl(),
            TokenKind::Keyword(Keyword::Let) => self.parse_var_decl(),
            TokenKind::Keyword(Keyword::If) => self.parse_if_statement(),
            TokenKind::Keyword(Keyword::Every) => self.parse_every_statement(),
            TokenKind::Keyword(Keyword::Derive) => self.parse_derive_statement(),
            TokenKind::Keyword(Keyword::Wait) => self.parse_wait_statement(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return_statement(),
            TokenKind::Keyword(kind @ (Keyword::Break | Keyword::Continue)) => {
                let keyword = self.next().unwrap();
                let semicolon = self.expect(
                    TokenKind::Semicolon,
                    if kind == Keyword::Break {
                        "`;` after `break`"
                    } else {
                        "`;` after `continue`"
                    },
                )?;

                Ok(Statement {
                    id: self.create_node_id(),
                    span: Span::new(keyword.span.start, semicolon.span.end),
                    kind: StatementKind::LoopControl(if kind == Keyword::Break {
                        LoopControlKind::Break
                    } else {
                        LoopControlKind::Continue
                    }),
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    /// fn name(param, param) body end?
    /// fn = [name param param];
    fn parse_function_decl(&mut self) -> Result<Statement, SyntaxError> {
        let fn_keyword = self.expect_keyword(Keyword::Fn)?;

        // Bracket form: `fn = [name params...];` declares a signature with an
        // empty body
        if self.matches(TokenKind::Equals).is_some() {
            self.expect(TokenKind::OpenBracket, "`[` after `fn =`")?;
            let name = self.parse_identifier("function name")?;

            let mut parameters = Vec::new();
            while self.stream.peek_kind() == Some(TokenKind::Identifier) {
                parameters.push(self.parse_identifier("parameter name")?);
            }

            let close = self.expect(TokenKind::CloseBracket, "`]`")?;
            let semicolon = self.expect(TokenKind::Semicolon, "`;` after function declaration")?;

            let body = Block {
                id: self.create_node_id(),
                span: Span::new(close.span.start, close.span.end),
                statements: Vec::new(),
            };

            let span = Span::new(fn_keyword.span.start, semicolon.span.end);

            return Ok(Statement {
                id: self.create_node_id(),
                span,
                kind: StatementKind::FunctionDecl(Box::new(FunctionDecl {
                    id: self.create_node_id(),
                    span,
                    name,
                    parameters,
                    body,
                })),
            });
        }

        let name = self.parse_identifier("function name")?;

        self.expect(TokenKind::OpenParen, "`(` after function name")?;

        let mut parameters = Vec::new();
        if self.stream.peek_kind() != Some(TokenKind::CloseParen) {
            parameters.push(self.parse_identifier("parameter name")?);

            while self.matches(TokenKind::Comma).is_some() {
                parameters.push(self.parse_identifier("parameter name")?);
            }
        }

        self.expect(TokenKind::CloseParen, "`)` after parameters")?;

        let body = self.parse_block()?;

        // An optional terminator lets one function follow another
        let terminator = self.matches(TokenKind::Keyword(Keyword::End));
        let semicolon = terminator
            .is_some()
            .then(|| self.matches(TokenKind::Semicolon))
            .flatten();

        let end = semicolon
            .as_ref()
            .or(terminator.as_ref())
            .map(|t| t.span.end)
            .unwrap_or(body.span.end);

        let span = Span::new(fn_keyword.span.start, end);

        Ok(Statement {
            id: self.create_node_id(),
            span,
            kind: StatementKind::FunctionDecl(Box::new(FunctionDecl {
                id: self.create_node_id(),
                span,
                name,
                parameters,
                body,
            })),
        })
    }

    fn parse_identifier(&mut self, expecting: &str) -> Result<Identifier, SyntaxError> {
        let token = self.expect(TokenKind::Identifier, expecting)?;

        Ok(Identifier {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(
                self.stream.lexer().source().value_of_span(token.span),
            ),
        })
    }

    /// let name ( = expr )? ;
    fn parse_var_decl(&mut self) -> Result<Statement, SyntaxError> {
        let let_keyword = self.expect_keyword(Keyword::Let)?;
        let name = self.parse_identifier("variable name")?;

        let initializer = if self.matches(TokenKind::Equals).is_some() {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        let semicolon = self.expect(TokenKind::Semicolon, "`;` after variable declaration")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(let_keyword.span.start, semicolon.span.end),
            kind: StatementKind::VarDecl { name, initializer },
        })
    }

    /// if expr : block ( else : block )?
    fn parse_if_statement(&mut self) -> Result<Statement, SyntaxError> {
        let if_keyword = self.expect_keyword(Keyword::If)?;

        let condition = Box::new(self.parse_expression()?);
        self.expect(TokenKind::Colon, "`:` after if condition")?;

        let then_branch = self.parse_block()?;

        let else_branch = if self.matches(TokenKind::Keyword(Keyword::Else)).is_some() {
            self.expect(TokenKind::Colon, "`:` after `else`")?;
            Some(self.parse_block()?)
        } else {
            None
        };

        let end = else_branch
            .as_ref()
            .map(|b| b.span.end)
            .unwrap_or(then_branch.span.end);

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(if_keyword.span.start, end),
            kind: StatementKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    /// every duration : block end ;
    fn parse_every_statement(&mut self) -> Result<Statement, SyntaxError> {
        let every_keyword = self.expect_keyword(Keyword::Every)?;

        let interval = self.parse_duration()?;
        self.expect(TokenKind::Colon, "`:` after duration")?;

        let body = self.parse_block()?;

        self.expect_keyword(Keyword::End)?;
        let semicolon = self.expect(TokenKind::Semicolon, "`;` after `end`")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(every_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Every { interval, body },
        })
    }

    /// derive name = expr ;
    /// derive name over duration : block end ;
    fn parse_derive_statement(&mut self) -> Result<Statement, SyntaxError> {
        let derive_keyword = self.expect_keyword(Keyword::Derive)?;
        let name = self.parse_identifier("variable name")?;

        if self.matches(TokenKind::Equals).is_some() {
            let expression = Box::new(self.parse_expression()?);
            let semicolon = self.expect(TokenKind::Semicolon, "`;` after derive statement")?;

            return Ok(Statement {
                id: self.create_node_id(),
                span: Span::new(derive_keyword.span.start, semicolon.span.end),
                kind: StatementKind::Derive {
                    name,
                    expression: Some(expression),
                    interval: None,
                    body: None,
                },
            });
        }

        self.expect_keyword(Keyword::Over)?;

        let interval = self.parse_duration()?;
        self.expect(TokenKind::Colon, "`:` after duration")?;

        let body = self.parse_block()?;

        self.expect_keyword(Keyword::End)?;
        let semicolon = self.expect(TokenKind::Semicolon, "`;` after `end`")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(derive_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Derive {
                name,
                expression: None,
                interval: Some(interval),
                body: Some(body),
            },
        })
    }

    /// wait duration ;
    fn parse_wait_statement(&mut self) -> Result<Statement, SyntaxError> {
        let wait_keyword = self.expect_keyword(Keyword::Wait)?;

        let duration = self.parse_duration()?;
        let semicolon = self.expect(TokenKind::Semicolon, "`;` after wait statement")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(wait_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Wait(duration),
        })
    }

    /// ( return | ret ) expr? ;
    fn parse_return_statement(&mut self) -> Result<Statement, SyntaxError> {
        let return_keyword = self.expect_keyword(Keyword::Return)?;

        let value = if self.stream.peek_kind() == Some(TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        let semicolon = self.expect(TokenKind::Semicolon, "`;` after return statement")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(return_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Return(value),
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, SyntaxError> {
        let expression = self.parse_expression()?;
        let semicolon = self.expect(TokenKind::Semicolon, "`;` after expression")?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(expression.span.start, semicolon.span.end),
            kind: StatementKind::Expression(Box::new(expression)),
        })
    }

    /// Statements until `end`, `else`, or end of file. The terminator is left
    /// for the caller.
    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let start = self
            .stream
            .peek()
            .map(|t| t.span.start)
            .unwrap_or_default();

        let mut statements = Vec::new();

        while !self.at_eof()
            && !matches!(
                self.stream.peek_kind(),
                Some(TokenKind::Keyword(Keyword::End | Keyword::Else))
            )
        {
            statements.push(self.parse_statement()?);
        }

        let end = statements
            .last()
            .map(|s| s.span.end)
            .unwrap_or(start);

        Ok(Block {
            id: self.create_node_id(),
            span: Span::new(start, end),
            statements,
        })
    }

    fn parse_duration(&mut self) -> Result<DurationLiteral, SyntaxError> {
        let token = self.expect(TokenKind::TimeLiteral, "duration (e.g. `100ms`)")?;

        let magnitude = token.value.expect("time literal token carries a value");
        let unit = token.unit.expect("time literal token carries a unit");

        let saturated = Duration::from_parts_exact(magnitude, unit).is_none();

        if saturated {
            self.diagnostics.warn(
                token.location.clone(),
                format!("duration `{magnitude}{unit}` overflows; saturating"),
            );
        }

        Ok(DurationLiteral {
            id: self.create_node_id(),
            span: token.span,
            duration: Duration::from_parts(magnitude, unit),
            saturated,
        })
    }

    /// expression  -> assignment
    /// assignment  -> logical_or ( "=" assignment )?
    /// logical_or  -> logical_and
    /// logical_and -> equality ( "and" equality )*
    /// equality    -> comparison ( ( "==" | "!=" ) comparison )*
    /// comparison  -> term ( ( "<" | "<=" | ">" | ">=" ) term )*
    /// term        -> factor ( ( "+" | "-" ) factor )*
    /// factor      -> unary ( ( "*" | "/" ) unary )*
    /// unary       -> "-" unary | call
    /// call        -> primary ( "(" arguments? ")" )?
    /// primary     -> NUMBER | STRING | DURATION | IDENT | "d" "(" expression ")"
    ///                | "(" expression ")"
    fn parse_expression(&mut self) -> Result<Expression, SyntaxError> {
        self.parse_assignment_expression()
    }

    fn parse_assignment_expression(&mut self) -> Result<Expression, SyntaxError> {
        let expression = self.parse_logical_or_expression()?;

        if self.stream.peek_kind() == Some(TokenKind::Equals) {
            self.next();
            let value = self.parse_assignment_expression()?;

            let ExpressionKind::Identifier(symbol) = expression.kind else {
                return Err(SyntaxError {
                    location: self.location_of_span(expression.span),
                    message: "invalid assignment target".to_owned(),
                });
            };

            let span = Span::new(expression.span.start, value.span.end);

            return Ok(Expression {
                id: self.create_node_id(),
                span,
                kind: ExpressionKind::Assignment {
                    name: Identifier {
                        id: self.create_node_id(),
                        span: expression.span,
                        symbol,
                    },
                    value: Box::new(value),
                },
            });
        }

        Ok(expression)
    }

    // No surface syntax reaches this level yet; it keeps the precedence
    // chain in its documented shape
    fn parse_logical_or_expression(&mut self) -> Result<Expression, SyntaxError> {
        self.parse_logical_and_expression()
    }

    fn parse_logical_and_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_equality_expression()?;

        while let Some(operator) = self.matches(TokenKind::Keyword(Keyword::And)) {
            let rhs = self.parse_equality_expression()?;

            expression = self.binary(
                expression,
                BinaryOperator {
                    span: operator.span,
                    kind: BinaryOperatorKind::LogicalAnd,
                },
                rhs,
            );
        }

        Ok(expression)
    }

    fn parse_equality_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_comparison_expression()?;

        while self
            .stream
            .peek_kind()
            .is_some_and(|kind| kind.is_equality_operator())
        {
            let operator = self.next().unwrap();
            let rhs = self.parse_comparison_expression()?;

            let kind = match operator.kind {
                TokenKind::DoubleEquals => BinaryOperatorKind::Equals,
                TokenKind::NotEquals => BinaryOperatorKind::NotEquals,
                _ => unreachable!(),
            };

            expression = self.binary(
                expression,
                BinaryOperator {
                    span: operator.span,
                    kind,
                },
                rhs,
            );
        }

        Ok(expression)
    }

    fn parse_comparison_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_term_expression()?;

        while self
            .stream
            .peek_kind()
            .is_some_and(|kind| kind.is_comparison_operator())
        {
            let operator = self.next().unwrap();
            let rhs = self.parse_term_expression()?;

            let kind = match operator.kind {
                TokenKind::LessThan => BinaryOperatorKind::LessThan,
                TokenKind::LessThanOrEqualTo => BinaryOperatorKind::LessThanOrEqualTo,
                TokenKind::GreaterThan => BinaryOperatorKind::GreaterThan,
                TokenKind::GreaterThanOrEqualTo => BinaryOperatorKind::GreaterThanOrEqualTo,
                _ => unreachable!(),
            };

            expression = self.binary(
                expression,
                BinaryOperator {
                    span: operator.span,
                    kind,
                },
                rhs,
            );
        }

        Ok(expression)
    }

    fn parse_term_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_factor_expression()?;

        while self
            .stream
            .peek_kind()
            .is_some_and(|kind| kind.is_term_operator())
        {
            let operator = self.next().unwrap();
            let rhs = self.parse_factor_expression()?;

            let kind = match operator.kind {
                TokenKind::Plus => BinaryOperatorKind::Add,
                TokenKind::Minus => BinaryOperatorKind::Subtract,
                _ => unreachable!(),
            };

            expression = self.binary(
                expression,
                BinaryOperator {
                    span: operator.span,
                    kind,
                },
                rhs,
            );
        }

        Ok(expression)
    }

    fn parse_factor_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_unary_expression()?;

        while self
            .stream
            .peek_kind()
            .is_some_and(|kind| kind.is_factor_operator())
        {
            let operator = self.next().unwrap();
            let rhs = self.parse_unary_expression()?;

            let kind = match operator.kind {
                TokenKind::Asterisk => BinaryOperatorKind::Multiply,
                TokenKind::Slash => BinaryOperatorKind::Divide,
                _ => unreachable!(),
            };

            expression = self.binary(
                expression,
                BinaryOperator {
                    span: operator.span,
                    kind,
                },
                rhs,
            );
        }

        Ok(expression)
    }

    fn parse_unary_expression(&mut self) -> Result<Expression, SyntaxError> {
        if let Some(minus) = self.matches(TokenKind::Minus) {
            let operand = self.parse_unary_expression()?;
            let span = Span::new(minus.span.start, operand.span.end);

            // Negation desugars to subtraction from zero
            let zero = Expression {
                id: self.create_node_id(),
                span: minus.span,
                kind: ExpressionKind::NumberLiteral(0),
            };

            return Ok(Expression {
                id: self.create_node_id(),
                span,
                kind: ExpressionKind::Binary {
                    operator: BinaryOperator {
                        span: minus.span,
                        kind: BinaryOperatorKind::Subtract,
                    },
                    lhs: Box::new(zero),
                    rhs: Box::new(operand),
                },
            });
        }

        self.parse_call_expression()
    }

    fn parse_call_expression(&mut self) -> Result<Expression, SyntaxError> {
        let expression = self.parse_primary_expression()?;

        if self.stream.peek_kind() == Some(TokenKind::OpenParen) {
            if let ExpressionKind::Identifier(symbol) = expression.kind {
                self.next();

                // `d(expr)` is the derivative form, not a call
                if symbol.value() == "d" {
                    let inner = self.parse_expression()?;
                    let close = self.expect(TokenKind::CloseParen, "`)` after derivative")?;

                    return Ok(Expression {
                        id: self.create_node_id(),
                        span: Span::new(expression.span.start, close.span.end),
                        kind: ExpressionKind::Derivative(Box::new(inner)),
                    });
                }

                let mut arguments = Vec::new();
                if self.stream.peek_kind() != Some(TokenKind::CloseParen) {
                    arguments.push(self.parse_expression()?);

                    while self.matches(TokenKind::Comma).is_some() {
                        arguments.push(self.parse_expression()?);
                    }
                }

                let close = self.expect(TokenKind::CloseParen, "`)` after arguments")?;

                return Ok(Expression {
                    id: self.create_node_id(),
                    span: Span::new(expression.span.start, close.span.end),
                    kind: ExpressionKind::Call {
                        name: Identifier {
                            id: self.create_node_id(),
                            span: expression.span,
                            symbol,
                        },
                        arguments,
                    },
                });
            }
        }

        Ok(expression)
    }

    fn parse_primary_expression(&mut self) -> Result<Expression, SyntaxError> {
        let Some(peeked) = self.stream.peek() else {
            return Err(self.error_at_current("expected expression"));
        };

        match peeked.kind {
            TokenKind::Number => {
                let token = self.next().unwrap();

                Ok(Expression {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: ExpressionKind::NumberLiteral(
                        token.value.expect("number token carries a value"),
                    ),
                })
            }
            TokenKind::String => {
                let token = self.next().unwrap();

                Ok(Expression {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: ExpressionKind::StringLiteral(
                        token.symbol.expect("string token carries its contents"),
                    ),
                })
            }
            TokenKind::TimeLiteral => {
                let duration = self.parse_duration()?;

                Ok(Expression {
                    id: self.create_node_id(),
                    span: duration.span,
                    kind: ExpressionKind::Duration(duration),
                })
            }
            TokenKind::Keyword(keyword @ (Keyword::True | Keyword::False)) => {
                let token = self.next().unwrap();

                Ok(Expression {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: ExpressionKind::BooleanLiteral(keyword == Keyword::True),
                })
            }
            TokenKind::Identifier => {
                let token = self.next().unwrap();

                Ok(Expression {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: ExpressionKind::Identifier(InternedSymbol::new(
                        self.stream.lexer().source().value_of_span(token.span),
                    )),
                })
            }
            TokenKind::OpenParen => {
                let open = self.next().unwrap();
                let inner = self.parse_expression()?;
                let close = self.expect(TokenKind::CloseParen, "`)` after expression")?;

                Ok(Expression {
                    id: self.create_node_id(),
                    span: Span::new(open.span.start, close.span.end),
                    kind: ExpressionKind::Grouping(Box::new(inner)),
                })
            }
            kind => Err(SyntaxError {
                location: peeked.location,
                message: format!(
                    "expected expression but found {kind:?} ({})",
                    self.stream.lexer().source().value_of_span(peeked.span)
                ),
            }),
        }
    }

    fn binary(
        &mut self,
        lhs: Expression,
        operator: BinaryOperator,
        rhs: Expression,
    ) -> Expression {
        Expression {
            id: self.create_node_id(),
            span: Span::new(lhs.span.start, rhs.span.end),
            kind: ExpressionKind::Binary {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    fn location_of_span(&self, span: Span) -> SourceLocation {
        let source = self.stream.lexer().source();
        let (line, column) = source.position_of(span.start);

        SourceLocation::new(source.name.clone(), line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::numeric::TimeUnit;

    fn parse(source: &str) -> (ParseResult<'_>, DiagnosticEngine) {
        // Leak keeps the borrow simple in tests; each source is tiny
        let file: &'static SourceFile = Box::leak(Box::new(SourceFile::in_memory(source)));
        let mut diagnostics = DiagnosticEngine::new();
        let result = Parser::parse_program(file, &mut diagnostics);
        (result, diagnostics)
    }

    #[test]
    fn empty_file_is_an_empty_program() {
        let (result, diagnostics) = parse("");
        assert!(result.program.statements.is_empty());
        assert!(!result.had_error);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn precedence_groups_factors_first() {
        let (result, _) = parse("let x = 2 + 3 * 4;");
        let StatementKind::VarDecl { initializer, .. } = &result.program.statements[0].kind
        else {
            panic!("expected variable declaration");
        };

        let ExpressionKind::Binary { operator, rhs, .. } =
            &initializer.as_ref().unwrap().kind
        else {
            panic!("expected binary initializer");
        };

        assert_eq!(operator.kind, BinaryOperatorKind::Add);
        assert!(matches!(
            &rhs.kind,
            ExpressionKind::Binary { operator, .. }
                if operator.kind == BinaryOperatorKind::Multiply
        ));
    }

    #[test]
    fn base_twelve_literal_value_reaches_the_ast() {
        let (result, _) = parse("let x = 3b;");
        let StatementKind::VarDecl { initializer, .. } = &result.program.statements[0].kind
        else {
            panic!("expected variable declaration");
        };

        assert!(matches!(
            initializer.as_ref().unwrap().kind,
            ExpressionKind::NumberLiteral(47)
        ));
    }

    #[test]
    fn if_with_else_parses_both_branches() {
        let (result, _) = parse("if x == 0: return 1; else: return 2;");
        assert!(!result.had_error);

        let StatementKind::If {
            then_branch,
            else_branch,
            ..
        } = &result.program.statements[0].kind
        else {
            panic!("expected if statement");
        };

        assert_eq!(then_branch.statements.len(), 1);
        assert_eq!(else_branch.as_ref().unwrap().statements.len(), 1);
    }

    #[test]
    fn every_parses_interval_and_body() {
        let (result, _) = parse("every 10ms: wait 1s; end;");
        assert!(!result.had_error);

        let StatementKind::Every { interval, body } = &result.program.statements[0].kind
        else {
            panic!("expected every statement");
        };

        assert_eq!(interval.duration.nanoseconds(), 12 * 83_333_333);
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(
            body.statements[0].kind,
            StatementKind::Wait(w) if w.duration.nanoseconds() == 1_000_000_000
        ));
    }

    #[test]
    fn derive_has_two_forms() {
        let (result, _) = parse("derive v = d(x); derive w over 2s: wait 1s; end;");
        assert!(!result.had_error);

        let StatementKind::Derive {
            expression, body, ..
        } = &result.program.statements[0].kind
        else {
            panic!("expected derive statement");
        };
        assert!(matches!(
            expression.as_ref().unwrap().kind,
            ExpressionKind::Derivative(_)
        ));
        assert!(body.is_none());

        let StatementKind::Derive {
            expression,
            interval,
            body,
            ..
        } = &result.program.statements[1].kind
        else {
            panic!("expected derive statement");
        };
        assert!(expression.is_none());
        assert_eq!(
            interval.unwrap().duration.as_unit(TimeUnit::Seconds),
            2
        );
        assert!(body.is_some());
    }

    #[test]
    fn function_forms_parse() {
        let (result, _) = parse("fn add(a, b) return a + b; end; fn = [stub x];");
        assert!(!result.had_error);
        assert_eq!(result.program.statements.len(), 2);

        let StatementKind::FunctionDecl(first) = &result.program.statements[0].kind else {
            panic!("expected function");
        };
        assert_eq!(first.parameters.len(), 2);
        assert_eq!(first.body.statements.len(), 1);

        let StatementKind::FunctionDecl(second) = &result.program.statements[1].kind else {
            panic!("expected function");
        };
        assert_eq!(second.name.symbol.value(), "stub");
        assert_eq!(second.parameters.len(), 1);
        assert!(second.body.statements.is_empty());
    }

    #[test]
    fn assignment_targets_must_be_names() {
        let (result, _) = parse("x = 1;");
        assert!(!result.had_error);
        assert!(matches!(
            &result.program.statements[0].kind,
            StatementKind::Expression(e)
                if matches!(e.kind, ExpressionKind::Assignment { .. })
        ));

        let (result, _) = parse("1 = 2;");
        assert!(result.had_error);
    }

    #[test]
    fn recovery_resumes_at_statement_boundaries() {
        let (result, diagnostics) = parse("let = 5; let y = 2; wait oops; return 3;");

        assert!(result.had_error);
        assert!(diagnostics.has_errors());

        // The two well-formed statements survive
        let kinds: Vec<_> = result
            .program
            .statements
            .iter()
            .map(|s| std::mem::discriminant(&s.kind))
            .collect();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(
            result.program.statements[0].kind,
            StatementKind::VarDecl { .. }
        ));
        assert!(matches!(
            result.program.statements[1].kind,
            StatementKind::Return(_)
        ));
    }

    #[test]
    fn lexer_errors_mark_the_parse_as_failed() {
        let (result, diagnostics) = parse("let x = 1; @");
        assert!(result.had_error);
        assert!(diagnostics.has_errors());
        assert_eq!(result.program.statements.len(), 1);
    }

    #[test]
    fn break_and_continue_parse_as_loop_control() {
        let (result, _) = parse("break; continue;");
        assert!(!result.had_error);
        assert!(matches!(
            result.program.statements[0].kind,
            StatementKind::LoopControl(LoopControlKind::Break)
        ));
        assert!(matches!(
            result.program.statements[1].kind,
            StatementKind::LoopControl(LoopControlKind::Continue)
        ));
    }
}
