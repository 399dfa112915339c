use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{peek_nth, PeekNth};
use once_cell::sync::Lazy;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::{
    diagnostics::SourceLocation,
    frontend::{
        numeric::{self, NumericError, TimeUnit},
        intern::InternedSymbol,
        SourceFile,
    },
};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    chars: PeekNth<Chars<'source>>,
    position: usize,
    line: usize,
    column: usize,
    keywords: BTreeMap<String, Keyword>,
    case_insensitive_keywords: bool,
    peek_buffer: VecDeque<Token>,
    errors: Vec<LexerError>,
    stats: Statistics,
    emitted_eof: bool,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub location: SourceLocation,
    /// Parsed magnitude for `Number` and `TimeLiteral` tokens
    pub value: Option<i64>,
    /// Unit tag for `TimeLiteral` tokens
    pub unit: Option<TimeUnit>,
    /// Processed (escape-resolved) contents for `String` tokens
    pub symbol: Option<InternedSymbol>,
}

impl Token {
    fn bare(kind: TokenKind, span: Span, location: SourceLocation) -> Self {
        Self {
            kind,
            span,
            location,
            value: None,
            unit: None,
            symbol: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // every
    Identifier,       // main

    /* Literals */
    Number,      // 3b, 10#47
    String,      // "hello"
    TimeLiteral, // 100ms

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Colon,        // :
    Comma,        // ,
    Dot,          // .

    /* Operators */
    Plus,                 // +
    Minus,                // -
    Asterisk,             // *
    Slash,                // /
    Equals,               // =
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    Bang,                 // !

    /* Other */
    EndOfFile,
    Invalid,
}

impl TokenKind {
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Number | Self::String | Self::TimeLiteral)
    }

    pub fn is_delimiter(&self) -> bool {
        matches!(
            self,
            Self::OpenParen
                | Self::CloseParen
                | Self::OpenBracket
                | Self::CloseBracket
                | Self::OpenBrace
                | Self::CloseBrace
                | Self::Semicolon
                | Self::Colon
                | Self::Comma
                | Self::Dot
        )
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::Plus
                | Self::Minus
                | Self::Asterisk
                | Self::Slash
                | Self::Equals
                | Self::DoubleEquals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
                | Self::Bang
        )
    }

    pub fn is_equality_operator(&self) -> bool {
        matches!(self, Self::DoubleEquals | Self::NotEquals)
    }

    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Slash)
    }

    /// True for the token kinds that can begin a statement; used by the
    /// parser's panic-mode recovery.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            Self::Keyword(
                Keyword::Fn
                    | Keyword::Let
                    | Keyword::If
                    | Keyword::While
                    | Keyword::For
                    | Keyword::Return
            )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, EnumString, EnumIter, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Keyword {
    /* Declarations */
    Fn,
    Let,
    Const,

    /* Control */
    If,
    Else,
    While,
    For,
    Match,
    Break,
    Continue,
    Return,

    /* Temporal */
    Every,
    Wait,
    After,
    Before,
    During,
    Timeout,
    Derive,
    Over,
    Dozisecond,
    Temporal,

    /* Base twelve */
    Dozen,
    Gross,
    Base12,
    Duodecimal,

    /* Parallelism */
    Parallel,
    And,
    Thread,
    Lock,
    Async,
    Await,

    /* Error handling */
    Try,
    Catch,
    Throw,

    /* Literals */
    True,
    False,
    Null,
    Nil,

    /* Block terminators */
    End,
    Then,
    Say,
}

/// The default keyword table: every [`Keyword`] spelling plus the `ret`
/// alias for `return`.
static DEFAULT_KEYWORDS: Lazy<BTreeMap<String, Keyword>> = Lazy::new(|| {
    let mut table: BTreeMap<String, Keyword> = Keyword::iter()
        .map(|keyword| (keyword.to_string(), keyword))
        .collect();

    table.insert("ret".to_owned(), Keyword::Return);
    table
});

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (':', TokenKind::Colon),
        (',', TokenKind::Comma),
        ('.', TokenKind::Dot),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Slash),
        ('=', TokenKind::Equals),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
        ('!', TokenKind::Bang),
    ])
});

#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct LexerError {
    pub kind: LexerErrorKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Error)]
pub enum LexerErrorKind {
    #[error("unexpected character `{0}` in stream")]
    UnexpectedCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid time unit `{0}`")]
    InvalidTimeUnit(String),
    #[error("invalid numeric literal: {0}")]
    InvalidNumber(NumericError),
}

/// Counts maintained while scanning; exposed through [`Lexer::statistics`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub total_tokens: usize,
    pub total_lines: usize,
    pub keywords: usize,
    pub identifiers: usize,
    pub literals: usize,
    pub operators: usize,
    pub delimiters: usize,
    pub errors: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            line: 1,
            column: 1,
            keywords: DEFAULT_KEYWORDS.clone(),
            case_insensitive_keywords: true,
            peek_buffer: VecDeque::new(),
            errors: Vec::new(),
            stats: Statistics::default(),
            emitted_eof: false,
        }
    }

    pub fn source(&self) -> &SourceFile {
        self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.peek_buffer.is_empty() && self.position >= self.source.contents.len()
    }

    pub fn errors(&self) -> &[LexerError] {
        &self.errors
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Case-insensitive keyword lookup is on by default.
    pub fn set_case_insensitive_keywords(&mut self, enabled: bool) {
        self.case_insensitive_keywords = enabled;
    }

    /// Registers an additional keyword spelling. Must be called before any
    /// tokens are produced; the table is fixed once scanning begins.
    pub fn add_keyword(&mut self, word: &str, keyword: Keyword) {
        debug_assert_eq!(self.position, 0, "keyword table is fixed once scanning begins");
        self.keywords.insert(word.to_ascii_lowercase(), keyword);
    }

    pub fn remove_keyword(&mut self, word: &str) {
        self.keywords.remove(&word.to_ascii_lowercase());
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.lookup_keyword(word).is_some()
    }

    fn lookup_keyword(&self, word: &str) -> Option<Keyword> {
        if self.case_insensitive_keywords {
            self.keywords.get(&word.to_ascii_lowercase()).copied()
        } else {
            self.keywords.get(word).copied()
        }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.source.name.clone(), self.line, self.column)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();

        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(c)
    }

    fn new_span(&self, start: usize) -> Span {
        Span::new(start, self.position)
    }

    fn record_error(&mut self, kind: LexerErrorKind, location: SourceLocation) {
        self.errors.push(LexerError { kind, location });
        self.stats.errors += 1;
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_whitespace() {
                break;
            }

            self.advance();
        }
    }

    /// `#` to end of line, or `##` ... `##` (no nesting).
    fn ignore_comment(&mut self) {
        self.advance();

        if self.chars.peek().copied() == Some('#') {
            self.advance();

            while let Some(c) = self.chars.peek().copied() {
                if c == '#' && self.chars.peek_nth(1).copied() == Some('#') {
                    self.advance();
                    self.advance();
                    break;
                }

                self.advance();
            }
        } else {
            while let Some(c) = self.chars.peek().copied() {
                if c == '\n' {
                    break;
                }

                self.advance();
            }
        }
    }

    fn read_string(&mut self) -> Token {
        let start_position = self.position;
        let location = self.location();

        // Consume opening quote
        self.advance();

        let mut value = String::new();

        loop {
            let Some(c) = self.chars.peek().copied() else {
                self.record_error(LexerErrorKind::UnterminatedString, location.clone());
                return Token::bare(TokenKind::Invalid, self.new_span(start_position), location);
            };

            if c == '\n' {
                self.record_error(LexerErrorKind::UnterminatedString, location.clone());
                return Token::bare(TokenKind::Invalid, self.new_span(start_position), location);
            }

            self.advance();

            match c {
                '"' => break,
                '\\' => {
                    let escaped = self.advance();
                    match escaped {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => value.push(other),
                        None => {
                            self.record_error(LexerErrorKind::UnterminatedString, location.clone());
                            return Token::bare(
                                TokenKind::Invalid,
                                self.new_span(start_position),
                                location,
                            );
                        }
                    }
                }
                other => value.push(other),
            }
        }

        self.stats.literals += 1;

        Token {
            kind: TokenKind::String,
            span: self.new_span(start_position),
            location,
            value: None,
            unit: None,
            symbol: Some(InternedSymbol::new(&value)),
        }
    }

    fn is_dodecagram_digit(c: char) -> bool {
        c.is_ascii_digit() || matches!(c, 'a' | 'A' | 'b' | 'B')
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let location = self.location();

        // `10#` forces decimal, `12#` base twelve (also the default). The
        // two-character sniff only commits when the `#` is actually present.
        let mut explicit_decimal = false;

        if self.chars.peek().copied() == Some('1')
            && matches!(self.chars.peek_nth(1).copied(), Some('0' | '2'))
            && self.chars.peek_nth(2).copied() == Some('#')
        {
            let prefix = self.chars.peek_nth(1).copied();
            self.advance();
            self.advance();
            self.advance();

            explicit_decimal = prefix == Some('0');
        }

        let digits_start = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !Self::is_dodecagram_digit(c) {
                break;
            }

            self.advance();
        }

        let digits = self.source.contents[digits_start..self.position].to_owned();

        // Immediately-adjacent unit letters fuse the token into a
        // time-suffixed numeric
        if matches!(
            self.chars.peek().copied().map(|c| c.to_ascii_lowercase()),
            Some('n' | 'm' | 's' | 'h')
        ) {
            return self.read_time_unit(start_position, location, &digits, explicit_decimal);
        }

        let parsed = if explicit_decimal {
            numeric::parse_decimal(&digits)
        } else {
            numeric::parse_base_twelve(&digits)
        };

        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                self.record_error(LexerErrorKind::InvalidNumber(e), location.clone());
                return Token::bare(TokenKind::Invalid, self.new_span(start_position), location);
            }
        };

        self.stats.literals += 1;

        Token {
            kind: TokenKind::Number,
            span: self.new_span(start_position),
            location,
            value: Some(value),
            unit: None,
            symbol: None,
        }
    }

    fn read_time_unit(
        &mut self,
        start_position: usize,
        location: SourceLocation,
        digits: &str,
        explicit_decimal: bool,
    ) -> Token {
        let unit_start = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_alphabetic() {
                break;
            }

            self.advance();
        }

        let unit_text = &self.source.contents[unit_start..self.position];

        let Ok(unit) = unit_text.parse::<TimeUnit>() else {
            self.record_error(
                LexerErrorKind::InvalidTimeUnit(unit_text.to_owned()),
                location.clone(),
            );
            return Token::bare(TokenKind::Invalid, self.new_span(start_position), location);
        };

        let parsed = if explicit_decimal {
            numeric::parse_decimal(digits)
        } else {
            numeric::parse_base_twelve(digits)
        };

        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                self.record_error(LexerErrorKind::InvalidNumber(e), location.clone());
                return Token::bare(TokenKind::Invalid, self.new_span(start_position), location);
            }
        };

        self.stats.literals += 1;

        Token {
            kind: TokenKind::TimeLiteral,
            span: self.new_span(start_position),
            location,
            value: Some(value),
            unit: Some(unit),
            symbol: None,
        }
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;
        let location = self.location();

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.advance();
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Some(keyword) = self.lookup_keyword(value) {
            self.stats.keywords += 1;
            TokenKind::Keyword(keyword)
        } else {
            self.stats.identifiers += 1;
            TokenKind::Identifier
        };

        Token::bare(kind, span, location)
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let location = self.location();

        self.advance();

        Token::bare(kind, self.new_span(start_position), location)
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let location = self.location();

        self.advance();
        self.advance();

        Token::bare(kind, self.new_span(start_position), location)
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.peek_ahead(0)
    }

    /// Returns the `(k + 1)`-th upcoming token without consuming anything.
    pub fn peek_ahead(&mut self, k: usize) -> Option<Token> {
        while self.peek_buffer.len() <= k {
            let token = self.scan_token()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(k).cloned()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.scan_token()
    }

    fn scan_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                c if c.is_ascii_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                '#' => {
                    self.ignore_comment();
                    continue;
                }

                '"' => self.read_string(),

                n if n.is_ascii_digit() => self.read_number(),

                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                // Double Equals (==)
                '=' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                // Not Equals (!=)
                '!' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                // Less than or equal (<=)
                '<' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                // Greater than or equal (>=)
                '>' if self.chars.peek_nth(1).copied() == Some('=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }

                s if SINGLE_TOKENS.contains_key(&s) => {
                    let kind = *SINGLE_TOKENS.get(&s).unwrap();
                    let token = self.read_single(kind);

                    if kind.is_operator() {
                        self.stats.operators += 1;
                    } else {
                        self.stats.delimiters += 1;
                    }

                    token
                }

                c => {
                    let location = self.location();
                    let start_position = self.position;

                    self.record_error(LexerErrorKind::UnexpectedCharacter(c), location.clone());
                    self.advance();

                    Token::bare(TokenKind::Invalid, self.new_span(start_position), location)
                }
            };

            self.stats.total_tokens += 1;

            if let TokenKind::DoubleEquals
            | TokenKind::NotEquals
            | TokenKind::LessThanOrEqualTo
            | TokenKind::GreaterThanOrEqualTo = token.kind
            {
                self.stats.operators += 1;
            }

            return Some(token);
        }

        if self.emitted_eof {
            return None;
        }

        self.emitted_eof = true;
        self.stats.total_tokens += 1;
        self.stats.total_lines = self.line;

        Some(Token::bare(
            TokenKind::EndOfFile,
            Span::new(self.position, self.position),
            self.location(),
        ))
    }

    /// Scans the entire source, ending with exactly one `EndOfFile` token.
    /// Errors are collected, never aborted on.
    pub fn tokenize_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next() {
            tokens.push(token);
        }

        tokens
    }
}

/// A thin cursor over [`Lexer`] exposing the operations the parser needs.
#[derive(Debug)]
pub struct TokenStream<'source> {
    lexer: Lexer<'source>,
}

#[derive(Debug, Clone)]
pub struct StreamError {
    pub location: SourceLocation,
    pub message: String,
}

impl<'source> TokenStream<'source> {
    pub fn new(lexer: Lexer<'source>) -> Self {
        Self { lexer }
    }

    pub fn lexer(&self) -> &Lexer<'source> {
        &self.lexer
    }

    pub fn into_lexer(self) -> Lexer<'source> {
        self.lexer
    }

    pub fn next(&mut self) -> Option<Token> {
        self.lexer.next()
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.lexer.peek()
    }

    pub fn peek_ahead(&mut self, k: usize) -> Option<Token> {
        self.lexer.peek_ahead(k)
    }

    pub fn peek_kind(&mut self) -> Option<TokenKind> {
        self.lexer.peek().map(|t| t.kind)
    }

    /// Consumes and returns the next token if it has the given kind.
    pub fn matches(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_kind() == Some(kind) {
            return self.next();
        }

        None
    }

    pub fn expect(&mut self, kind: TokenKind, expecting: &str) -> Result<Token, StreamError> {
        match self.peek() {
            Some(token) if token.kind == kind => Ok(self.next().unwrap()),
            Some(token) => Err(StreamError {
                location: token.location.clone(),
                message: format!(
                    "expected {expecting} but found {:?} ({})",
                    token.kind,
                    self.lexer.source().value_of_span(token.span)
                ),
            }),
            None => Err(StreamError {
                location: SourceLocation::new(
                    self.lexer.source().name.clone(),
                    self.lexer.line,
                    self.lexer.column,
                ),
                message: format!("expected {expecting} but reached end of file"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> (Vec<Token>, Vec<LexerError>, Statistics) {
        let file = SourceFile::in_memory(source);
        let mut lexer = Lexer::new(&file);
        let tokens = lexer.tokenize_all();
        let errors = lexer.errors().to_vec();
        let stats = lexer.statistics();

        assert_eq!(lexer.position(), source.len(), "every byte must be scanned");

        (tokens, errors, stats)
    }

    #[test]
    fn ends_with_exactly_one_eof() {
        let (tokens, errors, _) = lex_all("let x = 1;");
        assert!(errors.is_empty());
        assert_eq!(
            tokens
                .iter()
                .filter(|t| t.kind == TokenKind::EndOfFile)
                .count(),
            1
        );
        assert_eq!(tokens.last().unwrap().kind, TokenKind::EndOfFile);
    }

    #[test]
    fn empty_source_is_just_eof() {
        let (tokens, errors, _) = lex_all("");
        assert!(errors.is_empty());
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::EndOfFile);
    }

    #[test]
    fn plain_identifiers_stay_identifiers() {
        for name in ["x", "abc", "buffer_12", "_tmp"] {
            let (tokens, errors, _) = lex_all(name);
            assert!(errors.is_empty());
            assert_eq!(tokens[0].kind, TokenKind::Identifier, "lexing {name}");
            assert_eq!(tokens.len(), 2);
        }
    }

    #[test]
    fn keywords_are_case_insensitive() {
        for spelling in ["every", "Every", "EVERY"] {
            let (tokens, _, _) = lex_all(spelling);
            assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Every));
        }
    }

    #[test]
    fn ret_is_an_alias_for_return() {
        let (tokens, _, _) = lex_all("ret 1;");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Return));
    }

    #[test]
    fn injected_keywords_take_effect() {
        let file = SourceFile::in_memory("loopy");
        let mut lexer = Lexer::new(&file);
        lexer.add_keyword("loopy", Keyword::While);

        let token = lexer.next().unwrap();
        assert_eq!(token.kind, TokenKind::Keyword(Keyword::While));
    }

    #[test]
    fn base_twelve_literal_carries_decimal_value() {
        let (tokens, errors, _) = lex_all("3b");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].value, Some(47));
    }

    #[test]
    fn explicit_prefixes_select_the_base() {
        let (tokens, _, _) = lex_all("10#47");
        assert_eq!(tokens[0].value, Some(47));

        let (tokens, _, _) = lex_all("12#10");
        assert_eq!(tokens[0].value, Some(12));
    }

    #[test]
    fn decimal_prefix_rejects_dodecagram_digits() {
        let (tokens, errors, _) = lex_all("10#4a");
        assert_eq!(tokens[0].kind, TokenKind::Invalid);
        assert!(matches!(
            errors[0].kind,
            LexerErrorKind::InvalidNumber(NumericError::InvalidDigit('a'))
        ));
    }

    #[test]
    fn time_suffix_fuses_into_one_token() {
        let (tokens, errors, _) = lex_all("100ms");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::TimeLiteral);
        assert_eq!(tokens[0].value, Some(144));
        assert_eq!(tokens[0].unit, Some(TimeUnit::Doziseconds));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn ten_ms_is_a_time_literal_not_a_prefix() {
        // The `10#` sniff must not fire without the `#`
        let (tokens, errors, _) = lex_all("10ms");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::TimeLiteral);
        assert_eq!(tokens[0].value, Some(12));
    }

    #[test]
    fn bogus_unit_letters_produce_a_diagnostic() {
        let (tokens, errors, _) = lex_all("5minutes");
        assert_eq!(tokens[0].kind, TokenKind::Invalid);
        assert!(matches!(
            &errors[0].kind,
            LexerErrorKind::InvalidTimeUnit(unit) if unit == "minutes"
        ));
    }

    #[test]
    fn string_escapes_resolve() {
        let (tokens, errors, _) = lex_all(r#""a\tb\n\"c\"""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].symbol.unwrap().value(), "a\tb\n\"c\"");
    }

    #[test]
    fn unterminated_string_recovers() {
        let (tokens, errors, _) = lex_all("\"oops\nlet x;");
        assert_eq!(tokens[0].kind, TokenKind::Invalid);
        assert!(matches!(errors[0].kind, LexerErrorKind::UnterminatedString));

        // Scanning continues on the next line
        assert_eq!(tokens[1].kind, TokenKind::Keyword(Keyword::Let));
    }

    #[test]
    fn comments_are_skipped() {
        let (tokens, errors, _) = lex_all("# line comment\nlet ## inline\nstill ## x;");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Let));
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn unexpected_character_is_reported_and_skipped() {
        let (tokens, errors, _) = lex_all("let @ x;");
        assert!(matches!(
            errors[0].kind,
            LexerErrorKind::UnexpectedCharacter('@')
        ));
        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn operators_longest_match() {
        let (tokens, _, _) = lex_all("== != <= >= < > = !");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::DoubleEquals,
                TokenKind::NotEquals,
                TokenKind::LessThanOrEqualTo,
                TokenKind::GreaterThanOrEqualTo,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::Equals,
                TokenKind::Bang,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn peeking_preserves_the_cursor() {
        let file = SourceFile::in_memory("let x = 1;");
        let mut lexer = Lexer::new(&file);

        let ahead = lexer.peek_ahead(2).unwrap();
        assert_eq!(ahead.kind, TokenKind::Equals);

        let first = lexer.next().unwrap();
        assert_eq!(first.kind, TokenKind::Keyword(Keyword::Let));
        let second = lexer.next().unwrap();
        assert_eq!(second.kind, TokenKind::Identifier);
    }

    #[test]
    fn locations_are_one_based() {
        let (tokens, _, _) = lex_all("let\n  x");
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[0].location.column, 1);
        assert_eq!(tokens[1].location.line, 2);
        assert_eq!(tokens[1].location.column, 3);
    }

    #[test]
    fn statistics_count_token_classes() {
        let (_, _, stats) = lex_all("let x = 1 + 2; say \"hi\";");
        assert_eq!(stats.keywords, 2);
        assert_eq!(stats.identifiers, 1);
        assert_eq!(stats.literals, 3);
        assert!(stats.total_tokens > 0);
    }

    #[test]
    fn stream_matches_and_expects() {
        let file = SourceFile::in_memory("wait 1s;");
        let mut stream = TokenStream::new(Lexer::new(&file));

        assert!(stream.matches(TokenKind::Keyword(Keyword::Wait)).is_some());
        let duration = stream.expect(TokenKind::TimeLiteral, "duration").unwrap();
        assert_eq!(duration.value, Some(1));
        assert!(stream.expect(TokenKind::Colon, "colon").is_err());
    }
}
